//! The typed AST handed over by the front-end.
//!
//! Nodes live in an index arena owned by [`Ast`]; edges are `NodeId`s, so
//! the tree carries no ownership cycles and lowering can hold plain ids.
//! Ordered children hang off `first_child`/`next_sibling`; the control-flow
//! tags additionally use the named `lhs`/`rhs` slots:
//!
//! - `Branch`: condition = child 0, true arm = `lhs`, false arm = `rhs`
//!   (an empty `Code` when the source had no `else`)
//! - `Loop`: while has cond = `lhs`, body = `rhs`; do-while has body = `lhs`,
//!   cond = `rhs` (the variant is detected by the `Code` tag on `lhs`)
//! - `Iter`: init/cond/step = children 0..3, body = `lhs`
//! - `Return`: expression = `rhs`, absent for a void return
//! - binary value tags: operands = `lhs`/`rhs`
//! - `Call`: callee = `lhs`, arguments = children

use crate::span::Span;
use crate::sym::SymId;
use crate::types::DataType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Node discriminator. The statement set is closed; the value set is open
/// to the lowering in the sense that every member answers `is_value()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    // ── Statements and structure ──
    Module,
    Using,
    FnImpl,
    Decl,
    Code,
    Branch,
    Loop,
    Iter,
    Return,
    Break,
    Continue,
    Empty,

    // ── Values ──
    Num,
    Name,
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
    LogNot,
    Addr,
    Deref,
    Call,
}

impl Tag {
    /// True for every expression-position tag.
    pub fn is_value(self) -> bool {
        matches!(
            self,
            Tag::Num
                | Tag::Name
                | Tag::Assign
                | Tag::Add
                | Tag::Sub
                | Tag::Mul
                | Tag::Div
                | Tag::Rem
                | Tag::And
                | Tag::Or
                | Tag::Xor
                | Tag::Shl
                | Tag::Shr
                | Tag::Neg
                | Tag::Eq
                | Tag::Ne
                | Tag::Lt
                | Tag::Le
                | Tag::Gt
                | Tag::Ge
                | Tag::LogAnd
                | Tag::LogOr
                | Tag::LogNot
                | Tag::Addr
                | Tag::Deref
                | Tag::Call
        )
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub tag: Tag,
    pub first_child: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    pub lhs: Option<NodeId>,
    pub rhs: Option<NodeId>,
    pub sym: Option<SymId>,
    pub dt: DataType,
    /// Integer payload; meaningful only for `Num`.
    pub value: i64,
    pub span: Span,
}

#[derive(Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tag: Tag) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            tag,
            first_child: None,
            next_sibling: None,
            lhs: None,
            rhs: None,
            sym: None,
            dt: DataType::Void,
            value: 0,
            span: Span::dummy(),
        });
        id
    }

    /// An integer literal node, typed `Int`.
    pub fn add_num(&mut self, value: i64) -> NodeId {
        let id = self.add(Tag::Num);
        self.nodes[id.0 as usize].value = value;
        self.nodes[id.0 as usize].dt = DataType::Int;
        id
    }

    /// A resolved name reference.
    pub fn add_name(&mut self, sym: SymId, dt: DataType) -> NodeId {
        let id = self.add(Tag::Name);
        self.nodes[id.0 as usize].sym = Some(sym);
        self.nodes[id.0 as usize].dt = dt;
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn set_lhs(&mut self, id: NodeId, lhs: NodeId) {
        self.nodes[id.0 as usize].lhs = Some(lhs);
    }

    pub fn set_rhs(&mut self, id: NodeId, rhs: NodeId) {
        self.nodes[id.0 as usize].rhs = Some(rhs);
    }

    pub fn set_sym(&mut self, id: NodeId, sym: SymId) {
        self.nodes[id.0 as usize].sym = Some(sym);
    }

    pub fn set_dt(&mut self, id: NodeId, dt: DataType) {
        self.nodes[id.0 as usize].dt = dt;
    }

    pub fn set_span(&mut self, id: NodeId, span: Span) {
        self.nodes[id.0 as usize].span = span;
    }

    /// Append `child` at the end of `parent`'s sibling chain.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        let mut cursor = match self.nodes[parent.0 as usize].first_child {
            None => {
                self.nodes[parent.0 as usize].first_child = Some(child);
                return;
            }
            Some(first) => first,
        };
        while let Some(next) = self.nodes[cursor.0 as usize].next_sibling {
            cursor = next;
        }
        self.nodes[cursor.0 as usize].next_sibling = Some(child);
    }

    /// Iterate `id`'s children in sibling order.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            ast: self,
            cursor: self.node(id).first_child,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub struct Children<'a> {
    ast: &'a Ast,
    cursor: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cursor?;
        self.cursor = self.ast.node(id).next_sibling;
        Some(id)
    }
}
