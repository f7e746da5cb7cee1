//! CirBuilder: lowers a type-checked AST into a CFG of basic blocks.
//!
//! The walk is one-pass and top-down; every statement lowering returns the
//! continuation block its next sibling must append to. The builder owns the
//! [`IrContext`] while lowering runs and hands it over when the module is
//! done.
//!
//! Layout of the impl:
//! - this file: the module and function drivers, the flow context, and
//!   small shared helpers
//! - `stmt.rs`: statement and control-flow lowering
//! - `expr.rs`: the expression and declaration sub-lowerer
//! - `layout.rs`: frame storage planning

mod expr;
mod layout;
mod stmt;
#[cfg(test)]
mod tests;

use crate::ast::{Ast, NodeId, Tag};
use crate::cir::{BlockId, FuncIr, GlobalData, Inst, IrContext, Operand, Terminator};
use crate::diagnostic::Diagnostic;
use crate::regalloc::RegisterFile;
use crate::sym::{SymId, SymTable, SymTag};
use crate::target::TargetConfig;
use crate::types::DataType;

use self::layout::place_locals;

// ─── CirBuilder ───────────────────────────────────────────────────

/// Builds CFG IR from a type-checked AST.
pub struct CirBuilder<'a> {
    pub(crate) ast: &'a Ast,
    pub(crate) syms: &'a mut SymTable,
    pub(crate) target: &'a TargetConfig,
    pub(crate) ir: IrContext,
    pub(crate) regs: RegisterFile,

    // Flow context. Each slot is installed by the construct that owns the
    // target block and restored on exit, mirroring lexical nesting.
    /// The epilogue block of the function being lowered.
    pub(crate) return_to: Option<BlockId>,
    /// Exit block of the innermost enclosing loop.
    pub(crate) break_to: Option<BlockId>,
    /// Re-test block of the innermost enclosing loop.
    pub(crate) continue_to: Option<BlockId>,

    /// Return type of the function being lowered.
    pub(crate) cur_ret: Option<DataType>,
    /// Index into `ir.funcs` of the function being lowered.
    cur_fn: Option<usize>,
}

impl<'a> CirBuilder<'a> {
    pub fn new(ast: &'a Ast, syms: &'a mut SymTable, target: &'a TargetConfig) -> Self {
        Self {
            ast,
            syms,
            target,
            ir: IrContext::new(),
            regs: RegisterFile::new(target),
            return_to: None,
            break_to: None,
            continue_to: None,
            cur_ret: None,
            cur_fn: None,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // ── Top-level entry: build_module ─────────────────────────────
    // ═══════════════════════════════════════════════════════════════

    /// Lower a resolved module and every module it re-exports.
    pub fn build_module(mut self, root: NodeId) -> Result<IrContext, Diagnostic> {
        self.build_items(root)?;
        Ok(self.ir)
    }

    fn build_items(&mut self, module: NodeId) -> Result<(), Diagnostic> {
        let items: Vec<NodeId> = self.ast.children(module).collect();
        for item in items {
            match self.ast.node(item).tag {
                // A re-export carries its referent module at `rhs` once the
                // name resolver has run; cycles are the resolver's problem.
                Tag::Using => {
                    if let Some(referent) = self.ast.node(item).rhs {
                        self.build_items(referent)?;
                    }
                }
                Tag::FnImpl => self.build_fn(item)?,
                Tag::Decl => self.build_global(item)?,
                Tag::Empty => {}
                tag => {
                    return Err(Diagnostic::error(
                        format!("unhandled AST tag {:?} at module position", tag),
                        self.ast.node(item).span,
                    ));
                }
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // ── Function lowering ─────────────────────────────────────────
    // ═══════════════════════════════════════════════════════════════

    fn build_fn(&mut self, node: NodeId) -> Result<(), Diagnostic> {
        let sym_id = self
            .ast
            .node(node)
            .sym
            .ok_or_else(|| self.ice("function without a symbol", node))?;
        let label = self.sym_label(sym_id);

        let ret = self
            .syms
            .sym(sym_id)
            .dt
            .return_type()
            .cloned()
            .ok_or_else(|| self.ice("function symbol lacks a function type", node))?;

        // Parameters sit above the return address and the saved frame
        // pointer; a large return value adds the hidden destination
        // pointer slot before the first parameter.
        let word = self.target.word_size as i32;
        let mut last_offset = 2 * word;
        if ret.size(self.target) > self.target.word_size {
            last_offset += word;
        }
        let children = self.syms.sym(sym_id).children.clone();
        for child in children {
            if self.syms.sym(child).tag != SymTag::Param {
                break;
            }
            let size = self.syms.sym(child).dt.size(self.target) as i32;
            self.syms.sym_mut(child).offset = last_offset;
            last_offset += size;
        }

        let min_offset = place_locals(self.target, self.syms, sym_id, 0);
        let frame_bytes = (-min_offset) as u32;

        let entry = self.ir.create_block();
        let epilogue = self.ir.create_block();
        self.ir.funcs.push(FuncIr {
            label: label.clone(),
            entry,
            epilogue,
            blocks: vec![entry, epilogue],
        });
        self.cur_fn = Some(self.ir.funcs.len() - 1);
        self.return_to = Some(epilogue);
        self.cur_ret = Some(ret);

        self.ir.push(entry, Inst::Prologue { label, frame_bytes })?;

        let body = self
            .ast
            .node(node)
            .rhs
            .ok_or_else(|| self.ice("function without a body", node))?;
        self.build_code(entry, body, epilogue)?;

        self.ir.terminate(epilogue, Terminator::Ret)?;

        self.return_to = None;
        self.cur_ret = None;
        self.cur_fn = None;
        Ok(())
    }

    fn build_global(&mut self, node: NodeId) -> Result<(), Diagnostic> {
        let sym_id = self
            .ast
            .node(node)
            .sym
            .ok_or_else(|| self.ice("declaration without a symbol", node))?;
        let label = self.sym_label(sym_id);
        let size = self.syms.sym(sym_id).dt.size(self.target);

        let init = match self.ast.node(node).first_child {
            None => None,
            Some(child) if self.ast.node(child).tag == Tag::Num => {
                Some(self.ast.node(child).value)
            }
            Some(child) => {
                return Err(self.ice("non-constant initializer on module-level storage", child));
            }
        };

        self.ir.globals.push(GlobalData { label, size, init });
        Ok(())
    }

    // ─── Shared helpers ───────────────────────────────────────────

    /// Create an open block registered with the function being lowered.
    pub(crate) fn new_block(&mut self) -> BlockId {
        let id = self.ir.create_block();
        if let Some(f) = self.cur_fn {
            self.ir.funcs[f].blocks.push(id);
        }
        id
    }

    /// The symbol's output label, mangling it on first use.
    pub(crate) fn sym_label(&mut self, id: SymId) -> String {
        if let Some(label) = &self.syms.sym(id).label {
            return label.clone();
        }
        let mangled = self.target.mangle(&self.syms.sym(id).name);
        self.syms.sym_mut(id).label = Some(mangled.clone());
        mangled
    }

    pub(crate) fn word(&self) -> u32 {
        self.target.word_size
    }

    /// Release any register an operand holds.
    pub(crate) fn release_operand(&mut self, op: &Operand) {
        match op {
            Operand::Reg { reg, .. } => self.regs.release(*reg),
            Operand::Mem { base, .. } => self.regs.release(*base),
            _ => {}
        }
    }

    pub(crate) fn ice(&self, message: &str, node: NodeId) -> Diagnostic {
        Diagnostic::ice(message, self.ast.node(node).span)
    }
}
