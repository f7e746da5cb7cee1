//! CIR — the Cinder control-flow IR.
//!
//! A function is a graph of basic blocks held in an index arena owned by
//! [`IrContext`]. A block is an append-only instruction list plus at most
//! one terminator; jump and branch edges are `BlockId`s into the arena, so
//! the graph has no ownership cycles. Once terminated a block is immutable.
//!
//! The builder in [`builder`] populates a context; a [`lower::Lowering`]
//! backend serializes it to assembly text.

pub mod builder;
pub mod lower;

use std::fmt;

use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::target::Reg;

// ─── Blocks ───────────────────────────────────────────────────────

/// Identifier of a basic block within an [`IrContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A basic block: straight-line instructions plus at most one terminator.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub insts: Vec<Inst>,
    pub term: Option<Terminator>,
}

// ─── Operands ─────────────────────────────────────────────────────

/// A value location: immediate, register, or memory, with a byte width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Imm(i64),
    Reg { reg: Reg, width: u32 },
    /// Frame-relative memory: `[fp + offset]`. Locals are negative,
    /// parameters positive.
    Frame { offset: i32, width: u32 },
    /// Register-relative memory: `[base + offset]`.
    Mem { base: Reg, offset: i32, width: u32 },
    /// Module-level storage named by its mangled label.
    Global { label: String, width: u32 },
}

impl Operand {
    pub fn is_mem(&self) -> bool {
        matches!(
            self,
            Operand::Frame { .. } | Operand::Mem { .. } | Operand::Global { .. }
        )
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(v) => write!(f, "${}", v),
            Operand::Reg { reg, width } => write!(f, "r{}:{}", reg.0, width),
            Operand::Frame { offset, width } => write!(f, "[fp{:+}]:{}", offset, width),
            Operand::Mem {
                base,
                offset,
                width,
            } => write!(f, "[r{}{:+}]:{}", base.0, offset, width),
            Operand::Global { label, width } => write!(f, "[{}]:{}", label, width),
        }
    }
}

// ─── Instructions ─────────────────────────────────────────────────

/// Two-operand ALU operation kinds: `dst = dst op src`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinKind {
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
}

impl fmt::Display for BinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinKind::Add => "add",
            BinKind::Sub => "sub",
            BinKind::Mul => "mul",
            BinKind::Div => "div",
            BinKind::Rem => "rem",
            BinKind::And => "and",
            BinKind::Or => "or",
            BinKind::Xor => "xor",
            BinKind::Shl => "shl",
            BinKind::Shr => "shr",
        };
        write!(f, "{}", s)
    }
}

/// Comparison condition codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    /// The condition that holds exactly when `self` does not.
    pub fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
        };
        write!(f, "{}", s)
    }
}

/// Straight-line CIR instructions.
#[derive(Clone, Debug)]
pub enum Inst {
    /// Function entry: output label plus the auto-storage reservation.
    Prologue { label: String, frame_bytes: u32 },
    /// `dst = src`. At most one side is memory.
    Move { dst: Operand, src: Operand },
    /// `dst = address of src` (src must be memory).
    Lea { dst: Operand, src: Operand },
    /// `dst = dst op src`.
    Bin {
        op: BinKind,
        dst: Operand,
        src: Operand,
    },
    /// `dst = -dst`.
    Neg { dst: Operand },
    /// `dst = (lhs cc rhs) ? 1 : 0`. `dst` must be a register.
    Cmp {
        cc: Cond,
        dst: Operand,
        lhs: Operand,
        rhs: Operand,
    },
    /// Push one word onto the machine stack.
    Push { src: Operand },
    /// Pop one word into a register.
    Pop { reg: Reg },
    /// Direct call to a mangled label.
    Call { label: String },
    /// Copy `bytes` bytes from `src` (memory) to the memory at `dst`.
    BlockCopy {
        dst: Reg,
        src: Operand,
        bytes: u32,
    },
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Prologue { label, frame_bytes } => {
                write!(f, "prologue {} frame={}", label, frame_bytes)
            }
            Inst::Move { dst, src } => write!(f, "mov {}, {}", dst, src),
            Inst::Lea { dst, src } => write!(f, "lea {}, {}", dst, src),
            Inst::Bin { op, dst, src } => write!(f, "{} {}, {}", op, dst, src),
            Inst::Neg { dst } => write!(f, "neg {}", dst),
            Inst::Cmp { cc, dst, lhs, rhs } => {
                write!(f, "set{} {}, {}, {}", cc, dst, lhs, rhs)
            }
            Inst::Push { src } => write!(f, "push {}", src),
            Inst::Pop { reg } => write!(f, "pop r{}", reg.0),
            Inst::Call { label } => write!(f, "call {}", label),
            Inst::BlockCopy { dst, src, bytes } => {
                write!(f, "copy [r{}], {}, {}", dst.0, src, bytes)
            }
        }
    }
}

// ─── Terminators ──────────────────────────────────────────────────

/// The single control-flow exit of a terminated block.
#[derive(Clone, Debug)]
pub enum Terminator {
    /// Unconditional jump.
    Jump(BlockId),
    /// Conditional branch: `if lhs cc rhs` go to `if_true`, else `if_false`.
    Branch {
        cc: Cond,
        lhs: Operand,
        rhs: Operand,
        if_true: BlockId,
        if_false: BlockId,
    },
    /// Function return sequence. Terminates exactly the epilogue block.
    Ret,
}

impl Terminator {
    /// Up to two successor blocks.
    pub fn successors(&self) -> [Option<BlockId>; 2] {
        match self {
            Terminator::Jump(target) => [Some(*target), None],
            Terminator::Branch {
                if_true, if_false, ..
            } => [Some(*if_true), Some(*if_false)],
            Terminator::Ret => [None, None],
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(target) => write!(f, "jmp {}", target),
            Terminator::Branch {
                cc,
                lhs,
                rhs,
                if_true,
                if_false,
            } => write!(f, "br{} {}, {} -> {}, {}", cc, lhs, rhs, if_true, if_false),
            Terminator::Ret => write!(f, "ret"),
        }
    }
}

// ─── Context ──────────────────────────────────────────────────────

/// One lowered function: its label and its blocks in creation order.
/// `entry` and `epilogue` are always the first two.
#[derive(Clone, Debug)]
pub struct FuncIr {
    pub label: String,
    pub entry: BlockId,
    pub epilogue: BlockId,
    pub blocks: Vec<BlockId>,
}

/// Module-level storage produced by a top-level declaration.
#[derive(Clone, Debug)]
pub struct GlobalData {
    pub label: String,
    pub size: u32,
    pub init: Option<i64>,
}

/// The IR of one translation unit: the block arena plus per-function and
/// per-global records. Created per compilation, populated by the builder,
/// consumed by the emitter.
#[derive(Default, Debug)]
pub struct IrContext {
    blocks: Vec<Block>,
    pub funcs: Vec<FuncIr>,
    pub globals: Vec<GlobalData>,
}

impl IrContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an open, empty block.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Append to an open block. Terminated blocks are immutable; appending
    /// to one is a broken builder contract, reported as an internal error.
    pub fn push(&mut self, id: BlockId, inst: Inst) -> Result<(), Diagnostic> {
        let block = &mut self.blocks[id.0 as usize];
        if block.term.is_some() {
            return Err(Diagnostic::ice(
                format!("append to terminated {}", id),
                Span::dummy(),
            ));
        }
        block.insts.push(inst);
        Ok(())
    }

    /// Install the single terminator of `id`. Rejects double termination.
    pub fn terminate(&mut self, id: BlockId, term: Terminator) -> Result<(), Diagnostic> {
        let block = &mut self.blocks[id.0 as usize];
        if block.term.is_some() {
            return Err(Diagnostic::ice(
                format!("double termination of {}", id),
                Span::dummy(),
            ));
        }
        block.term = Some(term);
        Ok(())
    }

    pub fn is_terminated(&self, id: BlockId) -> bool {
        self.blocks[id.0 as usize].term.is_some()
    }

    /// Up to two successors of `id`; empty for open blocks.
    pub fn successors(&self, id: BlockId) -> [Option<BlockId>; 2] {
        match &self.blocks[id.0 as usize].term {
            Some(term) => term.successors(),
            None => [None, None],
        }
    }

    /// Blocks reachable from `entry`, as a flag per arena slot.
    pub fn reachable_from(&self, entry: BlockId) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![entry];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0 as usize], true) {
                continue;
            }
            for succ in self.successors(id).into_iter().flatten() {
                stack.push(succ);
            }
        }
        seen
    }

    /// Stable text dump of one function, for tests and debugging.
    pub fn dump_fn(&self, func: &FuncIr) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            &mut out,
            "fn {} entry={} epilogue={}",
            func.label, func.entry, func.epilogue
        );
        for &id in &func.blocks {
            let block = self.block(id);
            let _ = writeln!(&mut out, "{}:", id);
            for inst in &block.insts {
                let _ = writeln!(&mut out, "  {}", inst);
            }
            match &block.term {
                Some(term) => {
                    let _ = writeln!(&mut out, "  {}", term);
                }
                None => {
                    let _ = writeln!(&mut out, "  (open)");
                }
            }
        }
        out
    }
}

// ─── Tests ────────────────────────────────────────────────────────
