//! x86-64 lowering: AT&T-syntax assembly text from CIR.
//!
//! Instruction selection is direct: one CIR instruction becomes a short
//! fixed sequence. `%r11` is the emitter's scratch register; the builder's
//! allocator never hands it out, so sequences here may clobber it freely.
//!
//! Unreachable blocks are dropped. The builder intentionally leaves open,
//! predecessor-free blocks behind `return`/`break`/`continue`; they never
//! reach the output.

use super::Lowering;
use crate::cir::{
    BinKind, Block, BlockId, Cond, FuncIr, GlobalData, Inst, IrContext, Operand, Terminator,
};
use crate::target::Reg;

const REG64: [&str; 12] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11",
];
const REG32: [&str; 12] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
];
const REG16: [&str; 12] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w",
];
const REG8: [&str; 12] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b",
];

const RAX: Reg = Reg(0);
const RCX: Reg = Reg(1);
const RDX: Reg = Reg(2);
const R11: Reg = Reg(11);

fn reg(r: Reg, width: u32) -> String {
    let table = match width {
        1 => &REG8,
        2 => &REG16,
        4 => &REG32,
        _ => &REG64,
    };
    format!("%{}", table[r.0 as usize])
}

fn suffix(width: u32) -> &'static str {
    match width {
        1 => "b",
        2 => "w",
        4 => "l",
        _ => "q",
    }
}

fn jcc(cc: Cond) -> &'static str {
    match cc {
        Cond::Eq => "je",
        Cond::Ne => "jne",
        Cond::Lt => "jl",
        Cond::Le => "jle",
        Cond::Gt => "jg",
        Cond::Ge => "jge",
    }
}

fn setcc(cc: Cond) -> &'static str {
    match cc {
        Cond::Eq => "sete",
        Cond::Ne => "setne",
        Cond::Lt => "setl",
        Cond::Le => "setle",
        Cond::Gt => "setg",
        Cond::Ge => "setge",
    }
}

fn fits_i32(v: i64) -> bool {
    v >= i32::MIN as i64 && v <= i32::MAX as i64
}

/// Format an operand at its own width, with `extra` added to any memory
/// displacement (used by the unrolled block copy).
fn operand_at(op: &Operand, width: u32, extra: i32) -> String {
    match op {
        Operand::Imm(v) => format!("${}", v),
        Operand::Reg { reg: r, .. } => reg(*r, width),
        Operand::Frame { offset, .. } => format!("{}(%rbp)", offset + extra),
        Operand::Mem { base, offset, .. } => format!("{}({})", offset + extra, reg(*base, 8)),
        Operand::Global { label, .. } => {
            if extra == 0 {
                format!("{}(%rip)", label)
            } else {
                format!("{}+{}(%rip)", label, extra)
            }
        }
    }
}

fn operand(op: &Operand) -> String {
    operand_at(op, width_of(op), 0)
}

fn width_of(op: &Operand) -> u32 {
    match op {
        Operand::Imm(_) => 8,
        Operand::Reg { width, .. }
        | Operand::Frame { width, .. }
        | Operand::Mem { width, .. }
        | Operand::Global { width, .. } => *width,
    }
}

fn block_label(id: BlockId) -> String {
    format!(".L{}", id.0)
}

pub struct X86_64Lowering;

impl Default for X86_64Lowering {
    fn default() -> Self {
        Self::new()
    }
}

impl X86_64Lowering {
    pub fn new() -> Self {
        Self
    }

    fn lower_fn(&self, ir: &IrContext, func: &FuncIr, out: &mut Vec<String>) {
        let reachable = ir.reachable_from(func.entry);
        let emitted: Vec<BlockId> = func
            .blocks
            .iter()
            .copied()
            .filter(|id| reachable[id.0 as usize])
            .collect();

        for (i, &id) in emitted.iter().enumerate() {
            let block = ir.block(id);
            if id != func.entry {
                out.push(format!("{}:", block_label(id)));
            }
            for inst in &block.insts {
                self.lower_inst(inst, out);
            }
            let next = emitted.get(i + 1).copied();
            self.lower_term(block, id, next, out);
        }
    }

    fn lower_inst(&self, inst: &Inst, out: &mut Vec<String>) {
        match inst {
            Inst::Prologue { label, frame_bytes } => {
                out.push(format!(".globl {}", label));
                out.push(format!("{}:", label));
                out.push("    pushq %rbp".to_string());
                out.push("    movq %rsp, %rbp".to_string());
                if *frame_bytes > 0 {
                    out.push(format!("    subq ${}, %rsp", frame_bytes));
                }
            }

            Inst::Move { dst, src } => self.emit_move(dst, src, out),

            Inst::Lea { dst, src } => {
                out.push(format!("    leaq {}, {}", operand_at(src, 8, 0), operand(dst)));
            }

            Inst::Bin { op, dst, src } => self.emit_bin(*op, dst, src, out),

            Inst::Neg { dst } => {
                out.push(format!("    neg{} {}", suffix(width_of(dst)), operand(dst)));
            }

            Inst::Cmp { cc, dst, lhs, rhs } => {
                self.emit_cmp(lhs, rhs, out);
                let r = match dst {
                    Operand::Reg { reg: r, .. } => *r,
                    // The builder only materializes comparisons in registers.
                    _ => R11,
                };
                out.push(format!("    {} {}", setcc(*cc), reg(r, 1)));
                out.push(format!("    movzbq {}, {}", reg(r, 1), reg(r, 8)));
            }

            Inst::Push { src } => match src {
                Operand::Imm(v) if !fits_i32(*v) => {
                    out.push(format!("    movabsq ${}, {}", v, reg(R11, 8)));
                    out.push(format!("    pushq {}", reg(R11, 8)));
                }
                _ => out.push(format!("    pushq {}", operand_at(src, 8, 0))),
            },

            Inst::Pop { reg: r } => {
                out.push(format!("    popq {}", reg(*r, 8)));
            }

            Inst::Call { label } => {
                out.push(format!("    call {}", label));
            }

            Inst::BlockCopy { dst, src, bytes } => {
                // Unrolled word-at-a-time copy through %r11; leaves the
                // destination pointer intact.
                let mut off: i32 = 0;
                let mut remaining = *bytes;
                while remaining > 0 {
                    let chunk = match remaining {
                        n if n >= 8 => 8,
                        n if n >= 4 => 4,
                        n if n >= 2 => 2,
                        _ => 1,
                    };
                    let s = suffix(chunk);
                    out.push(format!(
                        "    mov{} {}, {}",
                        s,
                        operand_at(src, chunk, off),
                        reg(R11, chunk)
                    ));
                    out.push(format!(
                        "    mov{} {}, {}({})",
                        s,
                        reg(R11, chunk),
                        off,
                        reg(*dst, 8)
                    ));
                    off += chunk as i32;
                    remaining -= chunk;
                }
            }
        }
    }

    fn lower_term(&self, block: &Block, id: BlockId, next: Option<BlockId>, out: &mut Vec<String>) {
        match &block.term {
            Some(Terminator::Jump(target)) => {
                if next != Some(*target) {
                    out.push(format!("    jmp {}", block_label(*target)));
                }
            }
            Some(Terminator::Branch {
                cc,
                lhs,
                rhs,
                if_true,
                if_false,
            }) => {
                self.emit_cmp(lhs, rhs, out);
                if next == Some(*if_false) {
                    out.push(format!("    {} {}", jcc(*cc), block_label(*if_true)));
                } else if next == Some(*if_true) {
                    out.push(format!("    {} {}", jcc(cc.invert()), block_label(*if_false)));
                } else {
                    out.push(format!("    {} {}", jcc(*cc), block_label(*if_true)));
                    out.push(format!("    jmp {}", block_label(*if_false)));
                }
            }
            Some(Terminator::Ret) => {
                out.push("    leave".to_string());
                out.push("    ret".to_string());
            }
            None => {
                debug_assert!(false, "reachable open block {} at emission", id);
            }
        }
    }

    /// `cmp` so that a following `jcc`/`setcc` tests `lhs cc rhs`.
    fn emit_cmp(&self, lhs: &Operand, rhs: &Operand, out: &mut Vec<String>) {
        let width = if matches!(lhs, Operand::Imm(_)) {
            width_of(rhs)
        } else {
            width_of(lhs)
        };
        let s = suffix(width);
        if matches!(lhs, Operand::Imm(_)) || (lhs.is_mem() && rhs.is_mem()) {
            out.push(format!(
                "    mov{} {}, {}",
                s,
                operand_at(lhs, width, 0),
                reg(R11, width)
            ));
            out.push(format!(
                "    cmp{} {}, {}",
                s,
                operand_at(rhs, width, 0),
                reg(R11, width)
            ));
        } else {
            out.push(format!(
                "    cmp{} {}, {}",
                s,
                operand_at(rhs, width, 0),
                operand_at(lhs, width, 0)
            ));
        }
    }

    fn emit_move(&self, dst: &Operand, src: &Operand, out: &mut Vec<String>) {
        let width = width_of(dst);
        let s = suffix(width);
        match src {
            Operand::Imm(v) if !fits_i32(*v) => {
                out.push(format!("    movabsq ${}, {}", v, reg(R11, 8)));
                out.push(format!("    mov{} {}, {}", s, reg(R11, width), operand(dst)));
            }
            _ => {
                out.push(format!(
                    "    mov{} {}, {}",
                    s,
                    operand_at(src, width, 0),
                    operand(dst)
                ));
            }
        }
    }

    fn emit_bin(&self, op: BinKind, dst: &Operand, src: &Operand, out: &mut Vec<String>) {
        let width = width_of(dst);
        let s = suffix(width);
        match op {
            BinKind::Add | BinKind::Sub | BinKind::And | BinKind::Or | BinKind::Xor => {
                let mn = match op {
                    BinKind::Add => "add",
                    BinKind::Sub => "sub",
                    BinKind::And => "and",
                    BinKind::Or => "or",
                    _ => "xor",
                };
                out.push(format!(
                    "    {}{} {}, {}",
                    mn,
                    s,
                    operand_at(src, width, 0),
                    operand(dst)
                ));
            }

            BinKind::Mul => match src {
                Operand::Imm(v) => {
                    out.push(format!("    imul{} ${}, {}, {}", s, v, operand(dst), operand(dst)));
                }
                _ => {
                    out.push(format!(
                        "    imul{} {}, {}",
                        s,
                        operand_at(src, width, 0),
                        operand(dst)
                    ));
                }
            },

            BinKind::Div | BinKind::Rem => self.emit_divmod(op, dst, src, out),

            BinKind::Shl | BinKind::Shr => self.emit_shift(op, dst, src, out),
        }
    }

    /// Signed divide through the fixed rax/rdx pair, preserving whichever
    /// of the two the destination does not occupy.
    fn emit_divmod(&self, op: BinKind, dst: &Operand, src: &Operand, out: &mut Vec<String>) {
        let dst_reg = match dst {
            Operand::Reg { reg: r, .. } => Some(*r),
            _ => None,
        };
        let save_rax = dst_reg != Some(RAX);
        let save_rdx = dst_reg != Some(RDX);

        if save_rax {
            out.push(format!("    pushq {}", reg(RAX, 8)));
        }
        if save_rdx {
            out.push(format!("    pushq {}", reg(RDX, 8)));
        }
        out.push(format!("    movq {}, {}", operand_at(src, 8, 0), reg(R11, 8)));
        out.push(format!("    movq {}, {}", operand_at(dst, 8, 0), reg(RAX, 8)));
        out.push("    cqto".to_string());
        out.push(format!("    idivq {}", reg(R11, 8)));
        let result = if op == BinKind::Div { RAX } else { RDX };
        out.push(format!("    movq {}, {}", reg(result, 8), operand_at(dst, 8, 0)));
        if save_rdx {
            out.push(format!("    popq {}", reg(RDX, 8)));
        }
        if save_rax {
            out.push(format!("    popq {}", reg(RAX, 8)));
        }
    }

    /// Shifts with a variable count go through %cl.
    fn emit_shift(&self, op: BinKind, dst: &Operand, src: &Operand, out: &mut Vec<String>) {
        let width = width_of(dst);
        let s = suffix(width);
        let mn = if op == BinKind::Shl { "sal" } else { "sar" };

        if let Operand::Imm(v) = src {
            out.push(format!("    {}{} ${}, {}", mn, s, v, operand(dst)));
            return;
        }

        let dst_is_rcx = matches!(dst, Operand::Reg { reg: r, .. } if *r == RCX);
        if dst_is_rcx {
            out.push(format!("    movq {}, {}", reg(RCX, 8), reg(R11, 8)));
            out.push(format!("    movq {}, {}", operand_at(src, 8, 0), reg(RCX, 8)));
            out.push(format!("    {}q %cl, {}", mn, reg(R11, 8)));
            out.push(format!("    movq {}, {}", reg(R11, 8), reg(RCX, 8)));
        } else {
            out.push(format!("    pushq {}", reg(RCX, 8)));
            out.push(format!("    movq {}, {}", operand_at(src, 8, 0), reg(RCX, 8)));
            out.push(format!("    {}{} %cl, {}", mn, s, operand(dst)));
            out.push(format!("    popq {}", reg(RCX, 8)));
        }
    }

    fn lower_global(&self, global: &GlobalData, out: &mut Vec<String>) {
        out.push(format!(".globl {}", global.label));
        out.push(format!("{}:", global.label));
        match global.init {
            Some(value) => {
                let directive = match global.size {
                    1 => ".byte",
                    2 => ".value",
                    4 => ".long",
                    8 => ".quad",
                    _ => {
                        out.push(format!("    .zero {}", global.size));
                        return;
                    }
                };
                out.push(format!("    {} {}", directive, value));
            }
            None => {
                out.push(format!("    .zero {}", global.size));
            }
        }
    }
}

impl Lowering for X86_64Lowering {
    fn target_name(&self) -> &str {
        "x86_64"
    }

    fn lower(&self, ir: &IrContext) -> Vec<String> {
        let mut out = vec![".text".to_string()];
        for func in &ir.funcs {
            self.lower_fn(ir, func, &mut out);
            out.push(String::new());
        }
        if !ir.globals.is_empty() {
            out.push(".data".to_string());
            for global in &ir.globals {
                self.lower_global(global, &mut out);
            }
        }
        out
    }
}
