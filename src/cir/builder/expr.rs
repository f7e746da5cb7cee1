//! Expression and declaration lowering.
//!
//! Three modes, per the statement core's contract:
//! - value: produce an operand holding the result
//! - void: side effects only
//! - branch: terminate the current block with a conditional branch
//!
//! Short-circuit operators split the current block in value mode, which is
//! why value and void take the block by mutable reference; the statement
//! lowerer keeps appending to whatever block the reference names afterward.

use crate::ast::{NodeId, Tag};
use crate::cir::{BinKind, BlockId, Cond, Inst, Operand, Terminator};
use crate::diagnostic::Diagnostic;
use crate::target::Reg;

use super::CirBuilder;

fn bin_of(tag: Tag) -> Option<BinKind> {
    match tag {
        Tag::Add => Some(BinKind::Add),
        Tag::Sub => Some(BinKind::Sub),
        Tag::Mul => Some(BinKind::Mul),
        Tag::Div => Some(BinKind::Div),
        Tag::Rem => Some(BinKind::Rem),
        Tag::And => Some(BinKind::And),
        Tag::Or => Some(BinKind::Or),
        Tag::Xor => Some(BinKind::Xor),
        Tag::Shl => Some(BinKind::Shl),
        Tag::Shr => Some(BinKind::Shr),
        _ => None,
    }
}

fn cond_of(tag: Tag) -> Option<Cond> {
    match tag {
        Tag::Eq => Some(Cond::Eq),
        Tag::Ne => Some(Cond::Ne),
        Tag::Lt => Some(Cond::Lt),
        Tag::Le => Some(Cond::Le),
        Tag::Gt => Some(Cond::Gt),
        Tag::Ge => Some(Cond::Ge),
        _ => None,
    }
}

impl CirBuilder<'_> {
    // ─── Value mode ───────────────────────────────────────────────

    /// Lower an expression for its value. May split `block`.
    pub(crate) fn build_value(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<Operand, Diagnostic> {
        let tag = self.ast.node(node).tag;

        if let Some(op) = bin_of(tag) {
            return self.build_binop(block, node, op);
        }
        if cond_of(tag).is_some() {
            return self.build_cmp_value(block, node);
        }

        match tag {
            Tag::Num => Ok(Operand::Imm(self.ast.node(node).value)),
            Tag::Name => self.operand_for_name(node),
            Tag::Assign => self.build_assign(block, node),
            Tag::Neg => {
                let operand = self.lhs_of(node)?;
                let width = self.operand_width(node);
                let value = self.build_value(block, operand)?;
                let reg = self.into_reg(block, value, width, node)?;
                let dst = Operand::Reg { reg, width };
                self.ir.push(*block, Inst::Neg { dst: dst.clone() })?;
                Ok(dst)
            }
            Tag::LogAnd | Tag::LogOr | Tag::LogNot => self.build_bool_value(block, node),
            Tag::Addr => {
                let place_node = self.lhs_of(node)?;
                let place = self.build_place(block, place_node)?;
                self.address_of(block, place, node)
            }
            Tag::Deref => {
                let ptr_node = self.lhs_of(node)?;
                let word = self.word();
                let ptr = self.build_value(block, ptr_node)?;
                let base = self.into_reg(block, ptr, word, node)?;
                Ok(Operand::Mem {
                    base,
                    offset: 0,
                    width: self.operand_width(node),
                })
            }
            Tag::Call => self.build_call(block, node),
            _ => Err(self.ice("non-value tag in expression position", node)),
        }
    }

    /// Lower an expression for its side effects only.
    pub(crate) fn build_void(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<(), Diagnostic> {
        let value = self.build_value(block, node)?;
        self.release_operand(&value);
        Ok(())
    }

    // ─── Branch mode ──────────────────────────────────────────────

    /// Lower a condition, terminating `block` (or a split successor) with
    /// a conditional branch to `if_true` / `if_false`.
    pub(crate) fn build_branch_on(
        &mut self,
        block: BlockId,
        node: NodeId,
        if_true: BlockId,
        if_false: BlockId,
    ) -> Result<(), Diagnostic> {
        let tag = self.ast.node(node).tag;
        match tag {
            Tag::LogAnd => {
                let lhs = self.lhs_of(node)?;
                let rhs = self.rhs_of(node)?;
                let mid = self.new_block();
                self.build_branch_on(block, lhs, mid, if_false)?;
                self.build_branch_on(mid, rhs, if_true, if_false)
            }
            Tag::LogOr => {
                let lhs = self.lhs_of(node)?;
                let rhs = self.rhs_of(node)?;
                let mid = self.new_block();
                self.build_branch_on(block, lhs, if_true, mid)?;
                self.build_branch_on(mid, rhs, if_true, if_false)
            }
            Tag::LogNot => {
                let lhs = self.lhs_of(node)?;
                self.build_branch_on(block, lhs, if_false, if_true)
            }
            _ => {
                if let Some(cc) = cond_of(tag) {
                    let lhs_node = self.lhs_of(node)?;
                    let rhs_node = self.rhs_of(node)?;
                    let mut block = block;
                    let lhs = self.build_value(&mut block, lhs_node)?;
                    let rhs = self.build_value(&mut block, rhs_node)?;
                    self.ir.terminate(
                        block,
                        Terminator::Branch {
                            cc,
                            lhs: lhs.clone(),
                            rhs: rhs.clone(),
                            if_true,
                            if_false,
                        },
                    )?;
                    self.release_operand(&lhs);
                    self.release_operand(&rhs);
                } else {
                    // Any other value: branch on "nonzero".
                    let mut block = block;
                    let value = self.build_value(&mut block, node)?;
                    self.ir.terminate(
                        block,
                        Terminator::Branch {
                            cc: Cond::Ne,
                            lhs: value.clone(),
                            rhs: Operand::Imm(0),
                            if_true,
                            if_false,
                        },
                    )?;
                    self.release_operand(&value);
                }
                Ok(())
            }
        }
    }

    // ─── Declarations ─────────────────────────────────────────────

    /// Lower a local declaration: store the initializer, if any, into the
    /// symbol's frame slot. May split `block`.
    pub(crate) fn build_decl(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<(), Diagnostic> {
        let sym_id = self
            .ast
            .node(node)
            .sym
            .ok_or_else(|| self.ice("declaration without a symbol", node))?;
        let init = match self.ast.node(node).first_child {
            None => return Ok(()),
            Some(init) => init,
        };

        let width = self.width_or_word(self.syms.sym(sym_id).dt.size(self.target));
        let dst = Operand::Frame {
            offset: self.syms.sym(sym_id).offset,
            width,
        };
        let src = self.build_value(block, init)?;
        self.store(block, &dst, &src, node)?;
        self.release_operand(&src);
        Ok(())
    }

    // ─── Operator helpers ─────────────────────────────────────────

    fn build_binop(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
        op: BinKind,
    ) -> Result<Operand, Diagnostic> {
        let lhs_node = self.lhs_of(node)?;
        let rhs_node = self.rhs_of(node)?;
        let width = self.operand_width(node);

        let lhs = self.build_value(block, lhs_node)?;
        let reg = self.into_reg(block, lhs, width, node)?;
        let dst = Operand::Reg { reg, width };
        let rhs = self.build_value(block, rhs_node)?;
        self.ir.push(
            *block,
            Inst::Bin {
                op,
                dst: dst.clone(),
                src: rhs.clone(),
            },
        )?;
        self.release_operand(&rhs);
        Ok(dst)
    }

    /// A comparison in value position materializes 0/1 in a register.
    fn build_cmp_value(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<Operand, Diagnostic> {
        let tag = self.ast.node(node).tag;
        let cc = match cond_of(tag) {
            Some(cc) => cc,
            None => return Err(self.ice("non-comparison tag in comparison lowering", node)),
        };
        let lhs_node = self.lhs_of(node)?;
        let rhs_node = self.rhs_of(node)?;

        let lhs = self.build_value(block, lhs_node)?;
        let rhs = self.build_value(block, rhs_node)?;
        let reg = self.alloc_reg(node)?;
        let dst = Operand::Reg {
            reg,
            width: self.word(),
        };
        self.ir.push(
            *block,
            Inst::Cmp {
                cc,
                dst: dst.clone(),
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
        )?;
        self.release_operand(&lhs);
        self.release_operand(&rhs);
        Ok(dst)
    }

    /// A short-circuit operator in value position lowers through branch
    /// mode and rejoins, materializing 0/1. This splits the current block.
    fn build_bool_value(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<Operand, Diagnostic> {
        let reg = self.alloc_reg(node)?;
        let dst = Operand::Reg {
            reg,
            width: self.word(),
        };

        let if_true = self.new_block();
        let if_false = self.new_block();
        let join = self.new_block();

        self.build_branch_on(*block, node, if_true, if_false)?;
        self.ir.push(
            if_true,
            Inst::Move {
                dst: dst.clone(),
                src: Operand::Imm(1),
            },
        )?;
        self.ir.terminate(if_true, Terminator::Jump(join))?;
        self.ir.push(
            if_false,
            Inst::Move {
                dst: dst.clone(),
                src: Operand::Imm(0),
            },
        )?;
        self.ir.terminate(if_false, Terminator::Jump(join))?;

        *block = join;
        Ok(dst)
    }

    fn build_assign(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<Operand, Diagnostic> {
        let place_node = self.lhs_of(node)?;
        let value_node = self.rhs_of(node)?;
        let dst = self.build_place(block, place_node)?;
        let src = self.build_value(block, value_node)?;
        self.store(block, &dst, &src, node)?;
        self.release_operand(&src);
        Ok(dst)
    }

    // ─── Calls ────────────────────────────────────────────────────

    /// Stack-convention call: the caller saves its live scratch registers,
    /// pushes arguments right-to-left, calls, drops the argument slots,
    /// captures the return register, and restores.
    fn build_call(&mut self, block: &mut BlockId, node: NodeId) -> Result<Operand, Diagnostic> {
        let callee = self.lhs_of(node)?;
        let callee_sym = self
            .ast
            .node(callee)
            .sym
            .ok_or_else(|| self.ice("call of an unresolved name", node))?;
        let label = self.sym_label(callee_sym);
        let ret = self
            .syms
            .sym(callee_sym)
            .dt
            .return_type()
            .cloned()
            .ok_or_else(|| self.ice("call of a non-function", node))?;
        let word = self.word();

        let live = self.regs.in_use();
        for reg in &live {
            self.ir.push(
                *block,
                Inst::Push {
                    src: Operand::Reg {
                        reg: *reg,
                        width: word,
                    },
                },
            )?;
        }

        let args: Vec<NodeId> = self.ast.children(node).collect();
        let arg_bytes = (args.len() as u32) * word;
        for &arg in args.iter().rev() {
            let value = self.build_value(block, arg)?;
            self.ir.push(*block, Inst::Push { src: value.clone() })?;
            self.release_operand(&value);
        }

        self.ir.push(*block, Inst::Call { label })?;
        if arg_bytes > 0 {
            self.ir.push(
                *block,
                Inst::Bin {
                    op: BinKind::Add,
                    dst: Operand::Reg {
                        reg: self.target.stack_reg,
                        width: word,
                    },
                    src: Operand::Imm(arg_bytes as i64),
                },
            )?;
        }

        let ret_size = ret.size(self.target);
        let result = if ret_size == 0 {
            Operand::Imm(0)
        } else {
            // Pointer-sized for large aggregates: the callee hands back the
            // hidden destination pointer.
            let width = ret_size.min(word);
            let ret_reg = self.target.ret_reg;
            let holder = if self.regs.request(ret_reg) {
                ret_reg
            } else {
                let reg = self.alloc_reg(node)?;
                self.ir.push(
                    *block,
                    Inst::Move {
                        dst: Operand::Reg { reg, width },
                        src: Operand::Reg {
                            reg: ret_reg,
                            width,
                        },
                    },
                )?;
                reg
            };
            if ret_size > word {
                Operand::Mem {
                    base: holder,
                    offset: 0,
                    width: ret_size,
                }
            } else {
                Operand::Reg {
                    reg: holder,
                    width,
                }
            }
        };

        for reg in live.iter().rev() {
            self.ir.push(*block, Inst::Pop { reg: *reg })?;
        }
        Ok(result)
    }

    // ─── Places and moves ─────────────────────────────────────────

    /// Lower an expression in place (lvalue) position to a memory operand.
    fn build_place(&mut self, block: &mut BlockId, node: NodeId) -> Result<Operand, Diagnostic> {
        match self.ast.node(node).tag {
            Tag::Name => self.operand_for_name(node),
            Tag::Deref => {
                let ptr_node = self.lhs_of(node)?;
                let word = self.word();
                let ptr = self.build_value(block, ptr_node)?;
                let base = self.into_reg(block, ptr, word, node)?;
                Ok(Operand::Mem {
                    base,
                    offset: 0,
                    width: self.operand_width(node),
                })
            }
            _ => Err(self.ice("assignment to a non-place expression", node)),
        }
    }

    fn operand_for_name(&mut self, node: NodeId) -> Result<Operand, Diagnostic> {
        let sym_id = self
            .ast
            .node(node)
            .sym
            .ok_or_else(|| self.ice("unresolved name", node))?;
        let width = self.width_or_word(self.syms.sym(sym_id).dt.size(self.target));
        if self.syms.sym(sym_id).label.is_some() {
            let label = self.sym_label(sym_id);
            return Ok(Operand::Global { label, width });
        }
        Ok(Operand::Frame {
            offset: self.syms.sym(sym_id).offset,
            width,
        })
    }

    /// Take the address of a place operand into a register.
    fn address_of(
        &mut self,
        block: &mut BlockId,
        place: Operand,
        node: NodeId,
    ) -> Result<Operand, Diagnostic> {
        let word = self.word();
        // The address of a pointer dereference is the pointer itself.
        if let Operand::Mem { base, offset: 0, .. } = place {
            return Ok(Operand::Reg {
                reg: base,
                width: word,
            });
        }
        let reg = self.alloc_reg(node)?;
        let dst = Operand::Reg { reg, width: word };
        self.ir.push(
            *block,
            Inst::Lea {
                dst: dst.clone(),
                src: place,
            },
        )?;
        Ok(dst)
    }

    /// Emit `dst = src`, routing memory-to-memory moves through a scratch
    /// register and aggregates through a block copy.
    fn store(
        &mut self,
        block: &mut BlockId,
        dst: &Operand,
        src: &Operand,
        node: NodeId,
    ) -> Result<(), Diagnostic> {
        let word = self.word();
        let width = match dst {
            Operand::Reg { width, .. }
            | Operand::Frame { width, .. }
            | Operand::Mem { width, .. }
            | Operand::Global { width, .. } => *width,
            Operand::Imm(_) => return Err(self.ice("store to an immediate", node)),
        };

        if width > word {
            let reg = self.alloc_reg(node)?;
            self.ir.push(
                *block,
                Inst::Lea {
                    dst: Operand::Reg { reg, width: word },
                    src: dst.clone(),
                },
            )?;
            self.ir.push(
                *block,
                Inst::BlockCopy {
                    dst: reg,
                    src: src.clone(),
                    bytes: width,
                },
            )?;
            self.regs.release(reg);
            return Ok(());
        }

        if dst.is_mem() && src.is_mem() {
            let reg = self.alloc_reg(node)?;
            let tmp = Operand::Reg { reg, width };
            self.ir.push(
                *block,
                Inst::Move {
                    dst: tmp.clone(),
                    src: src.clone(),
                },
            )?;
            self.ir.push(
                *block,
                Inst::Move {
                    dst: dst.clone(),
                    src: tmp,
                },
            )?;
            self.regs.release(reg);
            return Ok(());
        }

        self.ir.push(
            *block,
            Inst::Move {
                dst: dst.clone(),
                src: src.clone(),
            },
        )?;
        Ok(())
    }

    /// Materialize a value into a scratch register at `width`, reusing the
    /// register it may already occupy.
    fn into_reg(
        &mut self,
        block: &mut BlockId,
        value: Operand,
        width: u32,
        node: NodeId,
    ) -> Result<Reg, Diagnostic> {
        if let Operand::Reg { reg, .. } = value {
            return Ok(reg);
        }
        let reg = self.alloc_reg(node)?;
        self.ir.push(
            *block,
            Inst::Move {
                dst: Operand::Reg { reg, width },
                src: value.clone(),
            },
        )?;
        self.release_operand(&value);
        Ok(reg)
    }

    fn alloc_reg(&mut self, node: NodeId) -> Result<Reg, Diagnostic> {
        self.regs
            .alloc()
            .ok_or_else(|| self.ice("out of scratch registers", node))
    }

    // ─── Small accessors ──────────────────────────────────────────

    fn lhs_of(&self, node: NodeId) -> Result<NodeId, Diagnostic> {
        self.ast
            .node(node)
            .lhs
            .ok_or_else(|| self.ice("missing left operand", node))
    }

    fn rhs_of(&self, node: NodeId) -> Result<NodeId, Diagnostic> {
        self.ast
            .node(node)
            .rhs
            .ok_or_else(|| self.ice("missing right operand", node))
    }

    /// Width of a node's value, defaulting untyped nodes to one word.
    fn operand_width(&self, node: NodeId) -> u32 {
        self.width_or_word(self.ast.node(node).dt.size(self.target))
    }

    fn width_or_word(&self, width: u32) -> u32 {
        if width == 0 {
            self.word()
        } else {
            width
        }
    }
}
