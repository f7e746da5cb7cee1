//! Statement and control-flow lowering.
//!
//! `build_stmt` is the dispatch heart of the builder: it appends any
//! straight-line code to its input block, creates whatever blocks and edges
//! the construct needs, and returns the single open block the next sibling
//! statement must append to. After the call the input block may already be
//! terminated; callers must thread only the returned continuation.

use crate::ast::{NodeId, Tag};
use crate::cir::{BlockId, Inst, Operand, Terminator};
use crate::diagnostic::Diagnostic;

use super::CirBuilder;

impl CirBuilder<'_> {
    /// Lower one statement into `block`; returns the continuation block.
    pub(crate) fn build_stmt(
        &mut self,
        block: BlockId,
        node: NodeId,
    ) -> Result<BlockId, Diagnostic> {
        let tag = self.ast.node(node).tag;
        match tag {
            Tag::Branch => self.build_branch(block, node),
            Tag::Loop => self.build_loop(block, node),
            Tag::Iter => self.build_iter(block, node),

            Tag::Code => {
                let cont = self.new_block();
                self.build_code(block, node, cont)?;
                Ok(cont)
            }

            // Jumps out of the structured flow. Each returns a fresh empty
            // block so syntactically-dead trailing code still has a
            // well-formed place to lower into; the emitter drops the block
            // if nothing ever reaches it.
            Tag::Return => {
                self.build_return(block, node)?;
                Ok(self.new_block())
            }
            Tag::Break => {
                let target = self
                    .break_to
                    .ok_or_else(|| self.ice("break with no enclosing loop", node))?;
                self.ir.terminate(block, Terminator::Jump(target))?;
                Ok(self.new_block())
            }
            Tag::Continue => {
                let target = self
                    .continue_to
                    .ok_or_else(|| self.ice("continue with no enclosing loop", node))?;
                self.ir.terminate(block, Terminator::Jump(target))?;
                Ok(self.new_block())
            }

            Tag::Decl => {
                let mut block = block;
                self.build_decl(&mut block, node)?;
                Ok(block)
            }

            Tag::Empty => Ok(block),

            tag if tag.is_value() => {
                let mut block = block;
                self.build_void(&mut block, node)?;
                Ok(block)
            }

            tag => Err(Diagnostic::error(
                format!("unhandled AST tag {:?} at statement position", tag),
                self.ast.node(node).span,
            )),
        }
    }

    /// Lower a compound block, threading the continuation through its
    /// children, and route the fall-through edge to `cont`. `cont` is
    /// created by the caller and is the compound's single exit.
    pub(crate) fn build_code(
        &mut self,
        block: BlockId,
        node: NodeId,
        cont: BlockId,
    ) -> Result<(), Diagnostic> {
        let mut block = block;
        let stmts: Vec<NodeId> = self.ast.children(node).collect();
        for stmt in stmts {
            block = self.build_stmt(block, stmt)?;
        }
        self.ir.terminate(block, Terminator::Jump(cont))?;
        Ok(())
    }

    // ─── Branch (if / if-else) ────────────────────────────────────

    fn build_branch(&mut self, block: BlockId, node: NodeId) -> Result<BlockId, Diagnostic> {
        let cond = self
            .ast
            .node(node)
            .first_child
            .ok_or_else(|| self.ice("branch without a condition", node))?;
        // The false arm is always present; a source-level missing `else`
        // arrives as an empty compound.
        let arm_true = self
            .ast
            .node(node)
            .lhs
            .ok_or_else(|| self.ice("branch without a true arm", node))?;
        let arm_false = self
            .ast
            .node(node)
            .rhs
            .ok_or_else(|| self.ice("branch without a false arm", node))?;

        let if_true = self.new_block();
        let if_false = self.new_block();
        let cont = self.new_block();

        self.build_branch_on(block, cond, if_true, if_false)?;
        self.build_code(if_true, arm_true, cont)?;
        self.build_code(if_false, arm_false, cont)?;
        Ok(cont)
    }

    // ─── Loop (while / do-while) ──────────────────────────────────

    fn build_loop(&mut self, block: BlockId, node: NodeId) -> Result<BlockId, Diagnostic> {
        let lhs = self
            .ast
            .node(node)
            .lhs
            .ok_or_else(|| self.ice("loop without an lhs", node))?;
        let rhs = self
            .ast
            .node(node)
            .rhs
            .ok_or_else(|| self.ice("loop without an rhs", node))?;
        // Post-test loops carry their body at `lhs`.
        let (code, cond, post_test) = if self.ast.node(lhs).tag == Tag::Code {
            (lhs, rhs, true)
        } else {
            (rhs, lhs, false)
        };

        let body = self.new_block();
        let check = self.new_block();
        let cont = self.new_block();

        if post_test {
            self.ir.terminate(block, Terminator::Jump(body))?;
        } else {
            self.build_branch_on(block, cond, body, cont)?;
        }

        let saved_break = self.break_to;
        let saved_continue = self.continue_to;
        self.break_to = Some(cont);
        self.continue_to = Some(check);
        self.build_code(body, code, check)?;
        self.break_to = saved_break;
        self.continue_to = saved_continue;

        // The re-entrant test. The condition lowers a second time here;
        // each lowering terminates its own input block.
        self.build_branch_on(check, cond, body, cont)?;
        Ok(cont)
    }

    // ─── Iter (counted loop) ──────────────────────────────────────

    fn build_iter(&mut self, block: BlockId, node: NodeId) -> Result<BlockId, Diagnostic> {
        let clauses: Vec<NodeId> = self.ast.children(node).collect();
        if clauses.len() < 3 {
            return Err(self.ice("counted loop needs init, condition, and step", node));
        }
        let (init, cond, step) = (clauses[0], clauses[1], clauses[2]);
        let code = self
            .ast
            .node(node)
            .lhs
            .ok_or_else(|| self.ice("counted loop without a body", node))?;

        let mut block = block;
        if self.ast.node(init).tag == Tag::Decl {
            self.build_decl(&mut block, init)?;
        } else {
            self.build_void(&mut block, init)?;
        }

        let body = self.new_block();
        let iterate = self.new_block();
        let cont = self.new_block();

        self.build_branch_on(block, cond, body, cont)?;

        let saved_break = self.break_to;
        let saved_continue = self.continue_to;
        self.break_to = Some(cont);
        self.continue_to = Some(iterate);
        self.build_code(body, code, iterate)?;
        self.break_to = saved_break;
        self.continue_to = saved_continue;

        let mut iterate_block = iterate;
        self.build_void(&mut iterate_block, step)?;
        self.build_branch_on(iterate_block, cond, body, cont)?;
        Ok(cont)
    }

    // ─── Return ───────────────────────────────────────────────────

    fn build_return(&mut self, block: BlockId, node: NodeId) -> Result<(), Diagnostic> {
        let return_to = self
            .return_to
            .ok_or_else(|| self.ice("return outside a function", node))?;

        let expr = match self.ast.node(node).rhs {
            None => {
                self.ir.terminate(block, Terminator::Jump(return_to))?;
                return Ok(());
            }
            Some(expr) => expr,
        };

        let mut block = block;
        let src = self.build_value(&mut block, expr)?;
        let ret = self
            .cur_ret
            .clone()
            .ok_or_else(|| self.ice("return outside a function", node))?;
        let size = ret.size(self.target);
        let word = self.word();

        if size == 0 {
            self.release_operand(&src);
        } else if size <= word {
            let ret_reg = self.target.ret_reg;
            if self.regs.request(ret_reg) {
                self.ir.push(
                    block,
                    Inst::Move {
                        dst: Operand::Reg {
                            reg: ret_reg,
                            width: size,
                        },
                        src: src.clone(),
                    },
                )?;
                self.release_operand(&src);
                self.regs.release(ret_reg);
            } else {
                // The only legitimate occupant is the value itself.
                match &src {
                    Operand::Reg { reg, .. } if *reg == ret_reg => {
                        self.release_operand(&src);
                    }
                    _ => return Err(self.ice("return register unavailable", node)),
                }
            }
        } else {
            // The caller pushed a destination pointer just past the saved
            // frame pointer. Copy the value there and hand the same
            // pointer back in the return register.
            let scratch = self
                .regs
                .alloc()
                .ok_or_else(|| self.ice("out of scratch registers in return", node))?;
            self.ir.push(
                block,
                Inst::Move {
                    dst: Operand::Reg {
                        reg: scratch,
                        width: word,
                    },
                    src: Operand::Frame {
                        offset: (2 * word) as i32,
                        width: word,
                    },
                },
            )?;
            self.ir.push(
                block,
                Inst::BlockCopy {
                    dst: scratch,
                    src: src.clone(),
                    bytes: size,
                },
            )?;
            self.ir.push(
                block,
                Inst::Move {
                    dst: Operand::Reg {
                        reg: self.target.ret_reg,
                        width: word,
                    },
                    src: Operand::Reg {
                        reg: scratch,
                        width: word,
                    },
                },
            )?;
            self.release_operand(&src);
            self.regs.release(scratch);
        }

        self.ir.terminate(block, Terminator::Jump(return_to))?;
        Ok(())
    }
}
