//! CirBuilder unit tests.
//!
//! Programs are built as AST literals, lowered, and checked against the
//! expected CFG shape: which blocks exist, how they terminate, and where
//! break/continue/return edges land.

use super::*;
use crate::ast::{Ast, NodeId, Tag};
use crate::cir::{BlockId, Cond, Inst, Operand, Terminator};
use crate::diagnostic::Severity;
use crate::sym::{SymId, SymTable, SymTag};
use crate::types::DataType;

// ── Fixture ───────────────────────────────────────────────────────

struct Fixture {
    ast: Ast,
    syms: SymTable,
    target: TargetConfig,
}

impl Fixture {
    fn new() -> Self {
        Self {
            ast: Ast::new(),
            syms: SymTable::new(),
            target: TargetConfig::x86_64(),
        }
    }

    /// A function implementation with an empty `Code` body.
    fn add_fn(&mut self, name: &str, ret: DataType) -> (NodeId, NodeId, SymId) {
        let sym = self.syms.add(SymTag::Func, name, DataType::func(ret));
        let node = self.ast.add(Tag::FnImpl);
        self.ast.set_sym(node, sym);
        let body = self.ast.add(Tag::Code);
        self.ast.set_rhs(node, body);
        (node, body, sym)
    }

    fn local(&mut self, fn_sym: SymId, name: &str, dt: DataType) -> SymId {
        let sym = self.syms.add(SymTag::Id, name, dt);
        self.syms.add_child(fn_sym, sym);
        sym
    }

    fn param(&mut self, fn_sym: SymId, name: &str, dt: DataType) -> SymId {
        let sym = self.syms.add(SymTag::Param, name, dt);
        self.syms.add_child(fn_sym, sym);
        sym
    }

    fn name(&mut self, sym: SymId) -> NodeId {
        let dt = self.syms.sym(sym).dt.clone();
        self.ast.add_name(sym, dt)
    }

    fn binop(&mut self, tag: Tag, lhs: NodeId, rhs: NodeId) -> NodeId {
        let node = self.ast.add(tag);
        self.ast.set_lhs(node, lhs);
        self.ast.set_rhs(node, rhs);
        self.ast.set_dt(node, DataType::Int);
        node
    }

    fn assign(&mut self, sym: SymId, value: NodeId) -> NodeId {
        let place = self.name(sym);
        self.binop(Tag::Assign, place, value)
    }

    fn code(&mut self, stmts: &[NodeId]) -> NodeId {
        let node = self.ast.add(Tag::Code);
        for &stmt in stmts {
            self.ast.append_child(node, stmt);
        }
        node
    }

    fn ret(&mut self, expr: Option<NodeId>) -> NodeId {
        let node = self.ast.add(Tag::Return);
        if let Some(expr) = expr {
            self.ast.set_rhs(node, expr);
        }
        node
    }

    /// `if (cond) then_code else else_code`.
    fn branch(&mut self, cond: NodeId, then_code: NodeId, else_code: NodeId) -> NodeId {
        let node = self.ast.add(Tag::Branch);
        self.ast.append_child(node, cond);
        self.ast.set_lhs(node, then_code);
        self.ast.set_rhs(node, else_code);
        node
    }

    fn while_loop(&mut self, cond: NodeId, body: NodeId) -> NodeId {
        let node = self.ast.add(Tag::Loop);
        self.ast.set_lhs(node, cond);
        self.ast.set_rhs(node, body);
        node
    }

    fn do_while(&mut self, body: NodeId, cond: NodeId) -> NodeId {
        let node = self.ast.add(Tag::Loop);
        self.ast.set_lhs(node, body);
        self.ast.set_rhs(node, cond);
        node
    }

    fn module(&mut self, items: &[NodeId]) -> NodeId {
        let node = self.ast.add(Tag::Module);
        for &item in items {
            self.ast.append_child(node, item);
        }
        node
    }

    fn build(&mut self, root: NodeId) -> Result<IrContext, Diagnostic> {
        CirBuilder::new(&self.ast, &mut self.syms, &self.target).build_module(root)
    }
}

fn jump_target(ir: &IrContext, block: BlockId) -> Option<BlockId> {
    match ir.block(block).term {
        Some(Terminator::Jump(target)) => Some(target),
        _ => None,
    }
}

fn branch_targets(ir: &IrContext, block: BlockId) -> Option<(BlockId, BlockId)> {
    match ir.block(block).term {
        Some(Terminator::Branch {
            if_true, if_false, ..
        }) => Some((if_true, if_false)),
        _ => None,
    }
}

/// Every block reachable from the entry must carry exactly one terminator.
fn assert_reachable_terminated(ir: &IrContext, func: &crate::cir::FuncIr) {
    let reachable = ir.reachable_from(func.entry);
    for &id in &func.blocks {
        if reachable[id.0 as usize] {
            assert!(ir.is_terminated(id), "open reachable block {}", id);
        }
    }
}

// ── Scenario: empty function ──────────────────────────────────────

#[test]
fn test_empty_function() {
    let mut fx = Fixture::new();
    let (f, _body, _sym) = fx.add_fn("f", DataType::Void);
    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();

    assert_eq!(ir.funcs.len(), 1);
    let func = &ir.funcs[0];
    assert_eq!(func.label, "f");
    assert_eq!(func.blocks.len(), 2, "entry and epilogue only");

    match &ir.block(func.entry).insts[..] {
        [Inst::Prologue { label, frame_bytes }] => {
            assert_eq!(label, "f");
            assert_eq!(*frame_bytes, 0);
        }
        other => panic!("unexpected entry instructions: {:?}", other),
    }
    assert_eq!(jump_target(&ir, func.entry), Some(func.epilogue));
    assert!(matches!(
        ir.block(func.epilogue).term,
        Some(Terminator::Ret)
    ));
    assert_reachable_terminated(&ir, func);
}

#[test]
fn test_return_value_dump() {
    let mut fx = Fixture::new();
    let (f, body, _sym) = fx.add_fn("f", DataType::Int);
    let forty_two = fx.ast.add_num(42);
    let ret = fx.ret(Some(forty_two));
    fx.ast.append_child(body, ret);
    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();

    insta::assert_snapshot!(ir.dump_fn(&ir.funcs[0]).trim_end(), @r"
    fn f entry=bb0 epilogue=bb1
    bb0:
      prologue f frame=0
      mov r0:8, $42
      jmp bb1
    bb1:
      ret
    bb2:
      jmp bb1
    ");
}

// ── Scenario: if-else with returns on both arms ───────────────────

#[test]
fn test_if_else_with_returns() {
    let mut fx = Fixture::new();
    let (f, body, sym) = fx.add_fn("f", DataType::Int);
    let c = fx.local(sym, "c", DataType::Int);

    let cond = fx.name(c);
    let one = fx.ast.add_num(1);
    let two = fx.ast.add_num(2);
    let ret_one = fx.ret(Some(one));
    let ret_two = fx.ret(Some(two));
    let then_code = fx.code(&[ret_one]);
    let else_code = fx.code(&[ret_two]);
    let branch = fx.branch(cond, then_code, else_code);
    fx.ast.append_child(body, branch);

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    // Entry branches on c != 0.
    let (if_true, if_false) = branch_targets(&ir, func.entry).expect("entry must branch");
    match &ir.block(func.entry).term {
        Some(Terminator::Branch { cc, lhs, rhs, .. }) => {
            assert_eq!(*cc, Cond::Ne);
            assert_eq!(
                *lhs,
                Operand::Frame {
                    offset: -8,
                    width: 8
                }
            );
            assert_eq!(*rhs, Operand::Imm(0));
        }
        other => panic!("unexpected entry terminator: {:?}", other),
    }

    // Each arm moves its constant into the return register and jumps to
    // the epilogue.
    let ret_reg = fx.target.ret_reg;
    for (arm, value) in [(if_true, 1), (if_false, 2)] {
        match &ir.block(arm).insts[..] {
            [Inst::Move { dst, src }] => {
                assert_eq!(
                    *dst,
                    Operand::Reg {
                        reg: ret_reg,
                        width: 8
                    }
                );
                assert_eq!(*src, Operand::Imm(value));
            }
            other => panic!("unexpected arm instructions: {:?}", other),
        }
        assert_eq!(jump_target(&ir, arm), Some(func.epilogue));
    }

    // The continuation after the if exists but nothing reaches it.
    let reachable = ir.reachable_from(func.entry);
    let unreachable_count = func
        .blocks
        .iter()
        .filter(|id| !reachable[id.0 as usize])
        .count();
    assert!(unreachable_count > 0, "expected dead continuation blocks");
    assert_reachable_terminated(&ir, func);
}

// ── Scenario: while loop with break ───────────────────────────────

#[test]
fn test_while_with_break() {
    let mut fx = Fixture::new();
    let (f, body, sym) = fx.add_fn("f", DataType::Void);
    let c = fx.local(sym, "c", DataType::Int);
    let d = fx.local(sym, "d", DataType::Int);

    let brk = fx.ast.add(Tag::Break);
    let then_code = fx.code(&[brk]);
    let else_code = fx.code(&[]);
    let d_name = fx.name(d);
    let inner_if = fx.branch(d_name, then_code, else_code);
    let loop_body = fx.code(&[inner_if]);
    let c_name = fx.name(c);
    let while_node = fx.while_loop(c_name, loop_body);
    fx.ast.append_child(body, while_node);

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    // entry: branch on c to (body, cont)
    let (loop_body_block, cont) = branch_targets(&ir, func.entry).expect("entry must branch");
    // body: branch on d to (break-arm, else-arm)
    let (break_arm, else_arm) =
        branch_targets(&ir, loop_body_block).expect("loop body must branch on d");
    // break-arm jumps straight to the loop exit
    assert_eq!(jump_target(&ir, break_arm), Some(cont));
    // else-arm falls to the inner continuation, which reaches loopCheck
    let inner_cont = jump_target(&ir, else_arm).expect("else arm must jump");
    let check = jump_target(&ir, inner_cont).expect("inner continuation must jump");
    // loopCheck re-tests c to (body, cont)
    assert_eq!(branch_targets(&ir, check), Some((loop_body_block, cont)));
    assert_reachable_terminated(&ir, func);
}

// ── Scenario: do-while ────────────────────────────────────────────

#[test]
fn test_do_while() {
    let mut fx = Fixture::new();
    let (f, body, sym) = fx.add_fn("f", DataType::Void);
    let c = fx.local(sym, "c", DataType::Int);
    let x = fx.local(sym, "x", DataType::Int);

    let one = fx.ast.add_num(1);
    let stmt = fx.assign(x, one);
    let loop_body = fx.code(&[stmt]);
    let c_name = fx.name(c);
    let loop_node = fx.do_while(loop_body, c_name);
    fx.ast.append_child(body, loop_node);

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    // entry jumps unconditionally into the body
    let loop_body_block = jump_target(&ir, func.entry).expect("entry must jump");
    assert!(
        !ir.block(loop_body_block).insts.is_empty(),
        "body must carry the statement"
    );
    // body falls through to loopCheck
    let check = jump_target(&ir, loop_body_block).expect("body must jump to the check");
    // loopCheck branches on c back to body or out
    let (back, _out) = branch_targets(&ir, check).expect("check must branch");
    assert_eq!(back, loop_body_block);
    assert_reachable_terminated(&ir, func);
}

// ── Scenario: counted loop ────────────────────────────────────────

#[test]
fn test_iter_loop() {
    let mut fx = Fixture::new();
    let (f, body, sym) = fx.add_fn("f", DataType::Void);
    let i = fx.local(sym, "i", DataType::Int);
    let n = fx.local(sym, "n", DataType::Int);

    // for (int i = 0; i < n; i = i + 1) continue;
    let init = fx.ast.add(Tag::Decl);
    fx.ast.set_sym(init, i);
    let zero = fx.ast.add_num(0);
    fx.ast.append_child(init, zero);

    let i_name = fx.name(i);
    let n_name = fx.name(n);
    let cond = fx.binop(Tag::Lt, i_name, n_name);

    let i_name2 = fx.name(i);
    let one = fx.ast.add_num(1);
    let add = fx.binop(Tag::Add, i_name2, one);
    let step = fx.assign(i, add);

    let cont_stmt = fx.ast.add(Tag::Continue);
    let loop_body = fx.code(&[cont_stmt]);

    let iter = fx.ast.add(Tag::Iter);
    fx.ast.append_child(iter, init);
    fx.ast.append_child(iter, cond);
    fx.ast.append_child(iter, step);
    fx.ast.set_lhs(iter, loop_body);
    fx.ast.append_child(body, iter);

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    // The initializer lowers into the entry block.
    assert!(
        ir.block(func.entry)
            .insts
            .iter()
            .any(|inst| matches!(inst, Inst::Move { dst: Operand::Frame { .. }, src: Operand::Imm(0) })),
        "init must store 0 into i's slot"
    );

    // entry branches on i < n to (body, cont)
    let (loop_body_block, cont) = branch_targets(&ir, func.entry).expect("entry must branch");
    match &ir.block(func.entry).term {
        Some(Terminator::Branch { cc, .. }) => assert_eq!(*cc, Cond::Lt),
        other => panic!("unexpected entry terminator: {:?}", other),
    }

    // `continue` in the body lands at the iterate block.
    let iterate = jump_target(&ir, loop_body_block).expect("continue must jump");
    assert!(
        !ir.block(iterate).insts.is_empty(),
        "iterate block must carry the step code"
    );
    // iterate re-tests to (body, cont)
    assert_eq!(branch_targets(&ir, iterate), Some((loop_body_block, cont)));
    assert_reachable_terminated(&ir, func);
}

// ── Scenario: large aggregate return ──────────────────────────────

#[test]
fn test_large_aggregate_return() {
    let mut fx = Fixture::new();
    let (f, body, sym) = fx.add_fn("make_pair", DataType::Record(24));
    let a = fx.param(sym, "a", DataType::Int);
    let b = fx.param(sym, "b", DataType::Int);
    let result = fx.local(sym, "result", DataType::Record(24));

    let result_name = fx.name(result);
    let ret = fx.ret(Some(result_name));
    fx.ast.append_child(body, ret);

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    // Parameters start past return address, saved fp, and the hidden
    // destination pointer: 3 words.
    assert_eq!(fx.syms.sym(a).offset, 24);
    assert_eq!(fx.syms.sym(b).offset, 32);
    assert_eq!(fx.syms.sym(result).offset, -24);

    // The return sequence: load the hidden pointer from [fp + 2W], copy
    // 24 bytes, forward the pointer in the return register.
    let insts = &ir.block(func.entry).insts;
    let load = insts
        .iter()
        .find(|inst| {
            matches!(
                inst,
                Inst::Move {
                    dst: Operand::Reg { .. },
                    src: Operand::Frame {
                        offset: 16,
                        width: 8
                    }
                }
            )
        })
        .expect("hidden pointer load");
    let scratch = match load {
        Inst::Move {
            dst: Operand::Reg { reg, .. },
            ..
        } => *reg,
        _ => unreachable!(),
    };
    assert!(insts.iter().any(|inst| matches!(
        inst,
        Inst::BlockCopy { dst, src: Operand::Frame { offset: -24, width: 24 }, bytes: 24 }
            if *dst == scratch
    )));
    assert!(insts.iter().any(|inst| matches!(
        inst,
        Inst::Move {
            dst: Operand::Reg { reg, width: 8 },
            src: Operand::Reg { reg: src_reg, width: 8 },
        } if *reg == fx.target.ret_reg && *src_reg == scratch
    )));
    assert_eq!(jump_target(&ir, func.entry), Some(func.epilogue));
}

// ── Break / continue target discipline ────────────────────────────

#[test]
fn test_nested_loops_break_targets() {
    let mut fx = Fixture::new();
    let (f, body, sym) = fx.add_fn("f", DataType::Void);
    let c = fx.local(sym, "c", DataType::Int);
    let d = fx.local(sym, "d", DataType::Int);

    // while (c) { while (d) { break; } break; }
    let inner_break = fx.ast.add(Tag::Break);
    let inner_body = fx.code(&[inner_break]);
    let d_name = fx.name(d);
    let inner_loop = fx.while_loop(d_name, inner_body);
    let outer_break = fx.ast.add(Tag::Break);
    let outer_body = fx.code(&[inner_loop, outer_break]);
    let c_name = fx.name(c);
    let outer_loop = fx.while_loop(c_name, outer_body);
    fx.ast.append_child(body, outer_loop);

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    let (outer_body_block, outer_cont) =
        branch_targets(&ir, func.entry).expect("entry must branch on c");
    let (inner_body_block, inner_cont) =
        branch_targets(&ir, outer_body_block).expect("outer body must branch on d");
    // Inner break exits only the inner loop.
    assert_eq!(jump_target(&ir, inner_body_block), Some(inner_cont));
    // The statement after the inner loop is the outer break.
    assert_eq!(jump_target(&ir, inner_cont), Some(outer_cont));
    assert_reachable_terminated(&ir, func);
}

#[test]
fn test_flow_context_save_restore() {
    let mut fx = Fixture::new();
    let c = fx.syms.add(SymTag::Id, "c", DataType::Int);
    let c_name = fx.name(c);
    let empty = fx.code(&[]);
    let loop_node = fx.while_loop(c_name, empty);

    let Fixture {
        ref ast,
        ref mut syms,
        ref target,
    } = fx;
    let mut builder = CirBuilder::new(ast, syms, target);
    let sentinel_break = builder.ir.create_block();
    let sentinel_continue = builder.ir.create_block();
    let input = builder.ir.create_block();
    builder.break_to = Some(sentinel_break);
    builder.continue_to = Some(sentinel_continue);

    builder.build_stmt(input, loop_node).unwrap();

    assert_eq!(builder.break_to, Some(sentinel_break));
    assert_eq!(builder.continue_to, Some(sentinel_continue));
}

#[test]
fn test_break_outside_loop_is_internal_error() {
    let mut fx = Fixture::new();
    let (f, body, _sym) = fx.add_fn("f", DataType::Void);
    let brk = fx.ast.add(Tag::Break);
    fx.ast.append_child(body, brk);
    let root = fx.module(&[f]);

    let err = fx.build(root).unwrap_err();
    assert_eq!(err.severity, Severity::Ice);
    assert!(err.message.contains("break with no enclosing loop"));
}

// ── Dispatch errors and dead code ─────────────────────────────────

#[test]
fn test_unhandled_statement_tag() {
    let mut fx = Fixture::new();
    let (f, body, _sym) = fx.add_fn("f", DataType::Void);
    let bad = fx.ast.add(Tag::Using);
    fx.ast.append_child(body, bad);
    let root = fx.module(&[f]);

    let err = fx.build(root).unwrap_err();
    assert!(
        err.message.contains("unhandled AST tag"),
        "got: {}",
        err.message
    );
    assert!(err.message.contains("statement position"));
}

#[test]
fn test_unhandled_module_tag() {
    let mut fx = Fixture::new();
    let bad = fx.ast.add(Tag::Break);
    let root = fx.module(&[bad]);

    let err = fx.build(root).unwrap_err();
    assert!(err.message.contains("module position"));
}

#[test]
fn test_dead_code_after_return_lowers_unreachable() {
    let mut fx = Fixture::new();
    let (f, body, sym) = fx.add_fn("f", DataType::Int);
    let x = fx.local(sym, "x", DataType::Int);

    let zero = fx.ast.add_num(0);
    let ret = fx.ret(Some(zero));
    let one = fx.ast.add_num(1);
    let dead = fx.assign(x, one);
    fx.ast.append_child(body, ret);
    fx.ast.append_child(body, dead);

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    // The dead store exists somewhere, but not reachably.
    let reachable = ir.reachable_from(func.entry);
    let dead_block = func
        .blocks
        .iter()
        .find(|id| {
            ir.block(**id).insts.iter().any(|inst| {
                matches!(
                    inst,
                    Inst::Move {
                        dst: Operand::Frame { offset: -8, .. },
                        ..
                    }
                )
            })
        })
        .expect("dead store must still lower");
    assert!(!reachable[dead_block.0 as usize]);
    assert_reachable_terminated(&ir, func);
}

#[test]
fn test_empty_statement_keeps_block() {
    let mut fx = Fixture::new();
    let (f, body, _sym) = fx.add_fn("f", DataType::Void);
    let empty = fx.ast.add(Tag::Empty);
    fx.ast.append_child(body, empty);
    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    // An empty statement adds nothing: same shape as the empty function.
    assert_eq!(func.blocks.len(), 2);
    assert_eq!(jump_target(&ir, func.entry), Some(func.epilogue));
}

// ── Short-circuit conditions ──────────────────────────────────────

#[test]
fn test_short_circuit_and_in_branch() {
    let mut fx = Fixture::new();
    let (f, body, sym) = fx.add_fn("f", DataType::Void);
    let a = fx.local(sym, "a", DataType::Int);
    let b = fx.local(sym, "b", DataType::Int);

    let a_name = fx.name(a);
    let b_name = fx.name(b);
    let cond = fx.binop(Tag::LogAnd, a_name, b_name);
    let then_code = fx.code(&[]);
    let else_code = fx.code(&[]);
    let branch = fx.branch(cond, then_code, else_code);
    fx.ast.append_child(body, branch);

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    // entry tests a: true goes to the middle block, false short-circuits
    // to the false arm.
    let (mid, if_false) = branch_targets(&ir, func.entry).expect("entry must branch on a");
    let (if_true, if_false2) = branch_targets(&ir, mid).expect("middle block must branch on b");
    assert_eq!(if_false, if_false2, "both tests share the false arm");
    assert_ne!(if_true, mid);
    assert_reachable_terminated(&ir, func);
}

#[test]
fn test_short_circuit_value_splits_block() {
    let mut fx = Fixture::new();
    let (f, body, sym) = fx.add_fn("f", DataType::Void);
    let a = fx.local(sym, "a", DataType::Int);
    let b = fx.local(sym, "b", DataType::Int);
    let x = fx.local(sym, "x", DataType::Int);

    // x = a && b; the store must land in the join block, after the split.
    let a_name = fx.name(a);
    let b_name = fx.name(b);
    let and = fx.binop(Tag::LogAnd, a_name, b_name);
    let stmt = fx.assign(x, and);
    fx.ast.append_child(body, stmt);

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    // The entry no longer ends the statement: it branches.
    assert!(branch_targets(&ir, func.entry).is_some());

    // The store to x sits in a block that jumps to the epilogue.
    let store_block = func
        .blocks
        .iter()
        .copied()
        .find(|&id| {
            ir.block(id).insts.iter().any(|inst| {
                matches!(
                    inst,
                    Inst::Move {
                        dst: Operand::Frame { offset: -24, .. },
                        src: Operand::Reg { .. },
                    }
                )
            })
        })
        .expect("store to x");
    assert_ne!(store_block, func.entry);
    assert_eq!(jump_target(&ir, store_block), Some(func.epilogue));
    assert_reachable_terminated(&ir, func);
}

// ── Returns ───────────────────────────────────────────────────────

#[test]
fn test_void_return_jumps_to_epilogue() {
    let mut fx = Fixture::new();
    let (f, body, _sym) = fx.add_fn("f", DataType::Void);
    let ret = fx.ret(None);
    fx.ast.append_child(body, ret);
    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    assert!(ir.block(func.entry).insts.len() == 1, "prologue only");
    assert_eq!(jump_target(&ir, func.entry), Some(func.epilogue));
}

#[test]
fn test_return_of_call_result_already_in_ret_reg() {
    let mut fx = Fixture::new();
    let (g, _g_body, g_sym) = fx.add_fn("g", DataType::Int);
    let (f, body, _sym) = fx.add_fn("f", DataType::Int);

    // return g(); the call result arrives in the return register and the
    // request is expected to fail benignly.
    let callee = fx.name(g_sym);
    let call = fx.ast.add(Tag::Call);
    fx.ast.set_lhs(call, callee);
    fx.ast.set_dt(call, DataType::Int);
    let ret = fx.ret(Some(call));
    fx.ast.append_child(body, ret);

    let root = fx.module(&[g, f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[1];
    assert_eq!(func.label, "f");

    // No move instruction: the value is already where it belongs.
    let entry = ir.block(func.entry);
    assert!(entry
        .insts
        .iter()
        .any(|inst| matches!(inst, Inst::Call { label } if label == "g")));
    assert!(
        !entry
            .insts
            .iter()
            .any(|inst| matches!(inst, Inst::Move { dst: Operand::Reg { .. }, src: Operand::Reg { .. } })),
        "no redundant register move for a value already in the return register"
    );
    assert_eq!(jump_target(&ir, func.entry), Some(func.epilogue));
}

// ── Parameters and storage ────────────────────────────────────────

#[test]
fn test_param_offsets_small_return() {
    let mut fx = Fixture::new();
    let (f, _body, sym) = fx.add_fn("add2", DataType::Int);
    let a = fx.param(sym, "a", DataType::Int);
    let b = fx.param(sym, "b", DataType::Int);
    let tmp = fx.local(sym, "tmp", DataType::Int);

    let root = fx.module(&[f]);
    fx.build(root).unwrap();

    // Two words of control data sit between fp and the first parameter.
    assert_eq!(fx.syms.sym(a).offset, 16);
    assert_eq!(fx.syms.sym(b).offset, 24);
    assert_eq!(fx.syms.sym(tmp).offset, -8);
}

#[test]
fn test_frame_reservation_covers_locals() {
    let mut fx = Fixture::new();
    let (f, _body, sym) = fx.add_fn("f", DataType::Void);
    fx.local(sym, "x", DataType::Int);
    fx.local(sym, "buf", DataType::Array(Box::new(DataType::Char), 10));

    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();
    let func = &ir.funcs[0];

    match &ir.block(func.entry).insts[0] {
        Inst::Prologue { frame_bytes, .. } => assert_eq!(*frame_bytes, 18),
        other => panic!("expected prologue, got {:?}", other),
    }
}

// ── Module dispatch ───────────────────────────────────────────────

#[test]
fn test_using_reexport_recurses() {
    let mut fx = Fixture::new();
    let (helper, _body, _sym) = fx.add_fn("helper", DataType::Void);
    let library = fx.module(&[helper]);

    let using = fx.ast.add(Tag::Using);
    fx.ast.set_rhs(using, library);
    let (main, _main_body, _main_sym) = fx.add_fn("main", DataType::Void);
    let root = fx.module(&[using, main]);

    let ir = fx.build(root).unwrap();
    let labels: Vec<&str> = ir.funcs.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, vec!["helper", "main"]);
}

#[test]
fn test_using_without_referent_is_skipped() {
    let mut fx = Fixture::new();
    let using = fx.ast.add(Tag::Using);
    let root = fx.module(&[using]);
    let ir = fx.build(root).unwrap();
    assert!(ir.funcs.is_empty());
}

#[test]
fn test_global_declarations() {
    let mut fx = Fixture::new();
    let counter = fx.syms.add(SymTag::Id, "counter", DataType::Int);
    let decl = fx.ast.add(Tag::Decl);
    fx.ast.set_sym(decl, counter);
    let seven = fx.ast.add_num(7);
    fx.ast.append_child(decl, seven);

    let buffer = fx.syms.add(SymTag::Id, "buffer", DataType::Record(24));
    let decl2 = fx.ast.add(Tag::Decl);
    fx.ast.set_sym(decl2, buffer);

    let root = fx.module(&[decl, decl2]);
    let ir = fx.build(root).unwrap();

    assert_eq!(ir.globals.len(), 2);
    assert_eq!(ir.globals[0].label, "counter");
    assert_eq!(ir.globals[0].size, 8);
    assert_eq!(ir.globals[0].init, Some(7));
    assert_eq!(ir.globals[1].label, "buffer");
    assert_eq!(ir.globals[1].size, 24);
    assert_eq!(ir.globals[1].init, None);

    // Functions read module-level names through their labels.
    assert_eq!(fx.syms.sym(counter).label.as_deref(), Some("counter"));
}

// ── End to end ────────────────────────────────────────────────────

#[test]
fn test_lowered_module_emits_assembly() {
    let mut fx = Fixture::new();
    let (f, body, _sym) = fx.add_fn("main", DataType::Int);
    let forty_two = fx.ast.add_num(42);
    let ret = fx.ret(Some(forty_two));
    fx.ast.append_child(body, ret);
    let root = fx.module(&[f]);
    let ir = fx.build(root).unwrap();

    let text = crate::cir::lower::create_lowering("x86_64")
        .unwrap()
        .lower(&ir);
    let joined = text.join("\n");
    assert!(joined.contains(".globl main"));
    assert!(joined.contains("movq $42, %rax"));
    assert!(joined.contains("    leave\n    ret"));
}
