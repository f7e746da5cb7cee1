//! Lowering throughput: synthetic modules of growing statement counts.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cinder::ast::{Ast, NodeId, Tag};
use cinder::sym::{SymTable, SymTag};
use cinder::target::TargetConfig;
use cinder::types::DataType;
use cinder::CirBuilder;

/// One function with `n` accumulate statements and a final return.
fn synthetic_module(n: usize) -> (Ast, SymTable, NodeId) {
    let mut ast = Ast::new();
    let mut syms = SymTable::new();

    let fn_sym = syms.add(SymTag::Func, "hot", DataType::func(DataType::Int));
    let x = syms.add(SymTag::Id, "x", DataType::Int);
    syms.add_child(fn_sym, x);

    let fn_node = ast.add(Tag::FnImpl);
    ast.set_sym(fn_node, fn_sym);
    let body = ast.add(Tag::Code);
    ast.set_rhs(fn_node, body);

    for i in 0..n {
        // x = x + i
        let lhs = ast.add_name(x, DataType::Int);
        let amount = ast.add_num(i as i64);
        let add = ast.add(Tag::Add);
        ast.set_lhs(add, lhs);
        ast.set_rhs(add, amount);
        ast.set_dt(add, DataType::Int);

        let place = ast.add_name(x, DataType::Int);
        let assign = ast.add(Tag::Assign);
        ast.set_lhs(assign, place);
        ast.set_rhs(assign, add);
        ast.set_dt(assign, DataType::Int);
        ast.append_child(body, assign);
    }
    let result = ast.add_name(x, DataType::Int);
    let ret = ast.add(Tag::Return);
    ast.set_rhs(ret, result);
    ast.append_child(body, ret);

    let root = ast.add(Tag::Module);
    ast.append_child(root, fn_node);
    (ast, syms, root)
}

fn bench_lower_module(c: &mut Criterion) {
    let target = TargetConfig::x86_64();
    let mut group = c.benchmark_group("lower_module");
    for &n in &[16usize, 256] {
        let (ast, syms, root) = synthetic_module(n);
        group.bench_function(format!("{}_stmts", n), |b| {
            b.iter(|| {
                let mut syms = syms.clone();
                CirBuilder::new(black_box(&ast), &mut syms, &target)
                    .build_module(root)
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lower_module);
criterion_main!(benches);
