//! Cinder compiler core: typed-AST to CFG lowering plus assembly emission.
//!
//! The front-end (parser, name resolver, type checker) hands over an
//! [`ast::Ast`] and a populated [`sym::SymTable`]; this crate lowers them
//! into [`cir`] basic blocks and serializes the result for the selected
//! [`target::TargetConfig`].

pub mod ast;
pub mod cir;
pub mod diagnostic;
pub mod regalloc;
pub mod span;
pub mod sym;
pub mod target;
pub mod types;

pub use cir::builder::CirBuilder;
pub use cir::lower::{create_lowering, Lowering};
pub use target::TargetConfig;

use std::path::Path;

use ast::{Ast, NodeId};
use cir::IrContext;
use diagnostic::Diagnostic;
use sym::SymTable;

/// Lower a resolved module into a populated IR context.
pub fn lower_module(
    ast: &Ast,
    syms: &mut SymTable,
    root: NodeId,
    target: &TargetConfig,
) -> Result<IrContext, Diagnostic> {
    CirBuilder::new(ast, syms, target).build_module(root)
}

/// Lower `root` and write the assembly for `target` to `out_path`.
pub fn compile_to_path(
    ast: &Ast,
    syms: &mut SymTable,
    root: NodeId,
    target: &TargetConfig,
    out_path: &Path,
) -> Result<(), Diagnostic> {
    let ir = lower_module(ast, syms, root, target)?;
    cir::lower::write_assembly(&ir, target, out_path)
}
