//! Frame storage planning.
//!
//! One pass over a function's symbol tree assigns every local a slot below
//! the frame base. A local's lifetime equals its enclosing function, so
//! nested scopes never reuse slots; the walk just keeps decrementing.

use crate::sym::{SymId, SymTable, SymTag};
use crate::target::TargetConfig;

/// Assign frame offsets to every `Id` symbol reachable through nested
/// `Scope` children of `scope`, depth-first in declaration order.
///
/// For each local the running offset is decremented by the type's size,
/// then written to the symbol. Returns the minimum offset used; its
/// magnitude is the function's auto-storage requirement.
pub(crate) fn place_locals(
    target: &TargetConfig,
    syms: &mut SymTable,
    scope: SymId,
    mut offset: i32,
) -> i32 {
    let children = syms.sym(scope).children.clone();
    for child in children {
        match syms.sym(child).tag {
            SymTag::Scope => {
                offset = place_locals(target, syms, child, offset);
            }
            SymTag::Id => {
                let size = syms.sym(child).dt.size(target) as i32;
                offset -= size;
                syms.sym_mut(child).offset = offset;
            }
            // Parameters, nested functions, and type aliases carry no
            // auto storage.
            _ => {}
        }
    }
    offset
}
