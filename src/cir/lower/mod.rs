//! Lowering: consumes a populated [`IrContext`] and produces assembly text.
//!
//! Each target implements [`Lowering`]; the factory resolves a backend by
//! target name. The top-level driver picks the output path and calls
//! [`write_assembly`].

mod x86_64;

use std::path::Path;

use crate::cir::IrContext;
use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::target::TargetConfig;

pub use x86_64::X86_64Lowering;

/// Serializes CIR into target assembly text.
pub trait Lowering {
    /// The target name (e.g. "x86_64").
    fn target_name(&self) -> &str;

    /// Lower a whole translation unit into assembly lines.
    fn lower(&self, ir: &IrContext) -> Vec<String>;
}

/// Create a lowering backend for the given target name.
pub fn create_lowering(target: &str) -> Option<Box<dyn Lowering>> {
    match target {
        "x86_64" | "x86-64" => Some(Box::new(X86_64Lowering::new())),
        _ => None,
    }
}

/// Serialize `ir` for `target` and write the text to `out_path`.
pub fn write_assembly(
    ir: &IrContext,
    target: &TargetConfig,
    out_path: &Path,
) -> Result<(), Diagnostic> {
    let lowering = create_lowering(&target.name).ok_or_else(|| {
        Diagnostic::error(
            format!("no lowering backend for target '{}'", target.name),
            Span::dummy(),
        )
    })?;
    let mut text = lowering.lower(ir).join("\n");
    text.push('\n');
    std::fs::write(out_path, text).map_err(|e| {
        Diagnostic::error(
            format!("cannot write '{}': {}", out_path.display(), e),
            Span::dummy(),
        )
    })
}
