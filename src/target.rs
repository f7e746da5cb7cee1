//! Target architecture descriptor.
//!
//! Everything the lowering needs to know about the machine lives here:
//! word size, the register set, the calling-convention registers, and the
//! symbol-mangling policy. Built-in x86-64 plus TOML-file targets.

use std::path::Path;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// A machine register, an index into [`TargetConfig::reg_names`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Reg(pub u8);

/// Target machine configuration.
#[derive(Clone, Debug)]
pub struct TargetConfig {
    /// Short identifier used in CLI and file paths (e.g. "x86_64").
    pub name: String,
    /// Human-readable name (e.g. "x86-64 System V").
    pub display_name: String,
    /// Natural pointer/integer width in bytes.
    pub word_size: u32,
    /// Full-width register names; `Reg(i)` names `reg_names[i]`.
    pub reg_names: Vec<String>,
    /// Return-value register.
    pub ret_reg: Reg,
    /// Frame-pointer register.
    pub frame_reg: Reg,
    /// Stack-pointer register.
    pub stack_reg: Reg,
    /// Allocatable scratch registers, in allocation-preference order.
    /// Includes the return register (conventionally last).
    pub scratch_regs: Vec<Reg>,
    /// Prefix prepended when mangling a symbol into an output label.
    pub label_prefix: String,
    /// File extension for emitted assembly (e.g. ".s").
    pub output_extension: String,
}

impl TargetConfig {
    /// Built-in x86-64 configuration (hardcoded fallback).
    ///
    /// Registers follow hardware encoding order. `rbx` is callee-saved and
    /// left out of the scratch pool; `r11` is reserved for the emitter.
    pub fn x86_64() -> Self {
        let names = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11",
        ];
        Self {
            name: "x86_64".to_string(),
            display_name: "x86-64 System V".to_string(),
            word_size: 8,
            reg_names: names.iter().map(|s| s.to_string()).collect(),
            ret_reg: Reg(0),
            frame_reg: Reg(5),
            stack_reg: Reg(4),
            scratch_regs: vec![
                Reg(1),
                Reg(2),
                Reg(6),
                Reg(7),
                Reg(8),
                Reg(9),
                Reg(10),
                Reg(0),
            ],
            label_prefix: String::new(),
            output_extension: ".s".to_string(),
        }
    }

    /// The full-width name of `reg`.
    pub fn reg_name(&self, reg: Reg) -> &str {
        &self.reg_names[reg.0 as usize]
    }

    /// Mangle a symbol name into its output label.
    pub fn mangle(&self, name: &str) -> String {
        format!("{}{}", self.label_prefix, name)
    }

    /// Load a target configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read target config '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse_toml(&content, path)
    }

    /// Resolve a target by name: look for `targets/{name}.toml` relative to
    /// the compiler binary or working directory, falling back to built-ins.
    pub fn resolve(name: &str) -> Result<Self, Diagnostic> {
        // Reject path traversal
        if name.contains('/') || name.contains('\\') || name.contains("..") || name.starts_with('.')
        {
            return Err(Diagnostic::error(
                format!("invalid target name '{}'", name),
                Span::dummy(),
            ));
        }

        // Built-in target
        if name == "x86_64" || name == "x86-64" {
            return Ok(Self::x86_64());
        }

        // Search for targets/{name}.toml
        let filename = format!("targets/{}.toml", name);

        // 1. Relative to compiler binary
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let path = dir.join(&filename);
                if path.exists() {
                    return Self::load(&path);
                }
                // One level up (target/debug/../targets/)
                if let Some(parent) = dir.parent() {
                    let path = parent.join(&filename);
                    if path.exists() {
                        return Self::load(&path);
                    }
                }
            }
        }

        // 2. Current working directory
        let cwd_path = std::path::PathBuf::from(&filename);
        if cwd_path.exists() {
            return Self::load(&cwd_path);
        }

        Err(Diagnostic::error(
            format!("unknown target '{}' (looked for '{}')", name, filename),
            Span::dummy(),
        )
        .with_help("available built-in targets: x86_64".to_string()))
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self, Diagnostic> {
        let err =
            |msg: String| Diagnostic::error(format!("{}: {}", path.display(), msg), Span::dummy());

        let mut name = String::new();
        let mut display_name = String::new();
        let mut label_prefix = String::new();
        let mut output_extension = String::new();
        let mut word_size: u32 = 0;
        let mut registers: Vec<String> = Vec::new();
        let mut ret_reg = String::new();
        let mut frame_reg = String::new();
        let mut stack_reg = String::new();
        let mut scratch: Vec<String> = Vec::new();

        let mut section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                let unquoted = value.trim_matches('"');

                match (section.as_str(), key) {
                    ("target", "name") => name = unquoted.to_string(),
                    ("target", "display_name") => display_name = unquoted.to_string(),
                    ("target", "label_prefix") => label_prefix = unquoted.to_string(),
                    ("target", "output_extension") => output_extension = unquoted.to_string(),
                    ("machine", "word_size") => {
                        word_size = value
                            .parse()
                            .map_err(|_| err(format!("invalid machine.word_size: {}", value)))?;
                    }
                    ("machine", "registers") => {
                        registers = parse_string_array(value);
                    }
                    ("machine", "ret_reg") => ret_reg = unquoted.to_string(),
                    ("machine", "frame_reg") => frame_reg = unquoted.to_string(),
                    ("machine", "stack_reg") => stack_reg = unquoted.to_string(),
                    ("machine", "scratch_regs") => {
                        scratch = parse_string_array(value);
                    }
                    _ => {} // ignore unknown keys
                }
            }
        }

        if name.is_empty() {
            return Err(err("missing target.name".to_string()));
        }
        if word_size == 0 {
            return Err(err("machine.word_size must be > 0".to_string()));
        }
        if registers.is_empty() {
            return Err(err("machine.registers must be non-empty".to_string()));
        }
        if scratch.is_empty() {
            return Err(err("machine.scratch_regs must be non-empty".to_string()));
        }

        let lookup = |reg_name: &str| -> Result<Reg, Diagnostic> {
            registers
                .iter()
                .position(|n| n == reg_name)
                .map(|i| Reg(i as u8))
                .ok_or_else(|| err(format!("unknown register '{}'", reg_name)))
        };

        let ret_reg = lookup(&ret_reg)?;
        let frame_reg = lookup(&frame_reg)?;
        let stack_reg = lookup(&stack_reg)?;
        let scratch_regs = scratch
            .iter()
            .map(|n| lookup(n))
            .collect::<Result<Vec<Reg>, Diagnostic>>()?;

        Ok(Self {
            name,
            display_name,
            word_size,
            reg_names: registers,
            ret_reg,
            frame_reg,
            stack_reg,
            scratch_regs,
            label_prefix,
            output_extension,
        })
    }
}

/// Parse a minimal TOML string array: `["a", "b", "c"]` → `vec!["a", "b", "c"]`.
fn parse_string_array(s: &str) -> Vec<String> {
    let s = s.trim();
    if !s.starts_with('[') || !s.ends_with(']') {
        return Vec::new();
    }
    let inner = &s[1..s.len() - 1];
    inner
        .split(',')
        .map(|part| part.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
