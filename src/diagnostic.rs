//! Compiler diagnostics.
//!
//! Two rendering paths. Diagnostics anchored to source (front-end errors,
//! warnings) render through ariadne with a source excerpt. Internal errors
//! ([`Severity::Ice`]) describe a broken compiler contract, usually carry a
//! dummy span, and render as a plain bug report instead; pointing at user
//! source for those would mislead.

use crate::span::Span;

/// A compiler diagnostic.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    /// A problem in the source program.
    Error,
    /// An internal inconsistency: the front-end broke the lowering
    /// contract, or the lowering contradicted itself. Always a compiler
    /// bug, never a source problem.
    Ice,
}

impl Severity {
    /// Whether a diagnostic of this severity aborts the compilation.
    pub fn is_fatal(self) -> bool {
        !matches!(self, Severity::Warning)
    }
}

impl Diagnostic {
    fn new(severity: Severity, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity,
            message: message.into(),
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Warning, message, span)
    }

    /// An internal-inconsistency error.
    pub fn ice(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Ice, message, span)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Render the diagnostic to stderr.
    pub fn render(&self, filename: &str, source: &str) {
        if self.severity == Severity::Ice {
            self.render_ice(filename);
            return;
        }

        use ariadne::{Color, Label, Report, ReportKind, Source};

        let (kind, color) = match self.severity {
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
            _ => (ReportKind::Error, Color::Red),
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.start as usize..self.span.end as usize))
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        report
            .finish()
            .eprint((filename, Source::from(source)))
            .unwrap();
    }

    /// The bug-report path: no source excerpt, a standard footer.
    fn render_ice(&self, filename: &str) {
        eprintln!("internal compiler error: {}", self.message);
        if self.span != Span::dummy() {
            eprintln!(
                "  while compiling {} (bytes {}..{})",
                filename, self.span.start, self.span.end
            );
        }
        for note in &self.notes {
            eprintln!("  note: {}", note);
        }
        if let Some(help) = &self.help {
            eprintln!("  help: {}", help);
        }
        eprintln!("  this is a bug in the compiler, not in the source program");
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}
