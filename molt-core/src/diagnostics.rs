#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use molt_ast::Span;

/// Stable diagnostic codes. Every kind is fatal: emission never runs once
/// any of these has been raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    Parse,
    MissingAnnotation,
    UninferableLocal,
    TypeMismatch,
    UnknownSymbol,
    AwaitOutsideAsync,
    UnsupportedConstruct,
    StubLoad,
    Io,
}

impl DiagnosticKind {
    pub fn code(&self) -> &'static str {
        match self {
            DiagnosticKind::Parse => "E_PARSE",
            DiagnosticKind::MissingAnnotation => "E_MISSING_ANNOTATION",
            DiagnosticKind::UninferableLocal => "E_UNINFERABLE_LOCAL",
            DiagnosticKind::TypeMismatch => "E_TYPE_MISMATCH",
            DiagnosticKind::UnknownSymbol => "E_UNKNOWN_SYMBOL",
            DiagnosticKind::AwaitOutsideAsync => "E_AWAIT_OUTSIDE_ASYNC",
            DiagnosticKind::UnsupportedConstruct => "E_UNSUPPORTED_CONSTRUCT",
            DiagnosticKind::StubLoad => "E_STUB_LOAD",
            DiagnosticKind::Io => "E_IO",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub path: PathBuf,
    pub span: Option<Span>,
    pub message: String,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        path: impl Into<PathBuf>,
        span: Option<Span>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            span,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Render as `path:line:col: KIND: message`, resolving the span against
    /// the file's source text.
    pub fn render(&self, source: &str) -> String {
        let (line, col) = self
            .span
            .map(|s| line_col(source, s.offset()))
            .unwrap_or((1, 1));
        let mut out = format!(
            "{}:{}:{}: {}: {}",
            self.path.display(),
            line,
            col,
            self.kind.code(),
            self.message
        );
        for note in &self.notes {
            out.push_str("\n    note: ");
            out.push_str(note);
        }
        out
    }
}

/// 1-based line and column for a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Collector for the whole invocation. Analysis keeps going after a fatal
/// find so one run surfaces as many problems as possible.
#[derive(Default)]
pub struct DiagnosticSink {
    diags: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.diags.push(diag);
    }

    pub fn error(
        &mut self,
        kind: DiagnosticKind,
        path: &Path,
        span: Span,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic::new(kind, path, Some(span), message));
    }

    pub fn has_errors(&self) -> bool {
        !self.diags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_ast::span_between;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DiagnosticKind::Parse.code(), "E_PARSE");
        assert_eq!(DiagnosticKind::StubLoad.code(), "E_STUB_LOAD");
    }

    #[test]
    fn render_resolves_line_and_column() {
        let src = "first\nsecond line\n";
        let d = Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            "demo.py",
            Some(span_between(6, 12)),
            "bad type",
        );
        assert_eq!(d.render(src), "demo.py:2:1: E_TYPE_MISMATCH: bad type");
    }

    #[test]
    fn notes_render_indented() {
        let d = Diagnostic::new(DiagnosticKind::UninferableLocal, "m.py", None, "cannot infer")
            .with_note("annotate the binding");
        assert!(d.render("").contains("note: annotate the binding"));
    }
}
