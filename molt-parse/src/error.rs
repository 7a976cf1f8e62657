#![forbid(unsafe_code)]

use miette::Diagnostic;
use molt_ast::Span;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("parse error: {message}")]
#[diagnostic(code(molt::parse))]
pub struct ParseError {
    pub message: String,
    #[label]
    pub span: Span,
    /// True for forms the grammar recognizes but the accepted subset
    /// excludes; reported under a dedicated diagnostic code.
    pub unsupported: bool,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            unsupported: false,
        }
    }

    pub fn unsupported(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            unsupported: true,
        }
    }
}
