#![forbid(unsafe_code)]

use molt_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwDef,
    KwClass,
    KwReturn,
    KwIf,
    KwElif,
    KwElse,
    KwWhile,
    KwFor,
    KwIn,
    KwNot,
    KwAnd,
    KwOr,
    KwIs,
    KwBreak,
    KwContinue,
    KwPass,
    KwImport,
    KwFrom,
    KwAs,
    KwWith,
    KwAsync,
    KwAwait,
    KwRaise,
    KwNone,
    KwTrue,
    KwFalse,

    // Recognized but outside the accepted subset; the parser turns these
    // into targeted diagnostics instead of a generic syntax error.
    KwTry,
    KwExcept,
    KwFinally,
    KwYield,
    KwLambda,
    KwGlobal,
    KwNonlocal,
    KwDel,

    // Operators / punctuation
    Arrow,
    Colon,
    Semicolon,
    Comma,
    Dot,
    At,

    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,

    EqEq,
    Neq,
    Le,
    Ge,
    Lt,
    Gt,

    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,

    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Newline,
    Indent,
    Dedent,
    Eof,

    // Literals / identifiers
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw body of an f-string (quotes stripped, escapes unprocessed); the
    /// parser splits it into literal and interpolation parts.
    FStr(String),
    /// A full-line `# #[...]` comment lifted verbatim for re-emission.
    PassAttr(String),
}
