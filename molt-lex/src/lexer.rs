#![forbid(unsafe_code)]

use logos::Logos;
use miette::Diagnostic;
use molt_ast::{span_between, Span};
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(molt::lex))]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \f\r]+")]
enum RawToken {
    #[token("def")]
    KwDef,
    #[token("class")]
    KwClass,
    #[token("return")]
    KwReturn,
    #[token("if")]
    KwIf,
    #[token("elif")]
    KwElif,
    #[token("else")]
    KwElse,
    #[token("while")]
    KwWhile,
    #[token("for")]
    KwFor,
    #[token("in")]
    KwIn,
    #[token("not")]
    KwNot,
    #[token("and")]
    KwAnd,
    #[token("or")]
    KwOr,
    #[token("is")]
    KwIs,
    #[token("break")]
    KwBreak,
    #[token("continue")]
    KwContinue,
    #[token("pass")]
    KwPass,
    #[token("import")]
    KwImport,
    #[token("from")]
    KwFrom,
    #[token("as")]
    KwAs,
    #[token("with")]
    KwWith,
    #[token("async")]
    KwAsync,
    #[token("await")]
    KwAwait,
    #[token("raise")]
    KwRaise,
    #[token("None")]
    KwNone,
    #[token("True")]
    KwTrue,
    #[token("False")]
    KwFalse,

    #[token("try")]
    KwTry,
    #[token("except")]
    KwExcept,
    #[token("finally")]
    KwFinally,
    #[token("yield")]
    KwYield,
    #[token("lambda")]
    KwLambda,
    #[token("global")]
    KwGlobal,
    #[token("nonlocal")]
    KwNonlocal,
    #[token("del")]
    KwDel,

    #[token("->")]
    Arrow,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("@")]
    At,

    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,

    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    StarStar,
    #[token("/")]
    Slash,
    #[token("//")]
    SlashSlash,
    #[token("%")]
    Percent,

    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", |lex| parse_float(lex.slice()))]
    Float(Option<f64>),

    #[regex(r"0x[0-9a-fA-F_]+", |lex| parse_int_prefixed(lex.slice(), 16))]
    #[regex(r"[0-9][0-9_]*", |lex| parse_int_decimal(lex.slice()))]
    Int(Option<i64>),

    // String literals with a limited, strict set of escapes:
    // \n, \t, \r, \", \', \\, and \u{HEX} (1-6 hex digits).
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape_quoted(lex.slice()))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| unescape_quoted(lex.slice()))]
    String(Option<std::string::String>),

    // F-strings keep their raw body; the parser splits out interpolations.
    #[regex(r#"f"([^"\\\n]|\\.)*""#, |lex| raw_body(lex.slice()))]
    #[regex(r#"f'([^'\\\n]|\\.)*'"#, |lex| raw_body(lex.slice()))]
    FStr(std::string::String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(std::string::String),
}

fn parse_int_decimal(s: &str) -> Option<i64> {
    strip_underscores(s)?.parse::<i64>().ok()
}

fn parse_int_prefixed(s: &str, radix: u32) -> Option<i64> {
    let rest = s.get(2..)?;
    i64::from_str_radix(&strip_underscores(rest)?, radix).ok()
}

fn parse_float(s: &str) -> Option<f64> {
    strip_underscores(s)?.parse::<f64>().ok()
}

fn strip_underscores(s: &str) -> Option<String> {
    if s.is_empty() {
        return None;
    }
    if s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return None;
    }
    Some(s.replace('_', ""))
}

fn raw_body(slice: &str) -> String {
    // Strip the leading `f` and the surrounding quotes.
    let inner = &slice[2..slice.len().saturating_sub(1)];
    inner.to_string()
}

fn unescape_quoted(slice: &str) -> Option<String> {
    let inner = &slice[1..slice.len().saturating_sub(1)];
    unescape(inner)
}

/// Process the escape set shared by plain strings and f-string literal parts.
pub fn unescape(inner: &str) -> Option<String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let esc = chars.next()?;
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            'u' => {
                if chars.next() != Some('{') {
                    return None;
                }
                let mut hex = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        break;
                    }
                    hex.push(ch);
                    chars.next();
                    if hex.len() > 6 {
                        return None;
                    }
                }
                if chars.next() != Some('}') || hex.is_empty() {
                    return None;
                }
                let cp = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(cp)?);
            }
            _ => return None,
        }
    }

    Some(out)
}

/// Find the byte offset where a trailing comment starts, honoring string
/// and f-string quoting so `#` inside a literal is not a comment.
fn comment_start(code: &str) -> Option<usize> {
    let bytes = code.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                } else if b == b'#' {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

pub struct Lexer<'a> {
    src: &'a str,
    base: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, base: 0 }
    }

    /// Lex a fragment that lives at `base` bytes into the real source, so
    /// spans of f-string interpolations point into the original file.
    pub fn with_offset(src: &'a str, base: usize) -> Self {
        Self { src, base }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut indent_stack: Vec<usize> = vec![0];
        let mut line_start = 0usize;

        for line in self.src.split_inclusive('\n') {
            let line_end = line_start + line.len();

            let mut content = line;
            if content.ends_with('\n') {
                content = &content[..content.len() - 1];
            }

            if content.trim().is_empty() {
                line_start = line_end;
                continue;
            }

            let trimmed = content.trim_start();
            let is_pass_attr = trimmed.starts_with("# #[");
            if trimmed.starts_with('#') && !is_pass_attr {
                // Plain comment-only line; invisible to indentation.
                line_start = line_end;
                continue;
            }

            if content.as_bytes().iter().any(|b| *b == b'\t') {
                return Err(LexError {
                    message: "tabs are not allowed; use spaces".to_string(),
                    span: self.span(line_start, line_end),
                });
            }

            let leading_spaces = content
                .as_bytes()
                .iter()
                .take_while(|b| **b == b' ')
                .count();

            let current_indent = *indent_stack.last().unwrap_or(&0);
            if leading_spaces > current_indent {
                indent_stack.push(leading_spaces);
                tokens.push(Token {
                    kind: TokenKind::Indent,
                    span: self.span(line_start, line_start + leading_spaces),
                });
            } else if leading_spaces < current_indent {
                while let Some(&top) = indent_stack.last() {
                    if leading_spaces == top {
                        break;
                    }
                    indent_stack.pop();
                    tokens.push(Token {
                        kind: TokenKind::Dedent,
                        span: self.span(line_start, line_start + leading_spaces),
                    });
                }
                if *indent_stack.last().unwrap_or(&usize::MAX) != leading_spaces {
                    return Err(LexError {
                        message: "inconsistent indentation".to_string(),
                        span: self.span(line_start, line_end),
                    });
                }
            }

            if is_pass_attr {
                // `# #[...]` lines carry the attribute text verbatim.
                let attr = trimmed[2..].trim_end().to_string();
                tokens.push(Token {
                    kind: TokenKind::PassAttr(attr),
                    span: self.span(line_start + leading_spaces, line_end),
                });
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    span: self.span(line_end, line_end),
                });
                line_start = line_end;
                continue;
            }

            let mut code = &content[leading_spaces..];
            if let Some(idx) = comment_start(code) {
                code = &code[..idx];
            }
            if code.trim().is_empty() {
                line_start = line_end;
                continue;
            }

            let mut lex = RawToken::lexer(code);
            while let Some(raw) = lex.next() {
                let span_in_line = lex.span();
                let abs_start = line_start + leading_spaces + span_in_line.start;
                let abs_end = line_start + leading_spaces + span_in_line.end;
                let span = self.span(abs_start, abs_end);

                let kind = match raw {
                    Ok(RawToken::KwDef) => TokenKind::KwDef,
                    Ok(RawToken::KwClass) => TokenKind::KwClass,
                    Ok(RawToken::KwReturn) => TokenKind::KwReturn,
                    Ok(RawToken::KwIf) => TokenKind::KwIf,
                    Ok(RawToken::KwElif) => TokenKind::KwElif,
                    Ok(RawToken::KwElse) => TokenKind::KwElse,
                    Ok(RawToken::KwWhile) => TokenKind::KwWhile,
                    Ok(RawToken::KwFor) => TokenKind::KwFor,
                    Ok(RawToken::KwIn) => TokenKind::KwIn,
                    Ok(RawToken::KwNot) => TokenKind::KwNot,
                    Ok(RawToken::KwAnd) => TokenKind::KwAnd,
                    Ok(RawToken::KwOr) => TokenKind::KwOr,
                    Ok(RawToken::KwIs) => TokenKind::KwIs,
                    Ok(RawToken::KwBreak) => TokenKind::KwBreak,
                    Ok(RawToken::KwContinue) => TokenKind::KwContinue,
                    Ok(RawToken::KwPass) => TokenKind::KwPass,
                    Ok(RawToken::KwImport) => TokenKind::KwImport,
                    Ok(RawToken::KwFrom) => TokenKind::KwFrom,
                    Ok(RawToken::KwAs) => TokenKind::KwAs,
                    Ok(RawToken::KwWith) => TokenKind::KwWith,
                    Ok(RawToken::KwAsync) => TokenKind::KwAsync,
                    Ok(RawToken::KwAwait) => TokenKind::KwAwait,
                    Ok(RawToken::KwRaise) => TokenKind::KwRaise,
                    Ok(RawToken::KwNone) => TokenKind::KwNone,
                    Ok(RawToken::KwTrue) => TokenKind::KwTrue,
                    Ok(RawToken::KwFalse) => TokenKind::KwFalse,

                    Ok(RawToken::KwTry) => TokenKind::KwTry,
                    Ok(RawToken::KwExcept) => TokenKind::KwExcept,
                    Ok(RawToken::KwFinally) => TokenKind::KwFinally,
                    Ok(RawToken::KwYield) => TokenKind::KwYield,
                    Ok(RawToken::KwLambda) => TokenKind::KwLambda,
                    Ok(RawToken::KwGlobal) => TokenKind::KwGlobal,
                    Ok(RawToken::KwNonlocal) => TokenKind::KwNonlocal,
                    Ok(RawToken::KwDel) => TokenKind::KwDel,

                    Ok(RawToken::Arrow) => TokenKind::Arrow,
                    Ok(RawToken::Colon) => TokenKind::Colon,
                    Ok(RawToken::Semicolon) => TokenKind::Semicolon,
                    Ok(RawToken::Comma) => TokenKind::Comma,
                    Ok(RawToken::Dot) => TokenKind::Dot,
                    Ok(RawToken::At) => TokenKind::At,

                    Ok(RawToken::Eq) => TokenKind::Eq,
                    Ok(RawToken::PlusEq) => TokenKind::PlusEq,
                    Ok(RawToken::MinusEq) => TokenKind::MinusEq,
                    Ok(RawToken::StarEq) => TokenKind::StarEq,
                    Ok(RawToken::SlashEq) => TokenKind::SlashEq,
                    Ok(RawToken::PercentEq) => TokenKind::PercentEq,

                    Ok(RawToken::EqEq) => TokenKind::EqEq,
                    Ok(RawToken::Neq) => TokenKind::Neq,
                    Ok(RawToken::Le) => TokenKind::Le,
                    Ok(RawToken::Ge) => TokenKind::Ge,
                    Ok(RawToken::Lt) => TokenKind::Lt,
                    Ok(RawToken::Gt) => TokenKind::Gt,

                    Ok(RawToken::Plus) => TokenKind::Plus,
                    Ok(RawToken::Minus) => TokenKind::Minus,
                    Ok(RawToken::Star) => TokenKind::Star,
                    Ok(RawToken::StarStar) => TokenKind::StarStar,
                    Ok(RawToken::Slash) => TokenKind::Slash,
                    Ok(RawToken::SlashSlash) => TokenKind::SlashSlash,
                    Ok(RawToken::Percent) => TokenKind::Percent,

                    Ok(RawToken::Amp) => TokenKind::Amp,
                    Ok(RawToken::Pipe) => TokenKind::Pipe,
                    Ok(RawToken::Caret) => TokenKind::Caret,
                    Ok(RawToken::Shl) => TokenKind::Shl,
                    Ok(RawToken::Shr) => TokenKind::Shr,

                    Ok(RawToken::LParen) => TokenKind::LParen,
                    Ok(RawToken::RParen) => TokenKind::RParen,
                    Ok(RawToken::LBracket) => TokenKind::LBracket,
                    Ok(RawToken::RBracket) => TokenKind::RBracket,
                    Ok(RawToken::LBrace) => TokenKind::LBrace,
                    Ok(RawToken::RBrace) => TokenKind::RBrace,

                    Ok(RawToken::Ident(s)) => TokenKind::Ident(s),
                    Ok(RawToken::Int(Some(n))) => TokenKind::Int(n),
                    Ok(RawToken::Int(None)) => {
                        return Err(LexError {
                            message: "invalid integer literal".to_string(),
                            span,
                        });
                    }
                    Ok(RawToken::Float(Some(v))) => TokenKind::Float(v),
                    Ok(RawToken::Float(None)) => {
                        return Err(LexError {
                            message: "invalid float literal".to_string(),
                            span,
                        });
                    }
                    Ok(RawToken::String(Some(s))) => TokenKind::Str(s),
                    Ok(RawToken::String(None)) => {
                        return Err(LexError {
                            message: "invalid string literal".to_string(),
                            span,
                        });
                    }
                    Ok(RawToken::FStr(s)) => TokenKind::FStr(s),

                    Err(_) => {
                        return Err(LexError {
                            message: "unexpected token".to_string(),
                            span,
                        });
                    }
                };

                tokens.push(Token { kind, span });
            }

            tokens.push(Token {
                kind: TokenKind::Newline,
                span: self.span(line_end, line_end),
            });

            line_start = line_end;
        }

        while indent_stack.len() > 1 {
            indent_stack.pop();
            tokens.push(Token {
                kind: TokenKind::Dedent,
                span: self.span(self.src.len(), self.src.len()),
            });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: self.span(self.src.len(), self.src.len()),
        });

        Ok(tokens)
    }

    fn span(&self, start: usize, end: usize) -> Span {
        span_between(self.base + start, self.base + end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .lex()
            .expect("lex failed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let ks = kinds("def f() -> int:\n    return 1\n");
        assert!(ks.contains(&TokenKind::Indent));
        assert!(ks.contains(&TokenKind::Dedent));
    }

    #[test]
    fn tabs_are_rejected() {
        let err = Lexer::new("def f() -> int:\n\treturn 1\n")
            .lex()
            .expect_err("tabs should fail");
        assert!(err.message.contains("tabs"));
    }

    #[test]
    fn pass_attr_comment_is_captured() {
        let ks = kinds("# #[derive(Serialize)]\ndef f() -> int:\n    return 1\n");
        assert_eq!(
            ks[0],
            TokenKind::PassAttr("#[derive(Serialize)]".to_string())
        );
    }

    #[test]
    fn plain_comments_are_stripped() {
        let ks = kinds("x: int = 1  # counter\n");
        assert!(!ks
            .iter()
            .any(|k| matches!(k, TokenKind::Ident(s) if s == "counter")));
    }

    #[test]
    fn hash_inside_string_is_not_a_comment() {
        let ks = kinds("s: str = \"a#b\"\n");
        assert!(ks.contains(&TokenKind::Str("a#b".to_string())));
    }

    #[test]
    fn fstring_keeps_raw_body() {
        let ks = kinds("s: str = f\"Hello, {name}!\"\n");
        assert!(ks.contains(&TokenKind::FStr("Hello, {name}!".to_string())));
    }

    #[test]
    fn numeric_literals() {
        let ks = kinds("a = 42\nb = 1_000\nc = 0xff\nd = 2.5\n");
        assert!(ks.contains(&TokenKind::Int(42)));
        assert!(ks.contains(&TokenKind::Int(1000)));
        assert!(ks.contains(&TokenKind::Int(255)));
        assert!(ks.contains(&TokenKind::Float(2.5)));
    }

    #[test]
    fn offset_shifts_spans() {
        let tokens = Lexer::with_offset("name", 10).lex().expect("lex failed");
        assert_eq!(tokens[0].span.offset(), 10);
    }
}
