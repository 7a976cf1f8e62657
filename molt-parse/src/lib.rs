#![forbid(unsafe_code)]

mod error;
mod parser;

pub use error::ParseError;
pub use parser::Parser;

use molt_ast::Module;
use molt_lex::Lexer;

/// Lex and parse a complete source file.
pub fn parse_source(src: &str) -> Result<Module, ParseError> {
    let tokens = Lexer::new(src)
        .lex()
        .map_err(|e| ParseError::new(e.message, e.span))?;
    Parser::new(&tokens).parse_module()
}
