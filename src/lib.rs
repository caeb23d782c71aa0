//! pawk - a POSIX AWK interpreter in Rust
//!
//! The pipeline is lex -> parse -> resolve -> interpret: the resolver
//! annotates every identifier with its storage slot and pre-compiles regex
//! literals, and the tree-walking interpreter evaluates the resolved AST
//! against the input record stream.

pub mod ast;
pub mod error;
pub mod format;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod value;

pub use error::{Error, Result, SourceLocation};
pub use interpreter::{Interpreter, NativeParam, NativeRegistry, NativeResult, NativeValue};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;
pub use value::Value;

/// Lex, parse, and resolve a program source into a runnable AST
pub fn compile(source: &str) -> Result<ast::Program> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize()?;
    let mut parser = Parser::new(tokens);
    let mut program = parser.parse()?;
    resolver::resolve(&mut program)?;
    Ok(program)
}

/// Like [`compile`], with host callbacks available to the program
pub fn compile_with_natives(source: &str, natives: &NativeRegistry) -> Result<ast::Program> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize()?;
    let mut parser = Parser::new(tokens);
    let mut program = parser.parse()?;
    resolver::Resolver::with_natives(natives.signatures()).resolve_program(&mut program)?;
    Ok(program)
}
