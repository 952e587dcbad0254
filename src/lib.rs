//! Compiler and stack machine for a small C subset.
//!
//! Source text goes through [`frontend`] into the [`lang`] syntax tree,
//! [`bytecode`] turns the tree into a relocatable [`Code`] container, and
//! [`runtime`] executes it.

pub mod bytecode;
pub mod config;
pub mod frontend;
pub mod lang;
pub mod runtime;

pub use bytecode::{Code, CodeGenerator, CompileError, Instr};
pub use config::{Config, ConfigError};
pub use lang::{Program, Value};
pub use runtime::{RuntimeError, Vm, VmConfig};

use frontend::{Lexer, LexerError, Parser, ParserError};
use thiserror::Error;

/// Anything that can stop source text from becoming code.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("lexer error: {0}")]
    Lex(#[from] LexerError),

    #[error("parse error: {0}")]
    Parse(#[from] ParserError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

pub fn parse_source(source: &str) -> Result<Program, BuildError> {
    let tokens = Lexer::new(source).tokenize()?;
    Ok(Parser::new(tokens).parse()?)
}

pub fn compile_source(source: &str) -> Result<Code, BuildError> {
    let program = parse_source(source)?;
    Ok(CodeGenerator::new().generate_program(&program)?)
}
