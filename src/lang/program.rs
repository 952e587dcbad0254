use super::node::{FunctionDecl, VarDecl};
use crate::bytecode::compile_error::CompileError;

/// Name of the function the machine calls on start-up.
pub const ENTRY_POINT: &str = "main";

/// Parsed translation unit: global variables plus function definitions.
#[derive(Debug, Clone)]
pub struct Program {
    pub globals: Vec<VarDecl>,
    pub functions: Vec<FunctionDecl>,
}

impl Program {
    /// Builds a program, rejecting it when no function is named `main`.
    pub fn new(globals: Vec<VarDecl>, functions: Vec<FunctionDecl>) -> Result<Self, CompileError> {
        let program = Program { globals, functions };
        program.check_entry_point()?;
        Ok(program)
    }

    pub fn check_entry_point(&self) -> Result<(), CompileError> {
        if self.functions.iter().any(|f| f.name == ENTRY_POINT) {
            Ok(())
        } else {
            Err(CompileError::MissingMain)
        }
    }
}
