use crate::bytecode::op::{Instr, Label};
use thiserror::Error;

/// What went wrong inside the machine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeErrorKind {
    #[error("stack underflow: needed {needed} cell(s), {available} available")]
    StackUnderflow { needed: usize, available: usize },

    #[error("stack overflow: capacity of {capacity} cells exceeded")]
    StackOverflow { capacity: usize },

    #[error("program of {len} instructions exceeds the code capacity of {capacity}")]
    CodeCapacityExceeded { len: usize, capacity: usize },

    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("unresolved jump label {0}")]
    UnresolvedLabel(Label),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("invalid address {0}")]
    InvalidAddress(i64),

    #[error("division by zero")]
    DivisionByZero,

    /// Control reached an index with no instruction behind it.
    #[error("no instruction to execute")]
    NoInstruction,

    #[error("return without an active call frame")]
    ReturnWithoutFrame,

    #[error("execution step limit exceeded ({0})")]
    StepLimitExceeded(usize),

    #[error("call depth limit exceeded ({0}), possible infinite recursion")]
    CallDepthExceeded(usize),

    #[error("cannot write output: {0}")]
    Output(String),
}

/// Fatal machine error with the program counter of the offending
/// instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub pc: usize,
    pub instruction: Option<Instr>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, pc: usize, instruction: Option<Instr>) -> Self {
        RuntimeError {
            kind,
            pc,
            instruction,
        }
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error at pc {}", self.pc)?;
        if let Some(instr) = &self.instruction {
            write!(f, " ({})", instr)?;
        }
        write!(f, ": {}", self.kind)
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_pc_and_instruction() {
        let err = RuntimeError::new(
            RuntimeErrorKind::StackUnderflow {
                needed: 4,
                available: 1,
            },
            7,
            Some(Instr::Slide(3)),
        );
        assert_eq!(
            err.to_string(),
            "runtime error at pc 7 (Slide 3): stack underflow: needed 4 cell(s), 1 available"
        );
    }

    #[test]
    fn test_display_without_instruction() {
        let err = RuntimeError::new(RuntimeErrorKind::NoInstruction, 12, None);
        assert_eq!(err.to_string(), "runtime error at pc 12: no instruction to execute");
    }
}
