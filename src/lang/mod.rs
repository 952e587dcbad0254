//! # Abstract Syntax Tree
//!
//! This module defines the syntax tree for the C subset and the value type
//! shared by literals and the machine stack. The tree is produced by the
//! parser and consumed by the bytecode generator.
//!
//! ## Documentation conventions
//!
//! - Stack effects are written as `( before -- after )`.
//! - `line` fields are 1-based; 0 marks a node built in code rather than
//!   parsed from source.

pub mod node;
pub mod program;
pub mod value;

pub use node::{BinaryOp, Expr, ExprKind, FunctionDecl, Stmt, StmtKind, VarDecl};
pub use program::Program;
pub use value::Value;
