use thiserror::Error;

/// A parsing error with source location.
///
/// `line` and `col` are 1-based and come from the lexer spans. Errors at end
/// of input fall back to the last consumed token, so a location is never `0:0`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{line}:{col}: {message}")]
pub struct ParserError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}
