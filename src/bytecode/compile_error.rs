use thiserror::Error;

/// Source line attached to a diagnostic. Line 0 means "not known" and
/// renders as nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Line(pub usize);

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            Ok(())
        } else {
            write!(f, "line {}: ", self.0)
        }
    }
}

/// Errors raised while translating a syntax tree into bytecode.
///
/// None of these are recoverable: the generator aborts the whole
/// translation unit on the first one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// An l-value was requested from an expression that only has a value.
    #[error("compile error: {line}{what} has no l-value")]
    NoLValue { what: &'static str, line: Line },

    #[error("compile error: unknown binary operator '{0}'")]
    UnknownOperator(String),

    #[error("compile error: {line}needs to have an if branch to have an else branch")]
    ElseWithoutIf { line: Line },

    #[error("compile error: function '{0}' is declared multiple times")]
    DuplicateFunction(String),

    #[error("compile error: program lacks entry point 'main'")]
    MissingMain,

    #[error("compile error: {line}use of undeclared variable '{name}'")]
    UndeclaredVariable { name: String, line: Line },

    #[error("compile error: {line}unknown type '{ty}'")]
    UnknownType { ty: String, line: Line },

    /// Arrays need at least one element and scalars exactly one.
    #[error("compile error: {line}invalid declaration of '{name}': type '{ty}' with {elements} element(s)")]
    InvalidDeclaration {
        name: String,
        ty: String,
        elements: usize,
        line: Line,
    },

    /// The variable's cells do not fit in the addressable stack range.
    #[error("compile error: {line}storage for '{name}' exceeds the addressable range")]
    StorageOverflow { name: String, line: Line },

    #[error("compile error: {line}return outside of a function")]
    ReturnOutsideFunction { line: Line },

    #[error("compile error: {line}function '{name}' declared inside another function")]
    NestedFunction { name: String, line: Line },

    /// A jump still points at a label the container does not define.
    #[error("compile error: instruction {index} jumps to unresolved label {label}")]
    UnresolvedLabel { index: usize, label: usize },

    /// A relocation table entry points past the end of the instructions.
    #[error("compile error: {table} entry '{key}' points outside the code ({target} > {len})")]
    TargetOutOfRange {
        table: &'static str,
        key: String,
        target: usize,
        len: usize,
    },
}

impl CompileError {
    pub fn no_lvalue(what: &'static str, line: usize) -> Self {
        CompileError::NoLValue {
            what,
            line: Line(line),
        }
    }

    pub fn undeclared(name: &str, line: usize) -> Self {
        CompileError::UndeclaredVariable {
            name: name.to_string(),
            line: Line(line),
        }
    }

    pub fn unknown_type(ty: &str, line: usize) -> Self {
        CompileError::UnknownType {
            ty: ty.to_string(),
            line: Line(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_reported_when_known() {
        let err = CompileError::no_lvalue("literal", 12);
        assert_eq!(err.to_string(), "compile error: line 12: literal has no l-value");
    }

    #[test]
    fn test_line_is_omitted_when_unknown() {
        let err = CompileError::undeclared("x", 0);
        assert_eq!(err.to_string(), "compile error: use of undeclared variable 'x'");
    }
}
