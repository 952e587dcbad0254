use crate::bytecode::compile_error::CompileError;
use std::collections::HashMap;

/// Storage class of a variable: absolute address or frame-relative offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Global,
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub visibility: Visibility,
    /// Absolute cell for globals, offset from the frame pointer for locals.
    pub address: i64,
    pub ty: String,
}

/// Compile-time symbol table.
///
/// Globals live for the whole translation unit. While a function body is
/// compiled, a function scope sits in front of them: lookups try it first,
/// and leaving the function drops it along with every parameter and local.
#[derive(Debug, Default)]
pub struct Environment {
    globals: HashMap<String, Binding>,
    function: Option<HashMap<String, Binding>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_global(&mut self, name: &str, ty: &str, address: i64) {
        self.globals.insert(
            name.to_string(),
            Binding {
                visibility: Visibility::Global,
                address,
                ty: ty.to_string(),
            },
        );
    }

    /// Binds a parameter or local in the current function scope.
    pub fn define_local(&mut self, name: &str, ty: &str, offset: i64) {
        self.function.get_or_insert_with(HashMap::new).insert(
            name.to_string(),
            Binding {
                visibility: Visibility::Local,
                address: offset,
                ty: ty.to_string(),
            },
        );
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.function
            .as_ref()
            .and_then(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    pub fn resolve(&self, name: &str, line: usize) -> Result<&Binding, CompileError> {
        self.lookup(name)
            .ok_or_else(|| CompileError::undeclared(name, line))
    }

    pub fn enter_function(&mut self) {
        self.function = Some(HashMap::new());
    }

    pub fn leave_function(&mut self) {
        self.function = None;
    }

    pub fn in_function(&self) -> bool {
        self.function.is_some()
    }
}

/// Element type of an array type; other types are returned unchanged.
pub fn base_type(ty: &str) -> &str {
    ty.strip_suffix("[]").unwrap_or(ty)
}

/// Cells occupied by one value of `ty` (arrays: by one element).
pub fn size_of(ty: &str, line: usize) -> Result<usize, CompileError> {
    match base_type(ty) {
        "int" | "int*" => Ok(1),
        other => Err(CompileError::unknown_type(other, line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locals_shadow_globals() {
        let mut env = Environment::new();
        env.define_global("x", "int", 0);
        env.enter_function();
        env.define_local("x", "int*", -4);

        let binding = env.lookup("x").unwrap();
        assert_eq!(binding.visibility, Visibility::Local);
        assert_eq!(binding.address, -4);
        assert_eq!(binding.ty, "int*");
    }

    #[test]
    fn test_leaving_function_drops_locals() {
        let mut env = Environment::new();
        env.define_global("g", "int", 3);
        env.enter_function();
        env.define_local("n", "int", -4);
        assert!(env.in_function());
        env.leave_function();

        assert!(env.lookup("n").is_none());
        assert_eq!(env.lookup("g").unwrap().address, 3);
    }

    #[test]
    fn test_resolve_reports_line() {
        let env = Environment::new();
        let err = env.resolve("missing", 7).unwrap_err();
        assert_eq!(err, CompileError::undeclared("missing", 7));
    }

    #[test]
    fn test_size_table() {
        assert_eq!(base_type("int*[]"), "int*");
        assert_eq!(base_type("int"), "int");
        assert_eq!(size_of("int[]", 1).unwrap(), 1);
        assert_eq!(size_of("int*", 1).unwrap(), 1);
        assert!(matches!(
            size_of("char", 2),
            Err(CompileError::UnknownType { .. })
        ));
    }
}
