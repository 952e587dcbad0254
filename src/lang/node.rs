use super::value::Value;
use crate::bytecode::compile_error::CompileError;

/// Binary operators of the source language.
///
/// Each one maps onto exactly one machine instruction; `&&` and `||`
/// evaluate both operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

impl std::str::FromStr for BinaryOp {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Mod,
            "<" => BinaryOp::Less,
            "<=" => BinaryOp::LessEqual,
            ">" => BinaryOp::Greater,
            ">=" => BinaryOp::GreaterEqual,
            "==" => BinaryOp::Equal,
            "!=" => BinaryOp::NotEqual,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            other => return Err(CompileError::UnknownOperator(other.to_string())),
        })
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Expression node with the source line it came from (0 if synthesized).
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    // ───────────────────────────── r-value only ─────────────────────────
    /// Constant pushed as-is: `5`, `"text"`.
    Literal(Value),

    /// `left op right`, both sides always evaluated.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `&e`: the address of `e`.
    AddressOf(Box<Expr>),

    /// `name(args...)`
    Call { name: String, args: Vec<Expr> },

    /// `target = value`, yields the stored value.
    Assign { target: Box<Expr>, value: Box<Expr> },

    /// `!e`
    Not(Box<Expr>),

    /// `-e`
    Negate(Box<Expr>),

    // ───────────────────────────── l- and r-value ───────────────────────
    /// A named variable.
    Variable(String),

    /// `array[index]`. The base is always a declared variable.
    Index { array: String, index: Box<Expr> },

    /// `*e`
    Deref(Box<Expr>),
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr { kind, line: 0 }
    }

    pub fn at(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn int(n: i64) -> Self {
        Self::new(ExprKind::Literal(Value::Int(n)))
    }

    pub fn text(s: &str) -> Self {
        Self::new(ExprKind::Literal(Value::Text(s.to_string())))
    }

    pub fn var(name: &str) -> Self {
        Self::new(ExprKind::Variable(name.to_string()))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::new(ExprKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn index(array: &str, index: Expr) -> Self {
        Self::new(ExprKind::Index {
            array: array.to_string(),
            index: Box::new(index),
        })
    }

    pub fn address_of(e: Expr) -> Self {
        Self::new(ExprKind::AddressOf(Box::new(e)))
    }

    pub fn deref(e: Expr) -> Self {
        Self::new(ExprKind::Deref(Box::new(e)))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            name: name.to_string(),
            args,
        })
    }

    pub fn not(e: Expr) -> Self {
        Self::new(ExprKind::Not(Box::new(e)))
    }

    pub fn negate(e: Expr) -> Self {
        Self::new(ExprKind::Negate(Box::new(e)))
    }

    /// Short name of the node kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Literal(_) => "literal",
            ExprKind::Binary { .. } => "binary operation",
            ExprKind::AddressOf(_) => "address expression (&)",
            ExprKind::Call { .. } => "function call",
            ExprKind::Assign { .. } => "assignment",
            ExprKind::Not(_) => "negated expression (!)",
            ExprKind::Negate(_) => "unary minus expression",
            ExprKind::Variable(_) => "variable",
            ExprKind::Index { .. } => "array access",
            ExprKind::Deref(_) => "dereference",
        }
    }
}

/// Variable declaration: globals, locals and function parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    /// `int`, `int*`, with a `[]` suffix for arrays.
    pub ty: String,
    pub name: String,
    /// Number of elements; 1 for scalars.
    pub elements: usize,
    pub initializer: Option<Expr>,
    pub line: usize,
}

impl VarDecl {
    pub fn scalar(ty: &str, name: &str, initializer: Option<Expr>) -> Self {
        VarDecl {
            ty: ty.to_string(),
            name: name.to_string(),
            elements: 1,
            initializer,
            line: 0,
        }
    }

    pub fn array(element_ty: &str, name: &str, elements: usize) -> Self {
        VarDecl {
            ty: format!("{}[]", element_ty.trim_end_matches("[]")),
            name: name.to_string(),
            elements,
            initializer: None,
            line: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub return_type: String,
    pub name: String,
    pub params: Vec<VarDecl>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression evaluated for its effect; the value is discarded.
    Expr(Expr),
    Block(Vec<Stmt>),
    If {
        condition: Expr,
        then_branch: Option<Box<Stmt>>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    Print(Expr),
    Return(Option<Expr>),
    VarDecl(VarDecl),
    FunctionDecl(FunctionDecl),
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Stmt { kind, line: 0 }
    }

    pub fn at(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn expr(e: Expr) -> Self {
        Self::new(StmtKind::Expr(e))
    }

    pub fn block(stmts: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Block(stmts))
    }

    pub fn print(e: Expr) -> Self {
        Self::new(StmtKind::Print(e))
    }

    pub fn ret(e: Option<Expr>) -> Self {
        Self::new(StmtKind::Return(e))
    }

    pub fn decl(decl: VarDecl) -> Self {
        let line = decl.line;
        Self::new(StmtKind::VarDecl(decl)).at(line)
    }

    pub fn if_else(condition: Expr, then_branch: Option<Stmt>, else_branch: Option<Stmt>) -> Self {
        Self::new(StmtKind::If {
            condition,
            then_branch: then_branch.map(Box::new),
            else_branch: else_branch.map(Box::new),
        })
    }

    pub fn while_loop(condition: Expr, body: Stmt) -> Self {
        Self::new(StmtKind::While {
            condition,
            body: Box::new(body),
        })
    }

    pub fn function(decl: FunctionDecl) -> Self {
        let line = decl.line;
        Self::new(StmtKind::FunctionDecl(decl)).at(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_symbols_round_trip() {
        for op in [
            BinaryOp::Add,
            BinaryOp::Mod,
            BinaryOp::LessEqual,
            BinaryOp::NotEqual,
            BinaryOp::And,
            BinaryOp::Or,
        ] {
            assert_eq!(op.symbol().parse::<BinaryOp>().unwrap(), op);
        }
    }

    #[test]
    fn test_unknown_operator_is_compile_error() {
        let err = "<<".parse::<BinaryOp>().unwrap_err();
        assert!(matches!(err, CompileError::UnknownOperator(ref s) if s == "<<"));
    }

    #[test]
    fn test_array_decl_type() {
        let decl = VarDecl::array("int*", "parr", 2);
        assert_eq!(decl.ty, "int*[]");
        assert_eq!(decl.elements, 2);
    }
}
