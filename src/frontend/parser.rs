use crate::frontend::lexer::{Span, Spanned};
use crate::frontend::parser_error::ParserError;
use crate::frontend::token::Token;
use crate::lang::{BinaryOp, Expr, ExprKind, FunctionDecl, Program, Stmt, StmtKind, Value, VarDecl};

enum Declaration {
    Variable(VarDecl),
    Function(FunctionDecl),
}

/// Recursive-descent parser for the C subset.
///
/// Consumes lexed `Spanned` tokens and produces a `Program` holding the
/// global variable declarations and the function definitions in source
/// order. Whether `main` exists is left to the code generator.
///
/// Notes:
/// - Every expression, statement and declaration records the line of its
///   first token.
/// - Calls and index expressions only accept a plain identifier as base.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Span of the most recently consumed token.
    ///
    /// Used to give end-of-input errors a real source location.
    last_span: Option<Span>,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser {
            tokens,
            pos: 0,
            last_span: None,
        }
    }

    fn current(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    /// Advances the token stream by one and returns the consumed token.
    fn advance(&mut self) -> Option<&Spanned> {
        let token = self.tokens.get(self.pos);
        if let Some(s) = token {
            self.last_span = Some(s.span);
        }
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Eof))
    }

    /// Line of the current token, or of the last consumed one at end of input.
    fn line(&self) -> usize {
        self.current()
            .map(|s| s.span.line)
            .or(self.last_span.map(|s| s.line))
            .unwrap_or(1)
    }

    /// Constructs a `ParserError` at the most relevant location.
    ///
    /// Priority:
    /// 1. If `current()` exists, use its span.
    /// 2. Else, use `last_span` (after falling off the end).
    /// 3. Else, default to (1,1) for truly empty input.
    fn error(&self, message: &str) -> ParserError {
        let span = self
            .current()
            .map(|s| s.span)
            .or(self.last_span)
            .unwrap_or(Span { line: 1, col: 1 });
        ParserError {
            message: message.to_string(),
            line: span.line,
            col: span.col,
        }
    }

    /// Consumes `token` or fails with "expected `what`".
    fn expect(&mut self, token: Token, what: &str) -> Result<(), ParserError> {
        if self.check(&token) {
            self.advance();
            Ok(())
        } else {
            let found = self.peek().map(|t| t.to_string()).unwrap_or_default();
            Err(self.error(&format!("expected {}, found '{}'", what, found)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParserError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(&format!("expected {}", what))),
        }
    }

    /// Parses a complete translation unit.
    ///
    /// Only variable and function declarations may appear at top level.
    pub fn parse(&mut self) -> Result<Program, ParserError> {
        let mut globals = Vec::new();
        let mut functions = Vec::new();

        while !self.at_end() {
            if !self.check(&Token::Int) {
                return Err(self.error("only declarations are allowed at top level"));
            }
            match self.parse_declaration()? {
                Declaration::Variable(decl) => globals.push(decl),
                Declaration::Function(decl) => functions.push(decl),
            }
        }

        Ok(Program { globals, functions })
    }

    /// Parses `int*? name` and dispatches to a function definition when the
    /// name is followed by `(`, else to a variable declaration.
    fn parse_declaration(&mut self) -> Result<Declaration, ParserError> {
        let line = self.line();
        let ty = self.parse_type()?;
        let name = self.expect_ident("a name after the type")?;

        if self.check(&Token::LParen) {
            if ty.ends_with("[]") {
                return Err(self.error("functions cannot return arrays"));
            }
            return self.parse_function(ty, name, line).map(Declaration::Function);
        }

        let decl = self.parse_variable_rest(ty, name, line)?;
        self.expect(Token::Semicolon, "';' after declaration")?;
        Ok(Declaration::Variable(decl))
    }

    /// ```text
    /// type := "int" "*"? ("[" "]")?
    /// ```
    fn parse_type(&mut self) -> Result<String, ParserError> {
        self.expect(Token::Int, "type 'int'")?;
        let mut ty = "int".to_string();
        if self.check(&Token::Star) {
            self.advance();
            ty.push('*');
        }
        if self.check(&Token::LBracket) {
            self.advance();
            self.expect(Token::RBracket, "']' in array type")?;
            ty.push_str("[]");
        }
        Ok(ty)
    }

    /// Parses what follows the name of a variable: an array size `[N]`, an
    /// initializer `= expr`, or nothing.
    fn parse_variable_rest(
        &mut self,
        ty: String,
        name: String,
        line: usize,
    ) -> Result<VarDecl, ParserError> {
        let mut decl = if self.check(&Token::LBracket) {
            self.advance();
            let elements = match self.peek() {
                Some(Token::Integer(n)) if *n > 0 => *n as usize,
                _ => return Err(self.error("array size must be a positive integer literal")),
            };
            self.advance();
            self.expect(Token::RBracket, "']' after array size")?;
            VarDecl::array(&ty, &name, elements)
        } else if ty.ends_with("[]") {
            return Err(self.error("array declaration needs a size"));
        } else if self.check(&Token::Assign) {
            self.advance();
            let init = self.parse_expression()?;
            VarDecl::scalar(&ty, &name, Some(init))
        } else {
            VarDecl::scalar(&ty, &name, None)
        };
        decl.line = line;
        Ok(decl)
    }

    /// ```text
    /// fn_decl := type IDENT "(" (param ("," param)*)? ")" block
    /// ```
    fn parse_function(
        &mut self,
        return_type: String,
        name: String,
        line: usize,
    ) -> Result<FunctionDecl, ParserError> {
        self.expect(Token::LParen, "'('")?;

        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                params.push(self.parse_parameter()?);
                if self.check(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')' after parameters")?;

        if !self.check(&Token::LBrace) {
            return Err(self.error("expected '{' to open the function body"));
        }
        let body = self.parse_block()?;

        Ok(FunctionDecl {
            return_type,
            name,
            params,
            body,
            line,
        })
    }

    fn parse_parameter(&mut self) -> Result<VarDecl, ParserError> {
        let line = self.line();
        let ty = self.parse_type()?;
        let name = self.expect_ident("a parameter name")?;

        match self.peek() {
            Some(Token::LBracket) => {
                Err(self.error("arrays need to be passed to functions as pointers"))
            }
            _ if ty.ends_with("[]") => {
                Err(self.error("arrays need to be passed to functions as pointers"))
            }
            Some(Token::Assign) => Err(self.error("parameters cannot have default values")),
            _ => {
                let mut decl = VarDecl::scalar(&ty, &name, None);
                decl.line = line;
                Ok(decl)
            }
        }
    }

    /// Parses `{ stmt* }` and returns the statements.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParserError> {
        self.expect(Token::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.error("unexpected EOF, expected '}'"));
            }
            stmts.push(self.parse_statement()?);
        }
        self.advance();
        Ok(stmts)
    }

    /// Parses one statement.
    ///
    /// A declaration inside a body is returned as a statement; a nested
    /// function definition is rejected later by the code generator.
    fn parse_statement(&mut self) -> Result<Stmt, ParserError> {
        let line = self.line();

        let kind = match self.peek() {
            Some(Token::LBrace) => StmtKind::Block(self.parse_block()?),
            Some(Token::Int) => match self.parse_declaration()? {
                Declaration::Variable(decl) => StmtKind::VarDecl(decl),
                Declaration::Function(decl) => StmtKind::FunctionDecl(decl),
            },
            Some(Token::If) => self.parse_if()?,
            Some(Token::While) => {
                self.advance();
                let condition = self.parse_condition("while")?;
                let body = self.parse_statement()?;
                StmtKind::While {
                    condition,
                    body: Box::new(body),
                }
            }
            Some(Token::Return) => {
                self.advance();
                let value = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(Token::Semicolon, "';' after return")?;
                StmtKind::Return(value)
            }
            Some(Token::Print) => {
                self.advance();
                self.expect(Token::LParen, "'(' after 'print'")?;
                let value = self.parse_expression()?;
                self.expect(Token::RParen, "')' after print argument")?;
                self.expect(Token::Semicolon, "';' after print")?;
                StmtKind::Print(value)
            }
            Some(Token::Semicolon) => {
                self.advance();
                StmtKind::Block(Vec::new())
            }
            _ => {
                let e = self.parse_expression()?;
                self.expect(Token::Semicolon, "';' after expression")?;
                StmtKind::Expr(e)
            }
        };

        Ok(Stmt::new(kind).at(line))
    }

    /// ```text
    /// if "(" expr ")" stmt ("else" stmt)?
    /// ```
    fn parse_if(&mut self) -> Result<StmtKind, ParserError> {
        self.advance();
        let condition = self.parse_condition("if")?;
        let then_branch = self.parse_statement()?;
        let else_branch = if self.check(&Token::Else) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            condition,
            then_branch: Some(Box::new(then_branch)),
            else_branch,
        })
    }

    fn parse_condition(&mut self, keyword: &str) -> Result<Expr, ParserError> {
        self.expect(Token::LParen, &format!("'(' after '{}'", keyword))?;
        let condition = self.parse_expression()?;
        self.expect(Token::RParen, "')' after condition")?;
        Ok(condition)
    }

    pub fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        self.parse_assignment()
    }

    /// Right associative: `a = b = c` is `a = (b = c)`. Whether the target
    /// is assignable is checked by the code generator.
    fn parse_assignment(&mut self) -> Result<Expr, ParserError> {
        let line = self.line();
        let target = self.parse_binary(0)?;
        if self.check(&Token::Assign) {
            self.advance();
            let value = self.parse_assignment()?;
            return Ok(Expr::assign(target, value).at(line));
        }
        Ok(target)
    }

    /// Precedence climbing over the binary levels, loosest first.
    fn parse_binary(&mut self, level: usize) -> Result<Expr, ParserError> {
        if level == LEVELS.len() {
            return self.parse_unary();
        }

        let mut left = self.parse_binary(level + 1)?;
        while let Some(op) = self.peek().and_then(|t| binary_op(t, level)) {
            let line = self.line();
            self.advance();
            let right = self.parse_binary(level + 1)?;
            left = Expr::binary(op, left, right).at(line);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        let line = self.line();
        let wrap: fn(Expr) -> Expr = match self.peek() {
            Some(Token::Bang) => Expr::not,
            Some(Token::Minus) => Expr::negate,
            Some(Token::Amp) => Expr::address_of,
            Some(Token::Star) => Expr::deref,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(wrap(operand).at(line))
    }

    /// Call `f(args)` and index `a[i]` on a plain identifier.
    fn parse_postfix(&mut self) -> Result<Expr, ParserError> {
        let line = self.line();
        let base = self.parse_primary()?;

        let name = match &base.kind {
            ExprKind::Variable(name) => name.clone(),
            _ => {
                return match self.peek() {
                    Some(Token::LParen) => Err(self.error("only named functions can be called")),
                    Some(Token::LBracket) => Err(self.error("only named arrays can be indexed")),
                    _ => Ok(base),
                };
            }
        };

        match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                let args = self.parse_arguments()?;
                self.reject_postfix()?;
                Ok(Expr::call(&name, args).at(line))
            }
            Some(Token::LBracket) => {
                self.advance();
                let index = self.parse_expression()?;
                self.expect(Token::RBracket, "']' after index")?;
                self.reject_postfix()?;
                Ok(Expr::index(&name, index).at(line))
            }
            _ => Ok(base),
        }
    }

    fn reject_postfix(&self) -> Result<(), ParserError> {
        match self.peek() {
            Some(Token::LParen) => Err(self.error("only named functions can be called")),
            Some(Token::LBracket) => Err(self.error("only named arrays can be indexed")),
            _ => Ok(()),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParserError> {
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if self.check(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')' after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParserError> {
        let line = self.line();
        let kind = match self.peek() {
            Some(Token::Integer(n)) => ExprKind::Literal(Value::Int(*n)),
            Some(Token::Float(x)) => ExprKind::Literal(Value::Float(*x)),
            Some(Token::String(s)) => ExprKind::Literal(Value::Text(s.clone())),
            Some(Token::Ident(name)) => ExprKind::Variable(name.clone()),
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                return Ok(inner);
            }
            Some(Token::Eof) | None => return Err(self.error("unexpected EOF in expression")),
            Some(t) => return Err(self.error(&format!("unexpected token: '{}'", t))),
        };
        self.advance();
        Ok(Expr::new(kind).at(line))
    }
}

/// Binary operator levels, loosest binding first.
const LEVELS: [&[(Token, BinaryOp)]; 6] = [
    &[(Token::OrOr, BinaryOp::Or)],
    &[(Token::AndAnd, BinaryOp::And)],
    &[(Token::EqEq, BinaryOp::Equal), (Token::NotEq, BinaryOp::NotEqual)],
    &[
        (Token::Lt, BinaryOp::Less),
        (Token::LtEq, BinaryOp::LessEqual),
        (Token::Gt, BinaryOp::Greater),
        (Token::GtEq, BinaryOp::GreaterEqual),
    ],
    &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
    &[
        (Token::Star, BinaryOp::Mul),
        (Token::Slash, BinaryOp::Div),
        (Token::Percent, BinaryOp::Mod),
    ],
];

fn binary_op(token: &Token, level: usize) -> Option<BinaryOp> {
    LEVELS[level]
        .iter()
        .find(|(t, _)| t == token)
        .map(|(_, op)| *op)
}
