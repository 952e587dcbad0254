use crate::bytecode::code::Code;
use crate::bytecode::compile_error::{CompileError, Line};
use crate::bytecode::env::{Environment, Visibility, base_type, size_of};
use crate::bytecode::op::Instr;
use crate::lang::node::{BinaryOp, Expr, ExprKind, FunctionDecl, Stmt, StmtKind, VarDecl};
use crate::lang::program::{ENTRY_POINT, Program};
use crate::lang::value::Value;
use tracing::debug;

/// Frame offset of the return-value slot.
const RETURN_SLOT: i64 = -3;

/// Tree-walking translator from syntax tree to bytecode.
///
/// Every node produces its own [`Code`] container, which the parent merges
/// into its own. Expressions are compiled either for their value
/// ([`CodeGenerator::code_r`]) or for their address
/// ([`CodeGenerator::code_l`]).
pub struct CodeGenerator {
    env: Environment,

    /// First free absolute cell for globals.
    next_global: i64,

    /// First free frame offset for locals of the current function.
    next_local: i64,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
            next_global: 0,
            next_local: 1,
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Compiles a whole program.
    ///
    /// ```text
    /// <globals>            Alloc + initializer per declaration
    /// LoadC 0              return-value cell of main
    /// Mark
    /// LoadC 'main'
    /// Call
    /// Slide <global cells> main's result ends up in cell 0
    /// Halt
    /// <functions>
    /// ```
    pub fn generate_program(mut self, program: &Program) -> Result<Code, CompileError> {
        program.check_entry_point()?;

        let mut code = Code::new();
        for decl in &program.globals {
            code.add_code(self.declare(decl)?)?;
        }

        let cells = self.next_global as usize;
        debug!(globals = program.globals.len(), cells, "laid out globals");

        code.add_code(call_linkage(ENTRY_POINT))?;
        code.add_instruction(Instr::Slide(cells));
        code.add_instruction(Instr::Halt);

        for function in &program.functions {
            code.add_code(self.function(function)?)?;
        }

        code.verify()?;
        debug!(instructions = code.len(), "program verified");
        Ok(code)
    }

    /// Compiles a flat statement list as a script.
    ///
    /// Declarations become globals at fixed addresses from 0, the remaining
    /// statements run in order, and function declarations are placed after
    /// the closing `Halt`.
    pub fn generate_statements(mut self, stmts: &[Stmt]) -> Result<Code, CompileError> {
        let mut code = Code::new();
        let mut functions = Code::new();

        for stmt in stmts {
            match &stmt.kind {
                StmtKind::FunctionDecl(function) => functions.add_code(self.function(function)?)?,
                _ => code.add_code(self.code_stmt(stmt)?)?,
            }
        }

        code.add_instruction(Instr::Halt);
        code.add_code(functions)?;
        code.verify()?;
        debug!(instructions = code.len(), "script verified");
        Ok(code)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Compiles one statement. Statements leave the stack as they found it.
    pub fn code_stmt(&mut self, stmt: &Stmt) -> Result<Code, CompileError> {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                let mut code = self.code_r(e)?;
                code.add_instruction(Instr::Pop);
                Ok(code)
            }

            StmtKind::Block(stmts) => {
                let mut code = Code::new();
                for s in stmts {
                    code.add_code(self.code_stmt(s)?)?;
                }
                Ok(code)
            }

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => match (then_branch, else_branch) {
                (None, Some(_)) => Err(CompileError::ElseWithoutIf {
                    line: Line(stmt.line),
                }),
                (then_branch, None) => self.if_without_else(condition, then_branch.as_deref()),
                (Some(then_branch), Some(else_branch)) => {
                    self.if_else(condition, then_branch, else_branch)
                }
            },

            StmtKind::While { condition, body } => {
                let mut code = Code::new();
                let head = code.add_jump_label_at_end();
                code.add_code(self.code_r(condition)?)?;
                let exit = code.emit_jump(Instr::JumpZ);
                code.add_code(self.code_stmt(body)?)?;
                code.add_instruction(Instr::Jump(head));
                let end = code.add_jump_label_at_end();
                code.patch_jump(exit, end);
                Ok(code)
            }

            StmtKind::Print(e) => {
                let mut code = self.code_r(e)?;
                code.add_instruction(Instr::Print);
                Ok(code)
            }

            StmtKind::Return(value) => {
                if !self.env.in_function() {
                    return Err(CompileError::ReturnOutsideFunction {
                        line: Line(stmt.line),
                    });
                }

                let mut code = Code::new();
                // without a value the caller's zero placeholder is the result
                if let Some(e) = value {
                    code.add_code(self.code_r(e)?)?;
                    code.add_instruction(Instr::LoadRC(RETURN_SLOT));
                    code.add_instruction(Instr::Store);
                }
                code.add_instruction(Instr::Return);
                Ok(code)
            }

            StmtKind::VarDecl(decl) => self.declare(decl),

            StmtKind::FunctionDecl(function) => self.function(function),
        }
    }

    fn if_without_else(
        &mut self,
        condition: &Expr,
        then_branch: Option<&Stmt>,
    ) -> Result<Code, CompileError> {
        let mut code = self.code_r(condition)?;
        let skip = code.emit_jump(Instr::JumpZ);
        if let Some(then_branch) = then_branch {
            code.add_code(self.code_stmt(then_branch)?)?;
        }
        let end = code.add_jump_label_at_end();
        code.patch_jump(skip, end);
        Ok(code)
    }

    fn if_else(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: &Stmt,
    ) -> Result<Code, CompileError> {
        let mut code = self.code_r(condition)?;
        let to_else = code.emit_jump(Instr::JumpZ);
        code.add_code(self.code_stmt(then_branch)?)?;
        let over_else = code.emit_jump(Instr::Jump);

        let else_label = code.add_jump_label_at_end();
        code.patch_jump(to_else, else_label);

        code.add_code(self.code_stmt(else_branch)?)?;
        let end = code.add_jump_label_at_end();
        code.patch_jump(over_else, end);
        Ok(code)
    }

    /// Binds a variable and emits its initializer.
    ///
    /// Globals reserve their cells here; locals are covered by the single
    /// `Alloc` in the function prologue.
    fn declare(&mut self, decl: &VarDecl) -> Result<Code, CompileError> {
        let is_array = decl.ty.ends_with("[]");
        if (is_array && decl.elements == 0) || (!is_array && decl.elements != 1) {
            return Err(CompileError::InvalidDeclaration {
                name: decl.name.clone(),
                ty: decl.ty.clone(),
                elements: decl.elements,
                line: Line(decl.line),
            });
        }

        let overflow = || CompileError::StorageOverflow {
            name: decl.name.clone(),
            line: Line(decl.line),
        };
        let cells = decl
            .elements
            .checked_mul(size_of(&decl.ty, decl.line)?)
            .ok_or_else(overflow)?;
        let width = i64::try_from(cells).map_err(|_| overflow())?;
        let mut code = Code::new();

        if self.env.in_function() {
            let next = self.next_local.checked_add(width).ok_or_else(overflow)?;
            self.env.define_local(&decl.name, &decl.ty, self.next_local);
            self.next_local = next;
        } else {
            let next = self.next_global.checked_add(width).ok_or_else(overflow)?;
            self.env.define_global(&decl.name, &decl.ty, self.next_global);
            self.next_global = next;
            code.add_instruction(Instr::Alloc(cells));
        }

        if let Some(init) = &decl.initializer {
            let target = Expr::var(&decl.name).at(decl.line);
            let assign = Expr::assign(target, init.clone()).at(decl.line);
            code.add_code(self.code_r(&assign)?)?;
            code.add_instruction(Instr::Pop);
        }

        Ok(code)
    }

    /// Compiles a function: entry registration, frame prologue, body and a
    /// trailing `Return` that every path can fall through to.
    fn function(&mut self, function: &FunctionDecl) -> Result<Code, CompileError> {
        if self.env.in_function() {
            return Err(CompileError::NestedFunction {
                name: function.name.clone(),
                line: Line(function.line),
            });
        }

        self.env.enter_function();
        let saved_local = self.next_local;
        let body = self.function_body(function);
        self.next_local = saved_local;
        self.env.leave_function();
        let (body, frame_size) = body?;

        let mut code = Code::new();
        code.register_function(&function.name)?;
        if frame_size > 0 {
            code.add_instruction(Instr::Alloc(frame_size));
        }
        code.add_code(body)?;
        code.add_instruction(Instr::Return);

        debug!(
            function = %function.name,
            params = function.params.len(),
            frame_size,
            "compiled function"
        );
        Ok(code)
    }

    /// Body code and number of local cells it needs.
    fn function_body(&mut self, function: &FunctionDecl) -> Result<(Code, usize), CompileError> {
        // below the frame: return address (0), saved fp (-1), saved ep (-2),
        // return value (-3), then the parameters
        let mut offset = RETURN_SLOT;
        for param in &function.params {
            offset -= size_of(&param.ty, param.line)? as i64;
            self.env.define_local(&param.name, &param.ty, offset);
        }

        self.next_local = 1;
        let mut body = Code::new();
        for stmt in &function.body {
            body.add_code(self.code_stmt(stmt)?)?;
        }

        Ok((body, (self.next_local - 1) as usize))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Code leaving the value of `expr` on top of the stack.
    pub fn code_r(&mut self, expr: &Expr) -> Result<Code, CompileError> {
        match &expr.kind {
            ExprKind::Literal(value) => Ok(single(Instr::LoadC(value.clone()))),

            ExprKind::Binary { op, left, right } => {
                let mut code = self.code_r(left)?;
                code.add_code(self.code_r(right)?)?;
                code.add_instruction(binary_instr(*op));
                Ok(code)
            }

            ExprKind::Variable(_) | ExprKind::Index { .. } => {
                let mut code = self.code_l(expr)?;
                code.add_instruction(Instr::Load);
                Ok(code)
            }

            ExprKind::Deref(inner) => {
                let mut code = self.code_r(inner)?;
                code.add_instruction(Instr::Load);
                Ok(code)
            }

            ExprKind::AddressOf(inner) => self.code_l(inner),

            ExprKind::Call { name, args } => {
                let mut code = Code::new();
                // leftmost argument ends up on top
                for arg in args.iter().rev() {
                    code.add_code(self.code_r(arg)?)?;
                }
                code.add_code(call_linkage(name))?;
                code.add_instruction(Instr::Slide(args.len()));
                Ok(code)
            }

            ExprKind::Assign { target, value } => {
                let mut code = self.code_r(value)?;
                code.add_code(self.code_l(target)?)?;
                code.add_instruction(Instr::Store);
                Ok(code)
            }

            ExprKind::Not(inner) => {
                let mut code = self.code_r(inner)?;
                code.add_instruction(Instr::Not);
                Ok(code)
            }

            ExprKind::Negate(inner) => {
                let mut code = self.code_r(inner)?;
                code.add_instruction(Instr::FlipSign);
                Ok(code)
            }
        }
    }

    /// Code leaving the address of `expr` on top of the stack.
    pub fn code_l(&mut self, expr: &Expr) -> Result<Code, CompileError> {
        match &expr.kind {
            ExprKind::Variable(name) => {
                let binding = self.env.resolve(name, expr.line)?;
                Ok(single(match binding.visibility {
                    Visibility::Global => Instr::LoadC(Value::Int(binding.address)),
                    Visibility::Local => Instr::LoadRC(binding.address),
                }))
            }

            // base + index * element size
            ExprKind::Index { array, index } => {
                let element = {
                    let binding = self.env.resolve(array, expr.line)?;
                    size_of(base_type(&binding.ty), expr.line)?
                };

                let mut code = self.code_l(&Expr::var(array).at(expr.line))?;
                code.add_instruction(Instr::LoadC(Value::Int(element as i64)));
                code.add_code(self.code_r(index)?)?;
                code.add_instruction(Instr::Mul);
                code.add_instruction(Instr::Add);
                Ok(code)
            }

            // the address held by the pointer
            ExprKind::Deref(inner) => self.code_r(inner),

            _ => Err(CompileError::no_lvalue(expr.kind_name(), expr.line)),
        }
    }
}

fn single(instr: Instr) -> Code {
    Code::from_instructions(vec![instr])
}

/// Return-value placeholder, linkage cells and the transfer to `name`.
fn call_linkage(name: &str) -> Code {
    Code::from_instructions(vec![
        Instr::LoadC(Value::Int(0)),
        Instr::Mark,
        Instr::LoadC(Value::Text(name.to_string())),
        Instr::Call,
    ])
}

fn binary_instr(op: BinaryOp) -> Instr {
    match op {
        BinaryOp::Add => Instr::Add,
        BinaryOp::Sub => Instr::Sub,
        BinaryOp::Mul => Instr::Mul,
        BinaryOp::Div => Instr::Div,
        BinaryOp::Mod => Instr::Mod,
        BinaryOp::Less => Instr::Less,
        BinaryOp::LessEqual => Instr::LessOrEqual,
        BinaryOp::Greater => Instr::Greater,
        BinaryOp::GreaterEqual => Instr::GreaterOrEqual,
        BinaryOp::Equal => Instr::Equal,
        BinaryOp::NotEqual => Instr::UnEqual,
        BinaryOp::And => Instr::And,
        BinaryOp::Or => Instr::Or,
    }
}
