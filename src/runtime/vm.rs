use crate::bytecode::code::Code;
use crate::bytecode::op::{Instr, Label};
use crate::lang::value::Value;
use crate::runtime::runtime_error::{RuntimeError, RuntimeErrorKind};
use serde::Deserialize;
use std::io::Write;
use tracing::{trace, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Cells in the flat stack; fixed for the whole run.
    pub stack_capacity: usize,
    /// Largest program the instruction store accepts.
    pub code_capacity: usize,
    pub max_steps: Option<usize>,
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_capacity: 1000,
            code_capacity: 4096,
            max_steps: None,
            max_call_depth: 1000,
        }
    }
}

/// Snapshot of the control registers. Pointers are -1 when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub pc: usize,
    pub sp: isize,
    pub fp: isize,
    pub ep: isize,
}

type Step = Result<(), RuntimeErrorKind>;

/// Stack machine executing a [`Code`] container.
///
/// Frame layout after `Call`, relative to the frame pointer:
///
/// ```text
/// fp+1..     locals
/// fp         return address
/// fp-1       saved frame pointer
/// fp-2       saved extreme pointer
/// fp-3       return value
/// fp-4..     arguments, leftmost first
/// ```
pub struct Vm {
    config: VmConfig,
    stack: Vec<Value>,
    pc: usize,
    sp: isize,
    fp: isize,
    /// Highest stack index reached in the current frame.
    ep: isize,
    running: bool,
    steps: usize,
    call_depth: usize,
    peak_call_depth: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self {
            config,
            stack: Vec::new(),
            pc: 0,
            sp: -1,
            fp: -1,
            ep: -1,
            running: false,
            steps: 0,
            call_depth: 0,
            peak_call_depth: 0,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Live part of the stack, cell 0 up to the stack pointer.
    pub fn stack(&self) -> &[Value] {
        let live = usize::try_from(self.sp + 1).unwrap_or(0);
        &self.stack[..live.min(self.stack.len())]
    }

    pub fn registers(&self) -> Registers {
        Registers {
            pc: self.pc,
            sp: self.sp,
            fp: self.fp,
            ep: self.ep,
        }
    }

    /// Deepest nesting of active calls seen during the last run.
    pub fn peak_call_depth(&self) -> usize {
        self.peak_call_depth
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    fn reset(&mut self) {
        self.stack = vec![Value::default(); self.config.stack_capacity];
        self.pc = 0;
        self.sp = -1;
        self.fp = -1;
        self.ep = -1;
        self.running = true;
        self.steps = 0;
        self.call_depth = 0;
        self.peak_call_depth = 0;
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Runs `code` until `Halt` and returns the value in cell 0.
    /// `Print` output goes to `out`.
    pub fn execute(&mut self, code: &Code, out: &mut impl Write) -> Result<Value, RuntimeError> {
        if code.len() > self.config.code_capacity {
            return Err(RuntimeError::new(
                RuntimeErrorKind::CodeCapacityExceeded {
                    len: code.len(),
                    capacity: self.config.code_capacity,
                },
                0,
                None,
            ));
        }

        self.reset();

        while self.running {
            let pc = self.pc;
            let instr = code
                .instructions()
                .get(pc)
                .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::NoInstruction, pc, None))?;

            trace!(pc, sp = self.sp, fp = self.fp, ep = self.ep, instr = %instr, "step");

            self.pc += 1;
            let fault = |kind| RuntimeError::new(kind, pc, Some(instr.clone()));
            self.check_limits().map_err(fault)?;
            self.step(instr, code, out).map_err(fault)?;
        }

        if self.sp > 0 {
            warn!(sp = self.sp, "halted with cells above the exit value");
        }

        Ok(self.stack.first().cloned().unwrap_or_default())
    }

    /// Like [`Vm::execute`], then writes the `exit value: N` line.
    pub fn run_program(&mut self, code: &Code, out: &mut impl Write) -> Result<Value, RuntimeError> {
        let value = self.execute(code, out)?;
        writeln!(out, "exit value: {}", value).map_err(|e| {
            RuntimeError::new(RuntimeErrorKind::Output(e.to_string()), self.pc, None)
        })?;
        Ok(value)
    }

    fn check_limits(&mut self) -> Step {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(RuntimeErrorKind::StepLimitExceeded(max));
            }
        }

        Ok(())
    }

    fn step(&mut self, instr: &Instr, code: &Code, out: &mut impl Write) -> Step {
        match instr {
            Instr::LoadC(value) => self.push(value.clone()),

            // Arithmetic
            Instr::Add => self.binary(|a, b| Ok(a.wrapping_add(b))),
            Instr::Sub => self.binary(|a, b| Ok(a.wrapping_sub(b))),
            Instr::Mul => self.binary(|a, b| Ok(a.wrapping_mul(b))),
            Instr::Div => self.binary(|a, b| {
                if b == 0 {
                    Err(RuntimeErrorKind::DivisionByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            }),
            Instr::Mod => self.binary(|a, b| {
                if b == 0 {
                    Err(RuntimeErrorKind::DivisionByZero)
                } else {
                    Ok(a.wrapping_rem(b))
                }
            }),

            // Comparison
            Instr::Less => self.binary(|a, b| Ok(flag(a < b))),
            Instr::LessOrEqual => self.binary(|a, b| Ok(flag(a <= b))),
            Instr::Greater => self.binary(|a, b| Ok(flag(a > b))),
            Instr::GreaterOrEqual => self.binary(|a, b| Ok(flag(a >= b))),
            Instr::Equal => self.binary(|a, b| Ok(flag(a == b))),
            Instr::UnEqual => self.binary(|a, b| Ok(flag(a != b))),

            // Logic
            Instr::And => self.binary(|a, b| Ok(flag(a != 0 && b != 0))),
            Instr::Or => self.binary(|a, b| Ok(flag(a != 0 || b != 0))),

            Instr::FlipSign => self.unary(i64::wrapping_neg),
            Instr::Not => self.unary(|a| flag(a == 0)),

            // Memory
            Instr::Load => {
                self.need(1)?;
                let top = self.top();
                let address = self.address(top)?;
                self.stack[top] = self.stack[address].clone();
                Ok(())
            }
            Instr::Store => {
                self.need(2)?;
                let top = self.top();
                let address = self.address(top)?;
                self.stack[address] = self.stack[top - 1].clone();
                self.sp -= 1;
                Ok(())
            }
            Instr::Alloc(k) => {
                let new_sp = isize::try_from(*k)
                    .ok()
                    .and_then(|k| self.sp.checked_add(k))
                    .ok_or(RuntimeErrorKind::StackOverflow {
                        capacity: self.config.stack_capacity,
                    })?;
                self.ensure_capacity(new_sp)?;
                let (start, end) = ((self.sp + 1) as usize, (new_sp + 1) as usize);
                for cell in &mut self.stack[start..end] {
                    *cell = Value::default();
                }
                self.sp = new_sp;
                self.raise_ep();
                Ok(())
            }
            Instr::Pop => {
                self.need(1)?;
                self.sp -= 1;
                Ok(())
            }

            // Control flow
            Instr::Jump(label) => {
                self.pc = resolve(code, *label)?;
                Ok(())
            }
            Instr::JumpZ(label) => {
                self.need(1)?;
                let condition = self.int_at(self.top())?;
                self.sp -= 1;
                if condition == 0 {
                    self.pc = resolve(code, *label)?;
                }
                Ok(())
            }

            // Calling convention
            Instr::Mark => {
                self.ensure_capacity(self.sp + 2)?;
                let (ep, fp) = (self.ep, self.fp);
                self.push(Value::Int(ep as i64))?;
                self.push(Value::Int(fp as i64))
            }
            Instr::Call => self.call(code),
            Instr::Return => self.ret(),
            Instr::Slide(m) => {
                let m = *m;
                if self.sp < m as isize {
                    return Err(RuntimeErrorKind::StackUnderflow {
                        needed: m + 1,
                        available: self.depth(),
                    });
                }
                let top = self.top();
                self.stack[top - m] = self.stack[top].clone();
                self.sp -= m as isize;
                Ok(())
            }
            Instr::LoadRC(offset) => self.push(Value::Int(self.fp as i64 + offset)),

            // I/O
            Instr::Print => {
                self.need(1)?;
                writeln!(out, "{}", self.stack[self.top()])
                    .map_err(|e| RuntimeErrorKind::Output(e.to_string()))?;
                self.sp -= 1;
                Ok(())
            }
            Instr::Halt => {
                self.running = false;
                Ok(())
            }
        }
    }

    fn call(&mut self, code: &Code) -> Step {
        self.need(1)?;
        let top = self.top();
        let name = match &self.stack[top] {
            Value::Text(name) => name,
            other => {
                return Err(RuntimeErrorKind::TypeMismatch {
                    expected: "function name",
                    got: other.type_name(),
                });
            }
        };
        let entry = code
            .function_entry(name)
            .ok_or_else(|| RuntimeErrorKind::UnknownFunction(name.clone()))?;

        if self.call_depth >= self.config.max_call_depth {
            return Err(RuntimeErrorKind::CallDepthExceeded(self.config.max_call_depth));
        }
        self.call_depth += 1;
        self.peak_call_depth = self.peak_call_depth.max(self.call_depth);

        self.stack[top] = Value::Int(self.pc as i64);
        self.fp = self.sp;
        self.ep = self.sp;
        self.pc = entry;
        Ok(())
    }

    fn ret(&mut self) -> Step {
        // return value, saved ep and saved fp all sit below the frame
        if self.fp < 3 {
            return Err(RuntimeErrorKind::ReturnWithoutFrame);
        }
        if self.fp > self.sp {
            return Err(RuntimeErrorKind::InvalidAddress(self.fp as i64));
        }
        let fp = self.fp as usize;
        let return_address = self.int_at(fp)?;
        let saved_ep = self.int_at(fp - 2)?;
        let saved_fp = self.int_at(fp - 1)?;

        // the caller's frame lies wholly below this one
        let new_sp = self.fp - 3;
        if saved_fp < -1 || saved_fp > new_sp as i64 {
            return Err(RuntimeErrorKind::InvalidAddress(saved_fp));
        }
        if saved_ep < -1 || saved_ep >= self.config.stack_capacity as i64 {
            return Err(RuntimeErrorKind::InvalidAddress(saved_ep));
        }

        self.sp = new_sp;
        self.pc = usize::try_from(return_address).map_err(|_| RuntimeErrorKind::ReturnWithoutFrame)?;
        self.ep = saved_ep as isize;
        self.fp = saved_fp as isize;
        self.call_depth = self.call_depth.saturating_sub(1);
        Ok(())
    }

    // =========================================================================
    // Stack helpers
    // =========================================================================

    /// Number of live cells.
    fn depth(&self) -> usize {
        (self.sp + 1) as usize
    }

    /// Index of the top cell; only valid after a successful `need`.
    fn top(&self) -> usize {
        self.sp as usize
    }

    fn need(&self, n: usize) -> Step {
        let available = self.depth();
        if available < n {
            return Err(RuntimeErrorKind::StackUnderflow { needed: n, available });
        }
        Ok(())
    }

    fn ensure_capacity(&self, new_sp: isize) -> Step {
        if new_sp >= self.config.stack_capacity as isize {
            return Err(RuntimeErrorKind::StackOverflow {
                capacity: self.config.stack_capacity,
            });
        }
        Ok(())
    }

    fn raise_ep(&mut self) {
        self.ep = self.ep.max(self.sp);
    }

    fn push(&mut self, value: Value) -> Step {
        self.ensure_capacity(self.sp + 1)?;
        self.sp += 1;
        let top = self.top();
        self.stack[top] = value;
        self.raise_ep();
        Ok(())
    }

    fn int_at(&self, index: usize) -> Result<i64, RuntimeErrorKind> {
        let value = self
            .stack
            .get(index)
            .ok_or(RuntimeErrorKind::InvalidAddress(index as i64))?;
        value.as_int().ok_or(RuntimeErrorKind::TypeMismatch {
            expected: "integer",
            got: value.type_name(),
        })
    }

    /// Reads the cell at `index` as an address of a live cell.
    fn address(&self, index: usize) -> Result<usize, RuntimeErrorKind> {
        let address = self.int_at(index)?;
        if address < 0 || address > self.sp as i64 {
            return Err(RuntimeErrorKind::InvalidAddress(address));
        }
        Ok(address as usize)
    }

    fn binary(&mut self, op: impl FnOnce(i64, i64) -> Result<i64, RuntimeErrorKind>) -> Step {
        self.need(2)?;
        let top = self.top();
        let a = self.int_at(top - 1)?;
        let b = self.int_at(top)?;
        let result = op(a, b)?;
        self.sp -= 1;
        self.stack[top - 1] = Value::Int(result);
        Ok(())
    }

    fn unary(&mut self, op: impl FnOnce(i64) -> i64) -> Step {
        self.need(1)?;
        let top = self.top();
        let a = self.int_at(top)?;
        self.stack[top] = Value::Int(op(a));
        Ok(())
    }
}

fn flag(b: bool) -> i64 {
    b as i64
}

fn resolve(code: &Code, label: Label) -> Result<usize, RuntimeErrorKind> {
    code.resolve_label(label)
        .ok_or(RuntimeErrorKind::UnresolvedLabel(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Run ops (with a trailing `Halt` appended) and return the machine.
    fn run_ops(ops: Vec<Instr>) -> (Vm, Result<Value, RuntimeError>) {
        run_code(Code::from_instructions(ops))
    }

    fn run_code(mut code: Code) -> (Vm, Result<Value, RuntimeError>) {
        code.add_instruction(Instr::Halt);
        let mut vm = Vm::new();
        let mut out = Vec::new();
        let result = vm.execute(&code, &mut out);
        (vm, result)
    }

    /// Assert the live stack after running `ops`.
    fn assert_stack(ops: Vec<Instr>, expected: Vec<Value>) {
        let (vm, result) = run_ops(ops);
        result.expect("execution should succeed");
        assert_eq!(vm.stack(), expected.as_slice(), "stack mismatch");
    }

    /// Assert that running `ops` fails with `kind` at `pc`.
    fn assert_error(ops: Vec<Instr>, pc: usize, kind: RuntimeErrorKind) {
        let (_, result) = run_ops(ops);
        match result {
            Ok(v) => panic!("expected {:?}, got exit value {}", kind, v),
            Err(e) => {
                assert_eq!(e.kind, kind);
                assert_eq!(e.pc, pc);
            }
        }
    }

    fn int(n: i64) -> Instr {
        Instr::LoadC(Value::Int(n))
    }

    fn text(s: &str) -> Instr {
        Instr::LoadC(Value::Text(s.to_string()))
    }

    // =========================================================================
    // Instruction semantics
    // =========================================================================

    #[test]
    fn test_arithmetic() {
        assert_stack(vec![int(7), int(3), Instr::Sub], vec![Value::Int(4)]);
        assert_stack(vec![int(7), int(3), Instr::Div], vec![Value::Int(2)]);
        assert_stack(vec![int(-7), int(3), Instr::Mod], vec![Value::Int(-1)]);
        assert_stack(vec![int(i64::MAX), int(1), Instr::Add], vec![Value::Int(i64::MIN)]);
        assert_stack(vec![int(5), Instr::FlipSign], vec![Value::Int(-5)]);
    }

    #[test]
    fn test_comparison_and_logic_push_flags() {
        assert_stack(vec![int(2), int(3), Instr::Less], vec![Value::Int(1)]);
        assert_stack(vec![int(3), int(3), Instr::GreaterOrEqual], vec![Value::Int(1)]);
        assert_stack(vec![int(3), int(4), Instr::Equal], vec![Value::Int(0)]);
        assert_stack(vec![int(3), int(4), Instr::UnEqual], vec![Value::Int(1)]);
        assert_stack(vec![int(2), int(0), Instr::And], vec![Value::Int(0)]);
        assert_stack(vec![int(0), int(9), Instr::Or], vec![Value::Int(1)]);
        assert_stack(vec![int(9), Instr::Not], vec![Value::Int(0)]);
    }

    #[test]
    fn test_load_and_store() {
        // cell 0 = 5; store 8 into it through its address
        assert_stack(
            vec![int(5), int(8), int(0), Instr::Store, Instr::Pop, int(0), Instr::Load],
            vec![Value::Int(8), Value::Int(8)],
        );
    }

    #[test]
    fn test_store_leaves_value_on_top() {
        assert_stack(
            vec![Instr::Alloc(1), int(4), int(0), Instr::Store],
            vec![Value::Int(4), Value::Int(4)],
        );
    }

    #[test]
    fn test_alloc_reserves_zeroed_cells() {
        assert_stack(vec![Instr::Alloc(3)], vec![Value::Int(0); 3]);
    }

    #[test]
    fn test_slide_keeps_top() {
        assert_stack(
            vec![int(1), int(2), int(3), Instr::Slide(2)],
            vec![Value::Int(3)],
        );
    }

    #[test]
    fn test_jumpz_always_consumes_condition() {
        let mut code = Code::new();
        code.add_instruction(int(1));
        let taken = code.emit_jump(Instr::JumpZ);
        code.add_instruction(int(10));
        let end = code.add_jump_label_at_end();
        code.patch_jump(taken, end);

        let (vm, result) = run_code(code);
        assert_eq!(result.unwrap(), Value::Int(10));
        assert_eq!(vm.stack(), &[Value::Int(10)]);

        let mut code = Code::new();
        code.add_instruction(int(0));
        let skip = code.emit_jump(Instr::JumpZ);
        code.add_instruction(int(10));
        let end = code.add_jump_label_at_end();
        code.patch_jump(skip, end);

        let (vm, _) = run_code(code);
        assert_eq!(vm.stack(), &[] as &[Value]);
    }

    #[test]
    fn test_jump_keeps_stack() {
        let mut code = Code::new();
        code.add_instruction(int(4));
        let over = code.emit_jump(Instr::Jump);
        code.add_instruction(int(99));
        let end = code.add_jump_label_at_end();
        code.patch_jump(over, end);

        let (vm, result) = run_code(code);
        result.unwrap();
        assert_eq!(vm.stack(), &[Value::Int(4)]);
    }

    #[test]
    fn test_mark_saves_ep_then_fp() {
        let (vm, result) = run_ops(vec![int(0), Instr::Mark]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Value::Int(0), Value::Int(0), Value::Int(-1)]);
        assert_eq!(vm.registers().sp, 2);
    }

    #[test]
    fn test_call_and_return() {
        // main: LoadC 0; Mark; LoadC 'seven'; Call; Halt
        // seven: LoadC 7; LoadRC -3; Store; Return
        let mut code = Code::from_instructions(vec![int(0), Instr::Mark, text("seven"), Instr::Call, Instr::Halt]);
        let mut seven = Code::new();
        seven.register_function("seven").unwrap();
        for instr in [int(7), Instr::LoadRC(-3), Instr::Store, Instr::Return] {
            seven.add_instruction(instr);
        }
        code.add_code(seven).unwrap();

        let mut vm = Vm::new();
        let value = vm.execute(&code, &mut Vec::new()).unwrap();
        assert_eq!(value, Value::Int(7));
        assert_eq!(
            vm.registers(),
            Registers {
                pc: 5,
                sp: 0,
                fp: -1,
                ep: 0
            }
        );
        assert_eq!(vm.peak_call_depth(), 1);
    }

    #[test]
    fn test_loadrc_is_frame_relative() {
        assert_stack(vec![Instr::LoadRC(5)], vec![Value::Int(4)]);
    }

    #[test]
    fn test_print_writes_raw_value() {
        let code = Code::from_instructions(vec![
            text("hi 'there'"),
            Instr::Print,
            int(-3),
            Instr::Print,
            Instr::Halt,
        ]);
        let mut out = Vec::new();
        Vm::new().execute(&code, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "hi 'there'\n-3\n");
    }

    #[test]
    fn test_run_program_reports_exit_value() {
        let code = Code::from_instructions(vec![int(42), Instr::Halt]);
        let mut out = Vec::new();
        Vm::new().run_program(&code, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "exit value: 42\n");
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn test_pop_on_empty_stack() {
        assert_error(
            vec![Instr::Pop],
            0,
            RuntimeErrorKind::StackUnderflow {
                needed: 1,
                available: 0,
            },
        );
    }

    #[test]
    fn test_binary_needs_two_operands() {
        assert_error(
            vec![int(1), Instr::Add],
            1,
            RuntimeErrorKind::StackUnderflow {
                needed: 2,
                available: 1,
            },
        );
    }

    #[test]
    fn test_slide_past_stack_depth() {
        assert_error(
            vec![int(1), int(2), Instr::Slide(3)],
            2,
            RuntimeErrorKind::StackUnderflow {
                needed: 4,
                available: 2,
            },
        );
    }

    #[test]
    fn test_type_mismatch() {
        assert_error(
            vec![int(1), text("x"), Instr::Add],
            2,
            RuntimeErrorKind::TypeMismatch {
                expected: "integer",
                got: "text",
            },
        );
        assert_error(
            vec![Instr::LoadC(Value::Float(1.5)), Instr::FlipSign],
            1,
            RuntimeErrorKind::TypeMismatch {
                expected: "integer",
                got: "float",
            },
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert_error(vec![int(1), int(0), Instr::Div], 2, RuntimeErrorKind::DivisionByZero);
        assert_error(vec![int(1), int(0), Instr::Mod], 2, RuntimeErrorKind::DivisionByZero);
    }

    #[test]
    fn test_invalid_address() {
        assert_error(vec![int(3), Instr::Load], 1, RuntimeErrorKind::InvalidAddress(3));
        assert_error(vec![int(-1), Instr::Load], 1, RuntimeErrorKind::InvalidAddress(-1));
    }

    #[test]
    fn test_unresolved_label() {
        assert_error(vec![Instr::Jump(4)], 0, RuntimeErrorKind::UnresolvedLabel(4));
    }

    #[test]
    fn test_unknown_function() {
        assert_error(
            vec![int(0), Instr::Mark, text("nowhere"), Instr::Call],
            3,
            RuntimeErrorKind::UnknownFunction("nowhere".into()),
        );
    }

    #[test]
    fn test_return_at_top_level() {
        assert_error(vec![Instr::Return], 0, RuntimeErrorKind::ReturnWithoutFrame);
    }

    #[test]
    fn test_running_off_the_end() {
        let code = Code::from_instructions(vec![int(1)]);
        let err = Vm::new().execute(&code, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::NoInstruction);
        assert_eq!(err.pc, 1);
        assert_eq!(err.instruction, None);
    }

    #[test]
    fn test_stack_overflow() {
        let mut vm = Vm::with_config(VmConfig {
            stack_capacity: 2,
            ..VmConfig::default()
        });
        let code = Code::from_instructions(vec![int(1), int(2), int(3), Instr::Halt]);
        let err = vm.execute(&code, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StackOverflow { capacity: 2 });
        assert_eq!(err.pc, 2);

        let code = Code::from_instructions(vec![Instr::Alloc(3), Instr::Halt]);
        let err = vm.execute(&code, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StackOverflow { capacity: 2 });
    }

    #[test]
    fn test_step_limit() {
        let mut code = Code::new();
        let head = code.add_jump_label_at_end();
        code.add_instruction(Instr::Jump(head));

        let mut vm = Vm::with_config(VmConfig {
            max_steps: Some(50),
            ..VmConfig::default()
        });
        let err = vm.execute(&code, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StepLimitExceeded(50));
        assert_eq!(vm.steps(), 51);
    }

    #[test]
    fn test_call_depth_limit() {
        // f calls itself forever
        let mut code = Code::from_instructions(vec![int(0), Instr::Mark, text("f"), Instr::Call, Instr::Halt]);
        let mut f = Code::new();
        f.register_function("f").unwrap();
        for instr in [int(0), Instr::Mark, text("f"), Instr::Call, Instr::Return] {
            f.add_instruction(instr);
        }
        code.add_code(f).unwrap();

        let mut vm = Vm::with_config(VmConfig {
            max_call_depth: 10,
            ..VmConfig::default()
        });
        let err = vm.execute(&code, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::CallDepthExceeded(10));
        assert_eq!(vm.peak_call_depth(), 10);
    }

    #[test]
    fn test_code_capacity() {
        let mut vm = Vm::with_config(VmConfig {
            code_capacity: 1,
            ..VmConfig::default()
        });
        let code = Code::from_instructions(vec![int(1), Instr::Halt]);
        let err = vm.execute(&code, &mut Vec::new()).unwrap_err();
        assert_eq!(
            err.kind,
            RuntimeErrorKind::CodeCapacityExceeded { len: 2, capacity: 1 }
        );
    }

    #[test]
    fn test_alloc_beyond_addressable_range() {
        let capacity = VmConfig::default().stack_capacity;
        assert_error(
            vec![int(1), int(1), Instr::Alloc(isize::MAX as usize)],
            2,
            RuntimeErrorKind::StackOverflow { capacity },
        );
        assert_error(
            vec![Instr::Alloc(usize::MAX)],
            0,
            RuntimeErrorKind::StackOverflow { capacity },
        );
    }

    /// Return through a frame whose saved fp cell was overwritten.
    #[test]
    fn test_return_with_corrupt_saved_fp() {
        // return slot, saved ep, forged saved fp
        let mut code =
            Code::from_instructions(vec![int(0), int(0), int(500), text("f"), Instr::Call]);
        code.add_instruction(Instr::Halt);
        let mut f = Code::new();
        f.register_function("f").unwrap();
        f.add_instruction(Instr::Return);
        code.add_code(f).unwrap();

        let err = Vm::new().execute(&code, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::InvalidAddress(500));
        assert_eq!(err.pc, 6);
        assert_eq!(err.instruction, Some(Instr::Return));
    }

    #[test]
    fn test_return_with_corrupt_saved_ep() {
        let mut code =
            Code::from_instructions(vec![int(0), int(-9), int(-1), text("f"), Instr::Call]);
        code.add_instruction(Instr::Halt);
        let mut f = Code::new();
        f.register_function("f").unwrap();
        f.add_instruction(Instr::Return);
        code.add_code(f).unwrap();

        let err = Vm::new().execute(&code, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::InvalidAddress(-9));
    }
}
