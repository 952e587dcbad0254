use crate::bytecode::code::UNRESOLVED;
use crate::lang::value::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric jump label, resolved through a container's jump table.
pub type Label = usize;

// =============================================================================
// INSTR - Bytecode instructions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    // literals
    /// Push a constant: integer, float, text or callee name.
    LoadC(Value),

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // comparison
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
    UnEqual,

    // logic (both operands already evaluated)
    And,
    Or,

    // unary
    FlipSign,
    Not,

    // memory
    /// Replace the address on top with the value stored there.
    Load,
    /// Write the value below the top to the address on top; pops the address.
    Store,
    /// Reserve `k` cells on top of the stack.
    Alloc(usize),
    Pop,

    // ==========================================================================
    // Control flow through labels
    // ==========================================================================
    Jump(Label),
    /// Pop the condition; jump when it is zero.
    JumpZ(Label),

    // ==========================================================================
    // Calling convention
    // ==========================================================================
    /// Save extreme pointer and frame pointer above the return-value slot.
    Mark,
    /// Replace the callee name on top with the return address and enter it.
    Call,
    /// Restore the caller's registers; the return-value slot becomes the top.
    Return,
    /// Drop `m` cells below the top, keeping the top.
    Slide(usize),
    /// Push `fp + offset`.
    LoadRC(i64),

    // I/O
    Print,
    Halt,
}

/// Failure to build an instruction from a mnemonic and operand.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unknown instruction '{0}'")]
    UnknownMnemonic(String),

    #[error("'{0}' needs an operand")]
    MissingOperand(&'static str),

    #[error("'{0}' takes no operand")]
    UnexpectedOperand(&'static str),

    #[error("'{mnemonic}' expects {expected}, got '{got}'")]
    InvalidOperand {
        mnemonic: &'static str,
        expected: &'static str,
        got: String,
    },
}

impl Instr {
    /// Canonical instruction name used by the text form.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instr::LoadC(_) => "LoadC",
            Instr::Add => "Add",
            Instr::Sub => "Sub",
            Instr::Mul => "Mul",
            Instr::Div => "Div",
            Instr::Mod => "Mod",
            Instr::Less => "Less",
            Instr::LessOrEqual => "LessOrEqual",
            Instr::Greater => "Greater",
            Instr::GreaterOrEqual => "GreaterOrEqual",
            Instr::Equal => "Equal",
            Instr::UnEqual => "UnEqual",
            Instr::And => "And",
            Instr::Or => "Or",
            Instr::FlipSign => "FlipSign",
            Instr::Not => "Not",
            Instr::Load => "Load",
            Instr::Store => "Store",
            Instr::Alloc(_) => "Alloc",
            Instr::Pop => "Pop",
            Instr::Jump(_) => "Jump",
            Instr::JumpZ(_) => "JumpZ",
            Instr::Mark => "Mark",
            Instr::Call => "Call",
            Instr::Return => "Return",
            Instr::Slide(_) => "Slide",
            Instr::LoadRC(_) => "LoadRC",
            Instr::Print => "Print",
            Instr::Halt => "Halt",
        }
    }

    /// Operand of the instruction, if its shape has one.
    pub fn operand(&self) -> Option<Value> {
        match self {
            Instr::LoadC(v) => Some(v.clone()),
            Instr::Alloc(k) | Instr::Slide(k) => Some(Value::Int(*k as i64)),
            Instr::Jump(l) | Instr::JumpZ(l) => Some(Value::Int(*l as i64)),
            Instr::LoadRC(j) => Some(Value::Int(*j)),
            _ => None,
        }
    }

    /// Jump label referenced by `Jump`/`JumpZ`.
    pub fn label(&self) -> Option<Label> {
        match self {
            Instr::Jump(l) | Instr::JumpZ(l) => Some(*l),
            _ => None,
        }
    }

    pub fn label_mut(&mut self) -> Option<&mut Label> {
        match self {
            Instr::Jump(l) | Instr::JumpZ(l) => Some(l),
            _ => None,
        }
    }

    /// Explicit mnemonic to variant lookup.
    pub fn from_parts(mnemonic: &str, operand: Option<Value>) -> Result<Instr, DecodeError> {
        let has_operand = operand.is_some();
        let nullary = |instr: Instr| {
            if has_operand {
                Err(DecodeError::UnexpectedOperand(instr.mnemonic()))
            } else {
                Ok(instr)
            }
        };

        match mnemonic {
            "LoadC" => operand
                .map(Instr::LoadC)
                .ok_or(DecodeError::MissingOperand("LoadC")),
            "Alloc" => Ok(Instr::Alloc(count_operand("Alloc", operand)?)),
            "Slide" => Ok(Instr::Slide(count_operand("Slide", operand)?)),
            "Jump" => Ok(Instr::Jump(count_operand("Jump", operand)?)),
            "JumpZ" => Ok(Instr::JumpZ(count_operand("JumpZ", operand)?)),
            "LoadRC" => match operand {
                Some(Value::Int(j)) => Ok(Instr::LoadRC(j)),
                Some(other) => Err(DecodeError::InvalidOperand {
                    mnemonic: "LoadRC",
                    expected: "an integer offset",
                    got: other.to_string(),
                }),
                None => Err(DecodeError::MissingOperand("LoadRC")),
            },
            "Add" => nullary(Instr::Add),
            "Sub" => nullary(Instr::Sub),
            "Mul" => nullary(Instr::Mul),
            "Div" => nullary(Instr::Div),
            "Mod" => nullary(Instr::Mod),
            "Less" => nullary(Instr::Less),
            "LessOrEqual" => nullary(Instr::LessOrEqual),
            "Greater" => nullary(Instr::Greater),
            "GreaterOrEqual" => nullary(Instr::GreaterOrEqual),
            "Equal" => nullary(Instr::Equal),
            "UnEqual" => nullary(Instr::UnEqual),
            "And" => nullary(Instr::And),
            "Or" => nullary(Instr::Or),
            "FlipSign" => nullary(Instr::FlipSign),
            "Not" => nullary(Instr::Not),
            "Load" => nullary(Instr::Load),
            "Store" => nullary(Instr::Store),
            "Pop" => nullary(Instr::Pop),
            "Mark" => nullary(Instr::Mark),
            "Call" => nullary(Instr::Call),
            "Return" => nullary(Instr::Return),
            "Print" => nullary(Instr::Print),
            "Halt" => nullary(Instr::Halt),
            other => Err(DecodeError::UnknownMnemonic(other.to_string())),
        }
    }

    /// Stack effect in `( before -- after )` notation, for listings.
    pub fn stack_effect(&self) -> &'static str {
        use Instr::*;
        match self {
            LoadC(_) => "( -- q )",
            Add | Sub | Mul | Div | Mod => "( a b -- a∘b )",
            Less | LessOrEqual | Greater | GreaterOrEqual | Equal | UnEqual => "( a b -- flag )",
            And | Or => "( a b -- flag )",
            FlipSign => "( a -- -a )",
            Not => "( a -- !a )",
            Load => "( addr -- value )",
            Store => "( value addr -- value )",
            Alloc(_) => "( -- cells... )",
            Pop => "( a -- )",
            Jump(_) => "( -- )",
            JumpZ(_) => "( cond -- )",
            Mark => "( -- ep fp )",
            Call => "( name -- ret-addr )",
            Return => "( frame... -- result )",
            Slide(_) => "( xs... top -- top )",
            LoadRC(_) => "( -- fp+j )",
            Print => "( value -- )",
            Halt => "( -- )",
        }
    }
}

fn count_operand(mnemonic: &'static str, operand: Option<Value>) -> Result<usize, DecodeError> {
    match operand {
        Some(Value::Int(n)) if n >= 0 => Ok(n as usize),
        Some(other) => Err(DecodeError::InvalidOperand {
            mnemonic,
            expected: "a non-negative integer",
            got: other.to_string(),
        }),
        None => Err(DecodeError::MissingOperand(mnemonic)),
    }
}

impl std::fmt::Display for Instr {
    /// Canonical text: mnemonic, then the operand if any. Text operands are
    /// single-quoted with `\`, `'` and newline escaped. A jump still waiting
    /// for its label is written `?`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())?;
        if self.label() == Some(UNRESOLVED) {
            return f.write_str(" ?");
        }
        match self.operand() {
            None => Ok(()),
            Some(Value::Text(s)) => write!(f, " '{}'", escape(&s)),
            Some(Value::Float(x)) => write!(f, " {:?}", x),
            Some(Value::Int(n)) => write!(f, " {}", n),
        }
    }
}

pub(crate) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}
