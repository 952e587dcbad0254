use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::{Instr, Label};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label carried by a jump that has been emitted but not yet patched.
pub const UNRESOLVED: Label = Label::MAX;

/// Position of a jump emitted with an unresolved label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpSlot(usize);

/// A relocatable unit of bytecode.
///
/// Jumps name labels, never instruction indices; the jump table maps each
/// label to the index it stands for, and the function table maps each
/// function name to its entry index. Both tables are ordered so that the
/// text form is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Code {
    instructions: Vec<Instr>,
    jump_table: BTreeMap<Label, usize>,
    functions: BTreeMap<String, usize>,
}

impl Code {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_instructions(instructions: Vec<Instr>) -> Self {
        Code {
            instructions,
            ..Self::default()
        }
    }

    pub fn instructions(&self) -> &[Instr] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn jump_table(&self) -> &BTreeMap<Label, usize> {
        &self.jump_table
    }

    pub fn functions(&self) -> &BTreeMap<String, usize> {
        &self.functions
    }

    pub fn resolve_label(&self, label: Label) -> Option<usize> {
        self.jump_table.get(&label).copied()
    }

    pub fn function_entry(&self, name: &str) -> Option<usize> {
        self.functions.get(name).copied()
    }

    pub fn add_instruction(&mut self, instr: Instr) {
        self.instructions.push(instr);
    }

    /// Smallest label id not used by this container.
    fn next_label(&self) -> Label {
        self.jump_table.keys().next_back().map_or(0, |last| last + 1)
    }

    /// Allocates a fresh label bound to the index of the next instruction.
    pub fn add_jump_label_at_end(&mut self) -> Label {
        let label = self.next_label();
        self.jump_table.insert(label, self.instructions.len());
        label
    }

    /// Binds an explicit label; used when reading the text form.
    pub(crate) fn bind_label(&mut self, label: Label, index: usize) -> bool {
        self.jump_table.insert(label, index).is_none()
    }

    /// Marks the next instruction as the entry point of `name`.
    pub fn register_function(&mut self, name: &str) -> Result<(), CompileError> {
        if self.functions.contains_key(name) {
            return Err(CompileError::DuplicateFunction(name.to_string()));
        }
        self.functions.insert(name.to_string(), self.instructions.len());
        Ok(())
    }

    /// Emits `make(UNRESOLVED)` and returns its slot for later patching.
    ///
    /// ```text
    /// let slot = code.emit_jump(Instr::JumpZ);
    /// ...
    /// let label = code.add_jump_label_at_end();
    /// code.patch_jump(slot, label);
    /// ```
    pub fn emit_jump(&mut self, make: impl FnOnce(Label) -> Instr) -> JumpSlot {
        let slot = JumpSlot(self.instructions.len());
        self.instructions.push(make(UNRESOLVED));
        slot
    }

    pub fn patch_jump(&mut self, slot: JumpSlot, label: Label) {
        if let Some(target) = self.instructions.get_mut(slot.0).and_then(Instr::label_mut) {
            *target = label;
        }
    }

    /// Appends `other` after `self`, rebasing its relocation tables.
    ///
    /// Labels of `other` are shifted past the labels of `self`, targets by
    /// the current instruction count. Every jump in `other` whose label is
    /// defined by `other` is rewritten exactly once. Fails without touching
    /// `self` if both define the same function.
    pub fn add_code(&mut self, other: Code) -> Result<(), CompileError> {
        if let Some(name) = other
            .functions
            .keys()
            .find(|name| self.functions.contains_key(*name))
        {
            return Err(CompileError::DuplicateFunction(name.clone()));
        }

        let offset = self.instructions.len();
        let label_offset = self.next_label();

        let Code {
            mut instructions,
            jump_table,
            functions,
        } = other;

        for instr in &mut instructions {
            if let Some(label) = instr.label_mut() {
                if jump_table.contains_key(label) {
                    *label += label_offset;
                }
            }
        }

        for (label, target) in jump_table {
            self.jump_table.insert(label + label_offset, target + offset);
        }
        for (name, start) in functions {
            self.functions.insert(name, start + offset);
        }
        self.instructions.extend(instructions);

        Ok(())
    }

    /// Pure form of [`Code::add_code`]: `self` followed by `other`.
    pub fn merged(mut self, other: Code) -> Result<Code, CompileError> {
        self.add_code(other)?;
        Ok(self)
    }

    /// Checks that the container is fit to hand to the machine: every jump
    /// names a defined label and every table entry lies within the code.
    /// A label may point one past the last instruction.
    pub fn verify(&self) -> Result<(), CompileError> {
        for (index, instr) in self.instructions.iter().enumerate() {
            if let Some(label) = instr.label() {
                if !self.jump_table.contains_key(&label) {
                    return Err(CompileError::UnresolvedLabel { index, label });
                }
            }
        }

        let len = self.instructions.len();
        for (label, &target) in &self.jump_table {
            if target > len {
                return Err(CompileError::TargetOutOfRange {
                    table: "jump table",
                    key: label.to_string(),
                    target,
                    len,
                });
            }
        }
        for (name, &target) in &self.functions {
            if target >= len {
                return Err(CompileError::TargetOutOfRange {
                    table: "function table",
                    key: name.clone(),
                    target,
                    len,
                });
            }
        }

        Ok(())
    }

    /// Compact binary image of the container.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Code, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
