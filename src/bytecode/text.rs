//! Text forms of a [`Code`] container.
//!
//! [`render`] and [`parse`] implement the persisted form: one instruction per
//! line, each optionally prefixed by `name:` (function entry) and `N:`
//! (jump label) annotations. Labels bound past the last instruction appear on
//! a trailing annotation-only line. A jump whose label has not been patched
//! yet is written with `?` as its operand.
//!
//! ```text
//! Alloc 1
//! LoadC 0
//! Mark
//! LoadC 'main'
//! Call
//! Slide 1
//! Halt
//! main: LoadC 5
//! 0: LoadC 'done'
//! 1:
//! ```
//!
//! [`disassemble`] produces a listing for people; it is not re-parseable.

use crate::bytecode::code::{Code, UNRESOLVED};
use crate::bytecode::op::{DecodeError, Instr, Label, escape};
use crate::lang::value::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct TextError {
    pub line: usize,
    pub message: String,
}

impl TextError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        TextError {
            line,
            message: message.into(),
        }
    }

    fn decode(line: usize, err: DecodeError) -> Self {
        Self::new(line, err.to_string())
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Annotations per instruction index: function names first, then labels.
fn annotations(code: &Code) -> BTreeMap<usize, Vec<String>> {
    let mut at: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (name, &index) in code.functions() {
        at.entry(index).or_default().push(name.clone());
    }
    for (label, &index) in code.jump_table() {
        at.entry(index).or_default().push(label.to_string());
    }
    at
}

pub fn render(code: &Code) -> String {
    let annotations = annotations(code);
    let mut out = String::new();

    for (index, instr) in code.instructions().iter().enumerate() {
        if let Some(names) = annotations.get(&index) {
            for name in names {
                out.push_str(name);
                out.push_str(": ");
            }
        }
        out.push_str(&instr.to_string());
        out.push('\n');
    }

    if let Some(names) = annotations.get(&code.len()) {
        let trailing: Vec<String> = names.iter().map(|n| format!("{}:", n)).collect();
        out.push_str(&trailing.join(" "));
        out.push('\n');
    }

    out
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&render(self))
    }
}

// =============================================================================
// Parsing
// =============================================================================

pub fn parse(source: &str) -> Result<Code, TextError> {
    let mut code = Code::new();

    for (i, raw) in source.lines().enumerate() {
        let line = i + 1;
        let mut rest = raw.trim();

        while let Some((annotation, after)) = split_annotation(rest) {
            bind(&mut code, annotation, line)?;
            rest = after.trim_start();
        }

        if rest.is_empty() {
            continue;
        }

        let (mnemonic, operand_text) = match rest.find(char::is_whitespace) {
            Some(pos) => (&rest[..pos], rest[pos..].trim()),
            None => (rest, ""),
        };
        let instr = match (mnemonic, operand_text) {
            ("Jump", "?") => Instr::Jump(UNRESOLVED),
            ("JumpZ", "?") => Instr::JumpZ(UNRESOLVED),
            _ => {
                let operand = parse_operand(operand_text, line)?;
                Instr::from_parts(mnemonic, operand).map_err(|e| TextError::decode(line, e))?
            }
        };
        code.add_instruction(instr);
    }

    Ok(code)
}

impl std::str::FromStr for Code {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Splits a leading `word:` off `rest`, if there is one.
fn split_annotation(rest: &str) -> Option<(&str, &str)> {
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let word = &rest[..end];
    let name = word.strip_suffix(':')?;
    if name.is_empty() || name.starts_with('\'') {
        return None;
    }
    Some((name, &rest[end..]))
}

fn bind(code: &mut Code, annotation: &str, line: usize) -> Result<(), TextError> {
    let first = annotation.chars().next().unwrap_or('0');
    if first.is_alphabetic() || first == '_' {
        return code
            .register_function(annotation)
            .map_err(|e| TextError::new(line, e.to_string()));
    }

    let label: Label = annotation
        .parse()
        .map_err(|_| TextError::new(line, format!("invalid label '{}'", annotation)))?;
    if code.bind_label(label, code.len()) {
        Ok(())
    } else {
        Err(TextError::new(line, format!("label {} defined twice", label)))
    }
}

fn parse_operand(text: &str, line: usize) -> Result<Option<Value>, TextError> {
    if text.is_empty() {
        return Ok(None);
    }

    if let Some(quoted) = text.strip_prefix('\'') {
        let (value, tail) = unquote(quoted)
            .ok_or_else(|| TextError::new(line, "unterminated text operand"))?;
        if !tail.trim().is_empty() {
            return Err(TextError::new(line, format!("unexpected '{}' after operand", tail.trim())));
        }
        return Ok(Some(Value::Text(value)));
    }

    if text.contains(char::is_whitespace) {
        return Err(TextError::new(line, format!("more than one operand in '{}'", text)));
    }
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Some(Value::Int(n)));
    }
    if let Ok(x) = text.parse::<f64>() {
        return Ok(Some(Value::Float(x)));
    }
    Err(TextError::new(line, format!("invalid operand '{}'", text)))
}

/// Reads up to the closing quote; returns the unescaped text and what follows.
fn unquote(s: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' => return Some((out, &s[i + 1..])),
            '\\' => match chars.next()?.1 {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            },
            c => out.push(c),
        }
    }
    None
}

// =============================================================================
// Listing
// =============================================================================

/// Human-readable disassembly with jump targets resolved.
pub fn disassemble(code: &Code) -> String {
    let mut targets: BTreeMap<usize, Vec<Label>> = BTreeMap::new();
    for (&label, &index) in code.jump_table() {
        targets.entry(index).or_default().push(label);
    }
    let mut entries: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for (name, &index) in code.functions() {
        entries.entry(index).or_default().push(name);
    }

    let mut out = String::new();
    out.push_str("════════════════════════════════════════\n");
    out.push_str(&format!(
        " {} instructions, {} labels, {} functions\n",
        code.len(),
        code.jump_table().len(),
        code.functions().len()
    ));
    out.push_str("════════════════════════════════════════\n");

    for (ip, instr) in code.instructions().iter().enumerate() {
        push_markers(&mut out, ip, &entries, &targets);

        let marker = if targets.contains_key(&ip) { "►" } else { " " };
        let text = match instr.label() {
            Some(label) => match code.resolve_label(label) {
                Some(target) => format!(
                    "{:<12}{} {} (→ {:04})",
                    instr.mnemonic(),
                    label,
                    if target <= ip { "↑" } else { "↓" },
                    target
                ),
                None => format!("{:<12}{} (unresolved)", instr.mnemonic(), label),
            },
            None => match instr.operand() {
                Some(Value::Text(s)) => format!("{:<12}'{}'", instr.mnemonic(), escape(&s)),
                Some(Value::Float(x)) => format!("{:<12}{:?}", instr.mnemonic(), x),
                Some(v) => format!("{:<12}{}", instr.mnemonic(), v),
                None => instr.mnemonic().to_string(),
            },
        };
        out.push_str(&format!("{:04} {} {:<28}; {}\n", ip, marker, text, instr.stack_effect()));
    }

    push_markers(&mut out, code.len(), &entries, &targets);
    out
}

fn push_markers(
    out: &mut String,
    ip: usize,
    entries: &BTreeMap<usize, Vec<&str>>,
    targets: &BTreeMap<usize, Vec<Label>>,
) {
    if let Some(names) = entries.get(&ip) {
        for name in names {
            out.push_str(&format!("\n── {} ──\n", name));
        }
    }
    if let Some(labels) = targets.get(&ip) {
        let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        out.push_str(&format!("       ┌── L{}\n", labels.join(", L")));
    }
}

/// Print disassembly of a container to stdout.
pub fn print_listing(code: &Code) {
    print!("{}", disassemble(code));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Code {
        let mut code = Code::new();
        code.add_instruction(Instr::Alloc(1));
        let head = code.add_jump_label_at_end();
        code.add_instruction(Instr::LoadRC(-4));
        let exit = code.emit_jump(Instr::JumpZ);
        code.add_instruction(Instr::LoadC(Value::Text("it's\na 'test'".into())));
        code.add_instruction(Instr::Print);
        code.add_instruction(Instr::Jump(head));
        let end = code.add_jump_label_at_end();
        code.patch_jump(exit, end);
        code
    }

    #[test]
    fn test_render_annotates_labels_and_functions() {
        let mut code = Code::new();
        code.add_instruction(Instr::Halt);
        code.register_function("main").unwrap();
        code.add_jump_label_at_end();
        code.add_instruction(Instr::LoadC(Value::Float(2.0)));
        code.add_instruction(Instr::Return);
        code.add_jump_label_at_end();

        assert_eq!(render(&code), "Halt\nmain: 0: LoadC 2.0\nReturn\n1:\n");
    }

    #[test]
    fn test_round_trip() {
        let code = sample();
        let text = render(&code);
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed, code);
        assert_eq!(render(&parsed), text);
    }

    #[test]
    fn test_from_str_and_display() {
        let code: Code = "f: LoadC 'x'\nReturn\n".parse().unwrap();
        assert_eq!(code.function_entry("f"), Some(0));
        assert_eq!(code.to_string(), "f: LoadC 'x'\nReturn\n");
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let code = parse("\n  Add  \n\nHalt\n").unwrap();
        assert_eq!(code.instructions(), &[Instr::Add, Instr::Halt]);
    }

    #[test]
    fn test_text_operand_may_contain_colons_and_spaces() {
        let code = parse("LoadC 'a: b'").unwrap();
        assert_eq!(code.instructions(), &[Instr::LoadC(Value::Text("a: b".into()))]);
    }

    #[test]
    fn test_parse_errors_report_line() {
        let err = parse("Add\nFrob 1\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("Frob"));

        let err = parse("LoadC 'open").unwrap_err();
        assert_eq!(err.message, "unterminated text operand");

        let err = parse("0: Add\n0: Sub").unwrap_err();
        assert_eq!(err.to_string(), "line 2: label 0 defined twice");

        let err = parse("main: Add\nmain: Sub").unwrap_err();
        assert_eq!(err.line, 2);

        let err = parse("Alloc 1 2").unwrap_err();
        assert!(err.message.contains("more than one operand"));
    }

    #[test]
    fn test_disassemble_marks_targets() {
        let listing = disassemble(&sample());
        assert!(listing.contains("0001 ► LoadRC"));
        assert!(listing.contains("(→ 0006)"));
        assert!(listing.contains("(→ 0001)"));
        assert!(listing.contains("; ( cond -- )"));
    }

    #[test]
    fn test_open_jump_survives_text_form() {
        let mut code = Code::new();
        code.add_instruction(Instr::LoadC(Value::Int(0)));
        let slot = code.emit_jump(Instr::JumpZ);
        code.emit_jump(Instr::Jump);

        let text = render(&code);
        assert_eq!(text, "LoadC 0\nJumpZ ?\nJump ?\n");

        let mut parsed = parse(&text).unwrap();
        assert_eq!(parsed, code);
        let end = parsed.add_jump_label_at_end();
        parsed.patch_jump(slot, end);
        assert_eq!(parsed.instructions()[1], Instr::JumpZ(end));
    }
}
