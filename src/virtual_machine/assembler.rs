//! `.cma` source loader.
//!
//! Turns human-readable CMa code into a [`Program`]. This is the only place
//! where text is parsed; the engine itself only ever sees decoded
//! [`Instruction`]s.
//!
//! # Syntax
//!
//! ```text
//! loop:                # a label names the index of the next instruction
//!     LOADA 0          # MNEMONIC [argument]
//!     JUMPZ end
//!     JUMP loop
//! end: POP             # a label may share a line with an instruction
//! ```
//!
//! - Mnemonics are case-insensitive (`loadc` and `LOADC` are the same)
//! - Arguments are decimal `i32` literals or label names (absolute index)
//! - Comments start with `#`
//! - Commas between tokens are ignored

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Instruction, Opcode};
use crate::virtual_machine::program::Program;
use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: char = '#';
const LABEL_SUFFIX: char = ':';

/// Return the line/column/message triple for assembly-related errors.
fn assembly_error_location(err: &VMError) -> Option<(usize, usize, &str)> {
    match err {
        VMError::AssemblyError {
            line,
            offset,
            message,
        } => Some((*line, *offset, message.as_str())),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for loader failures.
pub fn render_assembly_diagnostic(
    file: &str,
    source: &str,
    line: usize,
    offset: usize,
    message: &str,
) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "     |");
        let _ = writeln!(diag, "{line:>4} | {line_text}");
        let _ = writeln!(diag, "     | {underline}^");
    }

    diag
}

/// Emit a diagnostic to stderr for loader errors.
fn log_assembly_error(file: &str, source: &str, err: &VMError) {
    match assembly_error_location(err) {
        Some((line, offset, message)) => eprintln!(
            "{}",
            render_assembly_diagnostic(file, source, line, offset, message)
        ),
        None => eprintln!("error: {err}"),
    }
}

/// Wraps `err` with its source position.
fn at(line: usize, offset: usize, err: VMError) -> VMError {
    VMError::AssemblyError {
        line,
        offset,
        message: err.to_string(),
    }
}

#[derive(Debug, Clone)]
struct Token<'a> {
    text: &'a str,
    /// 1-based column offset in the line.
    offset: usize,
}

/// Tokenize a single line.
///
/// Tokens are separated by whitespace or commas; `#` ends the line.
fn tokenize(line: &str) -> Vec<Token<'_>> {
    let code = match line.find(COMMENT_CHAR) {
        Some(end) => &line[..end],
        None => line,
    };

    let mut out = Vec::with_capacity(4);
    let mut start: Option<usize> = None;

    for (i, c) in code.char_indices() {
        if c == ',' || c.is_whitespace() {
            if let Some(s) = start.take() {
                out.push(Token {
                    text: &code[s..i],
                    offset: s + 1,
                });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }

    if let Some(s) = start {
        out.push(Token {
            text: &code[s..],
            offset: s + 1,
        });
    }

    out
}

/// Checks if a token is a label definition (ends with `:`).
fn is_label_def(tok: &str) -> bool {
    tok.ends_with(LABEL_SUFFIX) && tok.len() > 1
}

/// Extracts the label name from a label definition token.
fn label_name(tok: &str) -> &str {
    &tok[..tok.len() - 1]
}

/// Splits leading label definitions off a tokenized line.
fn split_labels<'t, 'a>(tokens: &'t [Token<'a>]) -> (&'t [Token<'a>], &'t [Token<'a>]) {
    let count = tokens
        .iter()
        .take_while(|tok| is_label_def(tok.text))
        .count();
    tokens.split_at(count)
}

/// Parse an i32 immediate.
pub(crate) fn parse_i32(tok: &str) -> Result<i32, VMError> {
    tok.parse::<i32>().map_err(|_| VMError::InvalidImmediate {
        token: tok.to_string(),
    })
}

/// Label definitions collected in the first pass.
#[derive(Debug, Default)]
struct Labels(HashMap<String, usize>);

impl Labels {
    fn define(&mut self, name: &str, index: usize) -> Result<(), VMError> {
        if self.0.contains_key(name) {
            return Err(VMError::DuplicateLabel {
                label: name.to_string(),
            });
        }
        self.0.insert(name.to_string(), index);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<usize, VMError> {
        self.0.get(name).copied().ok_or(VMError::UndefinedLabel {
            label: name.to_string(),
        })
    }
}

/// Parses an argument: an `i32` literal or a label name.
fn parse_argument(tok: &str, labels: &Labels) -> Result<i32, VMError> {
    let looks_numeric = tok
        .trim_start_matches(['-', '+'])
        .starts_with(|c: char| c.is_ascii_digit());
    if looks_numeric {
        return parse_i32(tok);
    }
    let index = labels.resolve(tok)?;
    i32::try_from(index).map_err(|_| VMError::InvalidImmediate {
        token: tok.to_string(),
    })
}

/// Parses one instruction from its tokens (labels already stripped).
fn parse_instruction(
    line_no: usize,
    tokens: &[Token],
    labels: &Labels,
) -> Result<Instruction, VMError> {
    let head = &tokens[0];
    let opcode = Opcode::from_mnemonic(head.text).ok_or_else(|| {
        at(
            line_no,
            head.offset,
            VMError::InvalidInstructionName {
                name: head.text.to_string(),
            },
        )
    })?;

    let expected = usize::from(opcode.takes_argument());
    let actual = tokens.len() - 1;
    if actual != expected {
        return Err(at(
            line_no,
            head.offset,
            VMError::ArityMismatch {
                instruction: opcode.mnemonic().to_string(),
                expected,
                actual,
            },
        ));
    }

    let argument = match tokens.get(1) {
        Some(tok) => Some(parse_argument(tok.text, labels).map_err(|e| at(line_no, tok.offset, e))?),
        None => None,
    };

    Instruction::new(opcode, argument).map_err(|e| at(line_no, head.offset, e))
}

/// Loads a program from `.cma` source text.
///
/// Runs two passes: the first assigns every label the index of the
/// instruction that follows it, the second parses the instructions and
/// resolves label arguments.
pub fn assemble_source(source: &str) -> Result<Program, VMError> {
    let lines: Vec<(usize, Vec<Token>)> = source
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, tokenize(line)))
        .filter(|(_, tokens)| !tokens.is_empty())
        .collect();

    let mut labels = Labels::default();
    let mut index = 0usize;
    for (line_no, tokens) in &lines {
        let (defs, rest) = split_labels(tokens);
        for def in defs {
            labels
                .define(label_name(def.text), index)
                .map_err(|e| at(*line_no, def.offset, e))?;
        }
        if !rest.is_empty() {
            index += 1;
        }
    }

    let mut instructions = Vec::with_capacity(index);
    for (line_no, tokens) in &lines {
        let (_, rest) = split_labels(tokens);
        if rest.is_empty() {
            continue;
        }
        instructions.push(parse_instruction(*line_no, rest, &labels)?);
    }

    Ok(Program::new(instructions))
}

/// Reads and loads a `.cma` file.
///
/// Loader errors are also printed to stderr as a compiler-style diagnostic
/// pointing at the offending line.
pub fn assemble_file(path: impl AsRef<Path>) -> Result<Program, VMError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|e| VMError::IoError {
        reason: format!("{}: {e}", path.display()),
    })?;

    assemble_source(&source).inspect_err(|err| {
        log_assembly_error(&path.display().to_string(), &source, err);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(source: &str) -> Vec<Instruction> {
        assemble_source(source)
            .expect("assembly failed")
            .instructions()
            .to_vec()
    }

    fn assembly_err(source: &str) -> (usize, usize, String) {
        match assemble_source(source).expect_err("expected error") {
            VMError::AssemblyError {
                line,
                offset,
                message,
            } => (line, offset, message),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tokenize_splits_on_whitespace_and_commas() {
        let tokens = tokenize("  LOADC, 5 # comment");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text).collect();
        assert_eq!(texts, ["LOADC", "5"]);
        assert_eq!(tokens[0].offset, 3);
        assert_eq!(tokens[1].offset, 10);
    }

    #[test]
    fn tokenize_comment_only_line() {
        assert!(tokenize("# nothing here").is_empty());
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn assembles_every_mnemonic() {
        for op in Opcode::ALL {
            let line = if op.takes_argument() {
                format!("{} 0", op.mnemonic())
            } else {
                op.mnemonic().to_string()
            };
            let program = assemble(&line);
            assert_eq!(program.len(), 1);
            assert_eq!(program[0].opcode(), *op);
        }
    }

    #[test]
    fn mnemonics_are_case_insensitive() {
        assert_eq!(
            assemble("loadc 3\nLoadC -4\nadd"),
            [
                Instruction::LoadC { value: 3 },
                Instruction::LoadC { value: -4 },
                Instruction::Add,
            ]
        );
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let program = assemble(
            r#"
                # header comment

                LOADC 1   # trailing comment
                POP
            "#,
        );
        assert_eq!(program, [Instruction::LoadC { value: 1 }, Instruction::Pop]);
    }

    #[test]
    fn labels_resolve_to_instruction_indices() {
        let program = assemble(
            r#"
                start:
                    LOADC 0
                    JUMPZ end
                    JUMP start
                end: DUP
            "#,
        );
        assert_eq!(
            program,
            [
                Instruction::LoadC { value: 0 },
                Instruction::JumpZ { target: 3 },
                Instruction::Jump { target: 0 },
                Instruction::Dup,
            ]
        );
    }

    #[test]
    fn forward_label_at_end_of_program() {
        let program = assemble("JUMP end\nend:");
        assert_eq!(program, [Instruction::Jump { target: 1 }]);
    }

    #[test]
    fn unknown_mnemonic() {
        let (line, offset, message) = assembly_err("LOADC 1\n  HALT");
        assert_eq!((line, offset), (2, 3));
        assert_eq!(message, "invalid instruction name: HALT");
    }

    #[test]
    fn missing_argument() {
        let (line, _, message) = assembly_err("LOADC");
        assert_eq!(line, 1);
        assert_eq!(message, "LOADC expects 1 argument(s) but got 0");
    }

    #[test]
    fn unexpected_argument() {
        let (_, _, message) = assembly_err("ADD 1");
        assert_eq!(message, "ADD expects 0 argument(s) but got 1");
    }

    #[test]
    fn invalid_immediate() {
        let (line, offset, message) = assembly_err("LOADC 99999999999");
        assert_eq!((line, offset), (1, 7));
        assert_eq!(message, "invalid integer argument: 99999999999");
    }

    #[test]
    fn duplicate_label() {
        let (line, _, message) = assembly_err("a: POP\na: POP");
        assert_eq!(line, 2);
        assert_eq!(message, "duplicate label: a");
    }

    #[test]
    fn undefined_label() {
        let (_, _, message) = assembly_err("JUMP nowhere");
        assert_eq!(message, "undefined label: nowhere");
    }

    #[test]
    fn diagnostic_points_at_column() {
        let diag = render_assembly_diagnostic("prog.cma", "LOADC 1\n  HALT", 2, 3, "boom");
        assert_eq!(
            diag,
            "error: boom\n --> prog.cma:2:3\n     |\n   2 |   HALT\n     |   ^\n"
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = assemble_file("/definitely/not/here.cma").unwrap_err();
        assert!(matches!(err, VMError::IoError { .. }));
    }
}
