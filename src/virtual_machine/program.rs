//! Program representation.
//!
//! A [`Program`] is the ordered, immutable instruction sequence a
//! [`Machine`](crate::virtual_machine::vm::Machine) executes. Programs are built
//! by a loader (see [`assembler`](super::assembler)) or directly from a
//! `Vec<Instruction>`; jump targets and addresses are not verified here, the
//! engine checks them when the instruction executes.

use crate::virtual_machine::isa::Instruction;
use std::fmt;

/// Immutable sequence of decoded instructions, indexed from 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    instructions: Box<[Instruction]>,
}

impl Program {
    /// Creates a program from an instruction list.
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions: instructions.into_boxed_slice(),
        }
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns the instruction at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<Instruction> {
        self.instructions.get(index).copied()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }
}

impl From<Vec<Instruction>> for Program {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}

impl FromIterator<Instruction> for Program {
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Listing with one `index: instruction` line per instruction.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.len().saturating_sub(1).to_string().len();
        for (index, instr) in self.instructions.iter().enumerate() {
            writeln!(f, "{index:>width$}: {instr}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        vec![
            Instruction::LoadC { value: 10 },
            Instruction::LoadC { value: 5 },
            Instruction::Add,
        ]
        .into()
    }

    #[test]
    fn empty_program() {
        let program = Program::default();
        assert!(program.is_empty());
        assert_eq!(program.len(), 0);
        assert_eq!(program.get(0), None);
    }

    #[test]
    fn get_returns_instructions_in_order() {
        let program = sample();
        assert_eq!(program.len(), 3);
        assert_eq!(program.get(0), Some(Instruction::LoadC { value: 10 }));
        assert_eq!(program.get(2), Some(Instruction::Add));
        assert_eq!(program.get(3), None);
    }

    #[test]
    fn collects_from_iterator() {
        let program: Program = (1..=3).map(|value| Instruction::LoadC { value }).collect();
        assert_eq!(program.len(), 3);
        assert_eq!(program.instructions()[1], Instruction::LoadC { value: 2 });
    }

    #[test]
    fn listing_numbers_each_line() {
        assert_eq!(sample().to_string(), "0: LOADC 10\n1: LOADC 5\n2: ADD\n");
    }

    #[test]
    fn listing_pads_indices() {
        let program: Program = std::iter::repeat_n(Instruction::Dup, 11).collect();
        let listing = program.to_string();
        assert!(listing.starts_with(" 0: DUP\n"));
        assert!(listing.ends_with("10: DUP\n"));
    }
}
