//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical list of the 27 CMa instructions and invokes a callback macro for
//! code generation, so the opcode table is written down exactly once.
//!
//! This module generates:
//! - [`Opcode`], the closed set of instruction tags, with `TryFrom<u8>`
//! - [`Instruction`], a sum type pairing each tag with its argument (if any)
//! - mnemonic lookup in both directions
//!
//! # Arguments
//!
//! Exactly `LOADC`, `LOADA`, `STOREA`, `JUMP`, `JUMPZ`, `JUMPI` and `ALLOC`
//! carry one `i32` argument. Every other instruction carries none.

use crate::virtual_machine::errors::VMError;
use std::fmt;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Constants
            // =========================
            /// LOADC c ; push c
            LoadC = 0x00, "LOADC" => [value],
            // =========================
            // Arithmetic
            // =========================
            /// ADD ; pop b, a ; push a + b
            Add = 0x01, "ADD" => [],
            /// SUB ; pop b, a ; push a - b
            Sub = 0x02, "SUB" => [],
            /// MUL ; pop b, a ; push a * b
            Mul = 0x03, "MUL" => [],
            /// DIV ; pop b, a ; push a / b (fault on b == 0)
            Div = 0x04, "DIV" => [],
            /// MOD ; pop b, a ; push a % b (fault on b == 0)
            Mod = 0x05, "MOD" => [],
            // =========================
            // Logic (0 is false, anything else is true)
            // =========================
            /// AND ; pop b, a ; push a && b
            And = 0x06, "AND" => [],
            /// OR ; pop b, a ; push a || b
            Or = 0x07, "OR" => [],
            /// XOR ; pop b, a ; push a != b as truth values
            Xor = 0x08, "XOR" => [],
            // =========================
            // Comparison
            // =========================
            /// EQ ; pop b, a ; push a == b
            Eq = 0x09, "EQ" => [],
            /// NEQ ; pop b, a ; push a != b
            Neq = 0x0A, "NEQ" => [],
            /// LE ; pop b, a ; push a < b
            Le = 0x0B, "LE" => [],
            /// LEQ ; pop b, a ; push a <= b
            Leq = 0x0C, "LEQ" => [],
            /// GR ; pop b, a ; push a > b
            Gr = 0x0D, "GR" => [],
            /// GEQ ; pop b, a ; push a >= b
            Geq = 0x0E, "GEQ" => [],
            // =========================
            // Negation
            // =========================
            /// NOT ; top = !top
            Not = 0x0F, "NOT" => [],
            /// NEG ; top = -top
            Neg = 0x10, "NEG" => [],
            // =========================
            // Memory
            // =========================
            /// LOAD ; top = S[top]
            Load = 0x11, "LOAD" => [],
            /// STORE ; pop a ; S[a] = top
            Store = 0x12, "STORE" => [],
            /// LOADA a ; push S[a]
            LoadA = 0x13, "LOADA" => [address],
            /// STOREA a ; S[a] = top
            StoreA = 0x14, "STOREA" => [address],
            /// POP ; drop top
            Pop = 0x15, "POP" => [],
            // =========================
            // Control flow
            // =========================
            /// JUMP t ; ip = t
            Jump = 0x16, "JUMP" => [target],
            /// JUMPZ t ; pop c ; if c == 0 then ip = t
            JumpZ = 0x17, "JUMPZ" => [target],
            /// JUMPI t ; pop o ; ip = t + o
            JumpI = 0x18, "JUMPI" => [target],
            /// DUP ; push top
            Dup = 0x19, "DUP" => [],
            // =========================
            // Allocation
            // =========================
            /// ALLOC k ; sp += k (cells left uninitialized)
            Alloc = 0x1A, "ALLOC" => [count],
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal => [ $( $field:ident )? ]
        ),* $(,)?
    ) => {
        // =========================
        // Opcode tags
        // =========================
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Opcode::$name), )*
                    _ => Err(VMError::UnsupportedOperation { opcode: value }),
                }
            }
        }

        impl Opcode {
            /// Every opcode, in encoding order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name, )* ];

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns `true` if instructions with this opcode carry an argument.
            pub const fn takes_argument(&self) -> bool {
                match self {
                    $( Opcode::$name => define_instructions!(@has $( $field )?), )*
                }
            }

            /// Looks up an opcode by mnemonic, ignoring ASCII case.
            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                match name.to_ascii_uppercase().as_str() {
                    $( $mnemonic => Some(Opcode::$name), )*
                    _ => None,
                }
            }
        }

        // =========================
        // Decoded instructions
        // =========================
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name $( { $field: i32 } )?,
            )*
        }

        impl Instruction {
            /// Builds an instruction from its tag and optional argument.
            ///
            /// Returns [`VMError::ArityMismatch`] if `argument` is present for an
            /// opcode without one, or missing for an opcode that needs one.
            pub fn new(opcode: Opcode, argument: Option<i32>) -> Result<Self, VMError> {
                match opcode {
                    $( Opcode::$name => define_instructions!(@build $name, opcode, argument $(, $field)?), )*
                }
            }

            /// Returns the opcode tag of this instruction.
            pub const fn opcode(&self) -> Opcode {
                match self {
                    $( Instruction::$name { .. } => Opcode::$name, )*
                }
            }

            /// Returns the integer argument, if this instruction carries one.
            pub const fn argument(&self) -> Option<i32> {
                match *self {
                    $( Instruction::$name { $( $field, )? .. } => define_instructions!(@arg $( $field )?), )*
                }
            }

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                self.opcode().mnemonic()
            }
        }
    };

    (@has $field:ident) => { true };
    (@has) => { false };

    (@arg $field:ident) => { Some($field) };
    (@arg) => { None };

    (@build $name:ident, $opcode:ident, $argument:ident, $field:ident) => {
        match $argument {
            Some($field) => Ok(Instruction::$name { $field }),
            None => Err(VMError::ArityMismatch {
                instruction: $opcode.mnemonic().to_string(),
                expected: 1,
                actual: 0,
            }),
        }
    };
    (@build $name:ident, $opcode:ident, $argument:ident) => {
        match $argument {
            None => Ok(Instruction::$name),
            Some(_) => Err(VMError::ArityMismatch {
                instruction: $opcode.mnemonic().to_string(),
                expected: 0,
                actual: 1,
            }),
        }
    };
}

for_each_instruction!(define_instructions);

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.argument() {
            Some(arg) => write!(f, "{} {}", self.mnemonic(), arg),
            None => f.write_str(self.mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_set_has_27_opcodes() {
        assert_eq!(Opcode::ALL.len(), 27);
    }

    #[test]
    fn opcodes_round_trip_through_u8() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as u8, i as u8);
            assert_eq!(Opcode::try_from(i as u8).unwrap(), *op);
        }
    }

    #[test]
    fn opcode_try_from_invalid() {
        assert!(matches!(
            Opcode::try_from(0xFF),
            Err(VMError::UnsupportedOperation { opcode: 0xFF })
        ));
    }

    #[test]
    fn exactly_seven_opcodes_take_an_argument() {
        let with_arg: Vec<&str> = Opcode::ALL
            .iter()
            .filter(|op| op.takes_argument())
            .map(|op| op.mnemonic())
            .collect();
        assert_eq!(
            with_arg,
            ["LOADC", "LOADA", "STOREA", "JUMP", "JUMPZ", "JUMPI", "ALLOC"]
        );
    }

    #[test]
    fn mnemonic_lookup_ignores_case() {
        assert_eq!(Opcode::from_mnemonic("jumpz"), Some(Opcode::JumpZ));
        assert_eq!(Opcode::from_mnemonic("LoadC"), Some(Opcode::LoadC));
        assert_eq!(Opcode::from_mnemonic("HALT"), None);
    }

    #[test]
    fn new_checks_argument_presence() {
        assert_eq!(
            Instruction::new(Opcode::LoadC, Some(7)).unwrap(),
            Instruction::LoadC { value: 7 }
        );
        assert_eq!(Instruction::new(Opcode::Add, None).unwrap(), Instruction::Add);
        assert!(matches!(
            Instruction::new(Opcode::Jump, None),
            Err(VMError::ArityMismatch {
                expected: 1,
                actual: 0,
                ..
            })
        ));
        assert!(matches!(
            Instruction::new(Opcode::Pop, Some(1)),
            Err(VMError::ArityMismatch {
                expected: 0,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn accessors_expose_tag_and_argument() {
        let instr = Instruction::Alloc { count: 5 };
        assert_eq!(instr.opcode(), Opcode::Alloc);
        assert_eq!(instr.argument(), Some(5));
        assert_eq!(Instruction::Dup.argument(), None);
    }

    #[test]
    fn display_matches_source_syntax() {
        assert_eq!(Instruction::LoadC { value: -3 }.to_string(), "LOADC -3");
        assert_eq!(Instruction::Geq.to_string(), "GEQ");
    }
}
