use crate::virtual_machine::vm::MachineStatus;
use cma_derive::Error;

/// Errors raised while loading or executing a CMa program.
///
/// The first group are machine faults: any of them aborts the run and leaves
/// the engine [`Faulted`](MachineStatus::Faulted). The rest come from the
/// loader and are reported before an engine exists.
#[derive(Debug, Error)]
pub enum VMError {
    /// An opcode needed more live stack cells than present.
    #[error("not enough arguments on the stack to call {instruction} (sp = {sp})")]
    StackUnderflow { instruction: &'static str, sp: i64 },
    /// A stack access addressed a cell outside the live region.
    #[error("illegal stack memory access by {instruction}: address {address} with sp = {sp}")]
    IllegalStackMemoryAccess {
        instruction: &'static str,
        address: i64,
        sp: i64,
    },
    /// DIV or MOD with a zero divisor.
    #[error("division by zero in {instruction}")]
    DivisionByZero { instruction: &'static str },
    /// Stack or heap pointer reached the memory capacity.
    #[error("memory overflow: sp = {sp}, hp = {hp}, capacity = {capacity}")]
    MemoryOverflow { sp: i64, hp: i64, capacity: usize },
    /// Instruction pointer or jump target outside the program.
    #[error("illegal instruction memory access: {ip} is outside a program of length {len}")]
    IllegalInstructionAccess { ip: i64, len: usize },
    /// Opcode byte outside the instruction set.
    #[error("unsupported operation: unknown opcode 0x{opcode:02x}")]
    UnsupportedOperation { opcode: u8 },
    /// `step()` called on a machine that already halted or faulted.
    #[error("machine is not running (status: {status})")]
    NotRunning { status: MachineStatus },

    /// Unrecognized mnemonic in `.cma` source.
    #[error("invalid instruction name: {name}")]
    InvalidInstructionName { name: String },
    /// Wrong number of arguments for an instruction.
    #[error("{instruction} expects {expected} argument(s) but got {actual}")]
    ArityMismatch {
        instruction: String,
        expected: usize,
        actual: usize,
    },
    /// Argument is neither an `i32` literal nor a label.
    #[error("invalid integer argument: {token}")]
    InvalidImmediate { token: String },
    /// Label defined more than once.
    #[error("duplicate label: {label}")]
    DuplicateLabel { label: String },
    /// Reference to an undefined label.
    #[error("undefined label: {label}")]
    UndefinedLabel { label: String },
    /// Loader error with line and column context.
    #[error("line {line}:{offset}: {message}")]
    AssemblyError {
        line: usize,
        offset: usize,
        message: String,
    },
    /// File could not be read.
    #[error("io error: {reason}")]
    IoError { reason: String },
}

impl VMError {
    /// Returns `true` for errors raised by the engine, `false` for loader errors.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            VMError::StackUnderflow { .. }
                | VMError::IllegalStackMemoryAccess { .. }
                | VMError::DivisionByZero { .. }
                | VMError::MemoryOverflow { .. }
                | VMError::IllegalInstructionAccess { .. }
                | VMError::UnsupportedOperation { .. }
                | VMError::NotRunning { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underflow_names_the_instruction() {
        let err = VMError::StackUnderflow {
            instruction: "ADD",
            sp: 0,
        };
        assert_eq!(
            err.to_string(),
            "not enough arguments on the stack to call ADD (sp = 0)"
        );
    }

    #[test]
    fn unsupported_operation_prints_hex_opcode() {
        let err = VMError::UnsupportedOperation { opcode: 0xAB };
        assert_eq!(err.to_string(), "unsupported operation: unknown opcode 0xab");
    }

    #[test]
    fn loader_errors_are_not_faults() {
        assert!(VMError::DivisionByZero { instruction: "DIV" }.is_fault());
        assert!(
            !VMError::UndefinedLabel {
                label: "loop".to_string()
            }
            .is_fault()
        );
    }
}
