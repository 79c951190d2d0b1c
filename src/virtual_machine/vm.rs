//! Core virtual machine implementation.
//!
//! The machine executes a [`Program`] one instruction at a time against an
//! operand stack of [`MEMMAX`] 32-bit cells. All arithmetic uses wrapping
//! semantics so that no program can trigger an overflow panic.
//!
//! # Step contract
//!
//! [`Machine::step`] fetches the instruction at `ip`, advances `ip`, applies
//! the instruction to the [`MachineState`], and then validates the state:
//!
//! 1. `sp >= MEMMAX` or `hp >= MEMMAX` fails with [`VMError::MemoryOverflow`]
//! 2. `ip < 0` or `ip > len` fails with [`VMError::IllegalInstructionAccess`]
//!
//! There is no halt instruction. A program terminates by falling off its end,
//! i.e. when `ip == len` after a step.

mod memory;

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::program::Program;
use memory::Memory;
use std::fmt;
use std::fmt::Write;

pub use memory::MEMMAX;

/// Externally observable machine states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MachineStatus {
    /// `ip` is inside the program and no fault has occurred.
    Running,
    /// `ip == len`; the program ran to completion.
    Halted,
    /// A step failed. Terminal.
    Faulted,
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MachineStatus::Running => "running",
            MachineStatus::Halted => "halted",
            MachineStatus::Faulted => "faulted",
        })
    }
}

/// Interface for drivers that step or run an abstract machine.
pub trait VirtualMachine {
    /// Executes exactly one instruction.
    fn step(&mut self) -> Result<(), VMError>;

    /// Steps until the program falls off its end.
    fn run(&mut self) -> Result<MachineStatus, VMError>;
}

/// Mutable execution state: stack and heap memory plus their pointers.
///
/// Opcode handlers receive it by `&mut` from [`Machine`], which owns it
/// exclusively. Cells above `sp` hold stale values.
pub struct MachineState {
    /// Operand stack.
    stack: Memory,
    /// Reserved; no instruction touches it yet.
    heap: Memory,
    /// Index of the topmost live stack cell, `-1` when empty.
    sp: i64,
    /// Index of the topmost heap cell, always `-1`.
    hp: i64,
    /// Index of the next instruction to fetch.
    ip: i64,
}

impl MachineState {
    fn new() -> Self {
        Self {
            stack: Memory::new(),
            heap: Memory::new(),
            sp: -1,
            hp: -1,
            ip: 0,
        }
    }

    pub fn sp(&self) -> i64 {
        self.sp
    }

    pub fn hp(&self) -> i64 {
        self.hp
    }

    pub fn ip(&self) -> i64 {
        self.ip
    }

    /// All `MEMMAX` stack cells, including stale ones above `sp`.
    pub fn stack(&self) -> &[i32] {
        self.stack.cells()
    }

    /// Stack cells `0..=sp`.
    pub fn live_stack(&self) -> &[i32] {
        self.stack.up_to(self.sp)
    }

    pub fn heap(&self) -> &[i32] {
        self.heap.cells()
    }

    /// Post-step validation, run after every instruction.
    fn check_bounds(&self, len: usize) -> Result<(), VMError> {
        if self.sp >= MEMMAX as i64 || self.hp >= MEMMAX as i64 {
            return Err(VMError::MemoryOverflow {
                sp: self.sp,
                hp: self.hp,
                capacity: MEMMAX,
            });
        }
        if self.ip < 0 || self.ip > len as i64 {
            return Err(VMError::IllegalInstructionAccess { ip: self.ip, len });
        }
        Ok(())
    }

    /// Fails with [`VMError::StackUnderflow`] unless `sp >= min_sp`.
    fn require(&self, instr: &'static str, min_sp: i64) -> Result<(), VMError> {
        if self.sp < min_sp {
            return Err(VMError::StackUnderflow {
                instruction: instr,
                sp: self.sp,
            });
        }
        Ok(())
    }

    /// Reads stack cell `addr`.
    fn cell(&self, instr: &'static str, addr: i64) -> Result<i32, VMError> {
        self.stack
            .get(addr)
            .ok_or(VMError::IllegalStackMemoryAccess {
                instruction: instr,
                address: addr,
                sp: self.sp,
            })
    }

    /// Writes stack cell `addr`.
    ///
    /// Writing at or past `MEMMAX` is a [`VMError::MemoryOverflow`]; a negative
    /// address is an [`VMError::IllegalStackMemoryAccess`].
    fn set_cell(&mut self, instr: &'static str, addr: i64, value: i32) -> Result<(), VMError> {
        let (sp, hp) = (self.sp, self.hp);
        let slot = self.stack.get_mut(addr).ok_or(if addr < 0 {
            VMError::IllegalStackMemoryAccess {
                instruction: instr,
                address: addr,
                sp,
            }
        } else {
            VMError::MemoryOverflow {
                sp: addr.max(sp),
                hp,
                capacity: MEMMAX,
            }
        })?;
        *slot = value;
        Ok(())
    }

    fn top(&self, instr: &'static str) -> Result<i32, VMError> {
        self.cell(instr, self.sp)
    }

    fn push(&mut self, instr: &'static str, value: i32) -> Result<(), VMError> {
        self.set_cell(instr, self.sp + 1, value)?;
        self.sp += 1;
        Ok(())
    }

    /// Pops `second` (top) and `first` (below it) and pushes `f(first, second)`.
    ///
    /// Nothing is modified if `f` fails.
    fn binary_op<F>(&mut self, instr: &'static str, min_sp: i64, f: F) -> Result<(), VMError>
    where
        F: FnOnce(i32, i32) -> Result<i32, VMError>,
    {
        self.require(instr, min_sp)?;
        let second = self.top(instr)?;
        let first = self.cell(instr, self.sp - 1)?;
        let result = f(first, second)?;
        self.set_cell(instr, self.sp - 1, result)?;
        self.sp -= 1;
        Ok(())
    }

    /// Replaces the top cell with `f(top)`.
    fn unary_op(&mut self, instr: &'static str, f: impl FnOnce(i32) -> i32) -> Result<(), VMError> {
        self.require(instr, 0)?;
        let value = f(self.top(instr)?);
        self.set_cell(instr, self.sp, value)
    }

    /// Jump targets must lie inside the program when the jump executes.
    fn check_target(target: i32, len: usize) -> Result<(), VMError> {
        if i64::from(target) >= len as i64 {
            return Err(VMError::IllegalInstructionAccess {
                ip: target.into(),
                len,
            });
        }
        Ok(())
    }

    // ==================== Constants ====================

    fn op_loadc(&mut self, instr: &'static str, value: i32) -> Result<(), VMError> {
        self.push(instr, value)
    }

    // ==================== Arithmetic ====================

    fn op_add(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(a.wrapping_add(b)))
    }

    fn op_sub(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(a.wrapping_sub(b)))
    }

    fn op_mul(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(a.wrapping_mul(b)))
    }

    fn op_div(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| {
            if b == 0 {
                return Err(VMError::DivisionByZero { instruction: instr });
            }
            Ok(a.wrapping_div(b))
        })
    }

    fn op_mod(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| {
            if b == 0 {
                return Err(VMError::DivisionByZero { instruction: instr });
            }
            Ok(a.wrapping_rem(b))
        })
    }

    // ==================== Logic ====================

    fn op_and(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(i32::from(a != 0 && b != 0)))
    }

    fn op_or(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(i32::from(a != 0 || b != 0)))
    }

    /// Requires three live cells, one more than the other binary operators.
    fn op_xor(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 2, |a, b| Ok(i32::from((a != 0) != (b != 0))))
    }

    // ==================== Comparison ====================

    fn op_eq(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(i32::from(a == b)))
    }

    fn op_neq(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(i32::from(a != b)))
    }

    fn op_le(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(i32::from(a < b)))
    }

    fn op_leq(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(i32::from(a <= b)))
    }

    fn op_gr(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(i32::from(a > b)))
    }

    fn op_geq(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.binary_op(instr, 1, |a, b| Ok(i32::from(a >= b)))
    }

    // ==================== Negation ====================

    fn op_not(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.unary_op(instr, |v| i32::from(v == 0))
    }

    fn op_neg(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.unary_op(instr, i32::wrapping_neg)
    }

    // ==================== Memory ====================

    fn op_load(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.require(instr, 0)?;
        let addr = i64::from(self.top(instr)?);
        if addr > self.sp {
            return Err(VMError::IllegalStackMemoryAccess {
                instruction: instr,
                address: addr,
                sp: self.sp,
            });
        }
        let value = self.cell(instr, addr)?;
        self.set_cell(instr, self.sp, value)
    }

    /// Pops the address; the stored value stays on top of the stack.
    fn op_store(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.require(instr, 1)?;
        let addr = i64::from(self.top(instr)?);
        let below = self.sp - 1;
        if addr > below {
            return Err(VMError::IllegalStackMemoryAccess {
                instruction: instr,
                address: addr,
                sp: self.sp,
            });
        }
        let value = self.cell(instr, below)?;
        self.set_cell(instr, addr, value)?;
        self.sp = below;
        Ok(())
    }

    fn op_loada(&mut self, instr: &'static str, addr: i32) -> Result<(), VMError> {
        let addr = i64::from(addr);
        if addr > self.sp {
            return Err(VMError::IllegalStackMemoryAccess {
                instruction: instr,
                address: addr,
                sp: self.sp,
            });
        }
        let value = self.cell(instr, addr)?;
        self.push(instr, value)
    }

    fn op_storea(&mut self, instr: &'static str, addr: i32) -> Result<(), VMError> {
        let addr = i64::from(addr);
        if addr > self.sp || self.sp < 0 {
            return Err(VMError::IllegalStackMemoryAccess {
                instruction: instr,
                address: addr,
                sp: self.sp,
            });
        }
        let value = self.top(instr)?;
        self.set_cell(instr, addr, value)
    }

    fn op_pop(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.require(instr, 0)?;
        self.sp -= 1;
        Ok(())
    }

    // ==================== Control flow ====================

    fn op_jump(&mut self, _instr: &'static str, target: i32, len: usize) -> Result<(), VMError> {
        Self::check_target(target, len)?;
        self.ip = target.into();
        Ok(())
    }

    /// The condition is consumed whether or not the jump is taken.
    fn op_jumpz(&mut self, instr: &'static str, target: i32, len: usize) -> Result<(), VMError> {
        Self::check_target(target, len)?;
        self.require(instr, 0)?;
        if self.top(instr)? == 0 {
            self.ip = target.into();
        }
        self.sp -= 1;
        Ok(())
    }

    /// Only `target` is checked here; `target + offset` is left to the
    /// post-step check.
    fn op_jumpi(&mut self, instr: &'static str, target: i32, len: usize) -> Result<(), VMError> {
        Self::check_target(target, len)?;
        self.require(instr, 0)?;
        let offset = self.top(instr)?;
        self.ip = i64::from(target) + i64::from(offset);
        self.sp -= 1;
        Ok(())
    }

    fn op_dup(&mut self, instr: &'static str) -> Result<(), VMError> {
        self.require(instr, 0)?;
        let value = self.top(instr)?;
        self.push(instr, value)
    }

    // ==================== Allocation ====================

    fn op_alloc(&mut self, _instr: &'static str, count: i32) -> Result<(), VMError> {
        self.sp += i64::from(count);
        Ok(())
    }
}

/// Applies one instruction to `state`.
///
/// `len` is the program length, needed by the jump instructions.
fn execute(state: &mut MachineState, instruction: Instruction, len: usize) -> Result<(), VMError> {
    let instr = instruction.mnemonic();
    match instruction {
        Instruction::LoadC { value } => state.op_loadc(instr, value),
        Instruction::Add => state.op_add(instr),
        Instruction::Sub => state.op_sub(instr),
        Instruction::Mul => state.op_mul(instr),
        Instruction::Div => state.op_div(instr),
        Instruction::Mod => state.op_mod(instr),
        Instruction::And => state.op_and(instr),
        Instruction::Or => state.op_or(instr),
        Instruction::Xor => state.op_xor(instr),
        Instruction::Eq => state.op_eq(instr),
        Instruction::Neq => state.op_neq(instr),
        Instruction::Le => state.op_le(instr),
        Instruction::Leq => state.op_leq(instr),
        Instruction::Gr => state.op_gr(instr),
        Instruction::Geq => state.op_geq(instr),
        Instruction::Not => state.op_not(instr),
        Instruction::Neg => state.op_neg(instr),
        Instruction::Load => state.op_load(instr),
        Instruction::Store => state.op_store(instr),
        Instruction::LoadA { address } => state.op_loada(instr, address),
        Instruction::StoreA { address } => state.op_storea(instr, address),
        Instruction::Pop => state.op_pop(instr),
        Instruction::Jump { target } => state.op_jump(instr, target, len),
        Instruction::JumpZ { target } => state.op_jumpz(instr, target, len),
        Instruction::JumpI { target } => state.op_jumpi(instr, target, len),
        Instruction::Dup => state.op_dup(instr),
        Instruction::Alloc { count } => state.op_alloc(instr, count),
    }
}

/// CMa abstract machine.
///
/// Owns its program and all execution state. Drive it with [`step`](Self::step)
/// or [`run`](Self::run); once it has halted or faulted it accepts no more
/// steps. Build a new machine to run again.
pub struct Machine {
    /// Instructions to execute.
    program: Program,
    /// Stack, heap and pointers.
    state: MachineState,
    status: MachineStatus,
    /// Instructions fetched so far, including a faulting one.
    steps: u64,
}

impl Machine {
    /// Creates a machine at `sp = hp = -1`, `ip = 0`.
    ///
    /// An empty program starts out [`Halted`](MachineStatus::Halted).
    pub fn new(program: Program) -> Self {
        let status = if program.is_empty() {
            MachineStatus::Halted
        } else {
            MachineStatus::Running
        };
        Self {
            program,
            state: MachineState::new(),
            status,
            steps: 0,
        }
    }

    /// Executes the instruction at `ip` and validates the resulting state.
    ///
    /// Any error moves the machine to [`Faulted`](MachineStatus::Faulted).
    /// Returns [`VMError::NotRunning`] without touching the state if the
    /// machine has already halted or faulted.
    pub fn step(&mut self) -> Result<(), VMError> {
        if self.status != MachineStatus::Running {
            return Err(VMError::NotRunning {
                status: self.status,
            });
        }

        match self.advance() {
            Ok(()) => {
                if self.state.ip == self.program.len() as i64 {
                    self.status = MachineStatus::Halted;
                }
                Ok(())
            }
            Err(err) => {
                self.status = MachineStatus::Faulted;
                Err(err)
            }
        }
    }

    /// Steps until `ip` reaches the end of the program.
    ///
    /// Returns [`MachineStatus::Halted`] on success. The first fault aborts
    /// the run and is returned as-is.
    pub fn run(&mut self) -> Result<MachineStatus, VMError> {
        loop {
            match self.status {
                MachineStatus::Running => self.step()?,
                MachineStatus::Halted => return Ok(MachineStatus::Halted),
                MachineStatus::Faulted => {
                    return Err(VMError::NotRunning {
                        status: MachineStatus::Faulted,
                    });
                }
            }
        }
    }

    /// Fetch, advance, execute, validate.
    fn advance(&mut self) -> Result<(), VMError> {
        let len = self.program.len();
        let instruction = usize::try_from(self.state.ip)
            .ok()
            .and_then(|ip| self.program.get(ip))
            .ok_or(VMError::IllegalInstructionAccess {
                ip: self.state.ip,
                len,
            })?;
        self.state.ip += 1;
        self.steps += 1;

        execute(&mut self.state, instruction, len)?;
        self.state.check_bounds(len)
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    /// Instructions fetched so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn sp(&self) -> i64 {
        self.state.sp
    }

    pub fn hp(&self) -> i64 {
        self.state.hp
    }

    pub fn ip(&self) -> i64 {
        self.state.ip
    }

    /// All `MEMMAX` stack cells. Read-only; for debugging and tests.
    pub fn stack(&self) -> &[i32] {
        self.state.stack()
    }

    /// Stack cells `0..=sp`.
    pub fn live_stack(&self) -> &[i32] {
        self.state.live_stack()
    }

    pub fn heap(&self) -> &[i32] {
        self.state.heap()
    }

    /// Renders the live stack as one `Addr i: v` line per cell, bottom first.
    pub fn dump_stack(&self) -> String {
        let mut out = String::new();
        for (addr, value) in self.live_stack().iter().enumerate() {
            let _ = writeln!(out, "Addr {addr}: {value}");
        }
        out
    }
}

impl VirtualMachine for Machine {
    fn step(&mut self) -> Result<(), VMError> {
        Machine::step(self)
    }

    fn run(&mut self) -> Result<MachineStatus, VMError> {
        Machine::run(self)
    }
}
