//! Stack-based abstract machine for the CMa instruction set.
//!
//! The machine executes a [`program::Program`] of decoded instructions produced
//! by a compiler front end (or the [`assembler`] loader) and is used by the
//! `cma` runner and by tests.
//!
//! # Architecture
//!
//! - **Stack**: [`vm::MEMMAX`] signed 32-bit cells; `sp` points at the top
//!   live cell and is `-1` when empty
//! - **Heap**: same capacity, reserved; `hp` stays `-1`
//! - **Instruction pointer**: index into the program; execution ends when it
//!   reaches the program length (there is no halt instruction)
//! - **Checks**: every opcode validates its operands before it mutates
//!   anything, and every step ends with a memory and `ip` bounds check
//!
//! # Modules
//!
//! - [`assembler`]: `.cma` source parsing with labels and diagnostics
//! - [`errors`]: Loader and execution error types
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`program`]: Immutable instruction sequence
//! - [`vm`]: Machine state, dispatch and the step/run loop

pub mod assembler;
pub mod errors;
pub mod isa;
pub mod program;
pub mod vm;
