//! CMa abstract machine.
//!
//! A teaching-oriented stack machine: a fixed set of 27 instructions executed
//! against a bounds-checked operand stack, plus a `.cma` text loader and
//! logging support for the `cma` runner.

pub mod utils;
pub mod virtual_machine;
