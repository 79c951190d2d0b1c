//! Support code shared by the library and the `cma` runner.

pub mod log;
