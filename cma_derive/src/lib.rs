//! Derive macros for the `cma` crate.
//!
//! Provides `#[derive(Error)]`, which turns an enum whose variants carry
//! `#[error("...")]` messages into a `Display` + `std::error::Error` type.

mod error;

use proc_macro::TokenStream;

/// Implements `Display` and `std::error::Error` for an error enum.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
