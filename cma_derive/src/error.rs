//! `#[derive(Error)]` for error enums.
//!
//! ```ignore
//! use cma_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum LoadError {
//!     #[error("unknown mnemonic {name}")]
//!     UnknownMnemonic { name: String },
//!
//!     #[error("line {0}: {1}")]
//!     Line(usize, String),
//!
//!     #[error("empty program")]
//!     Empty,
//! }
//! ```
//!
//! Struct variants interpolate fields by name, tuple variants by position
//! (`{0}`, `{1}`, ...), unit variants print the message verbatim.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DataEnum, DeriveInput, Fields, LitStr, Variant, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let expanded = match &input.data {
        Data::Enum(data) => expand_enum(&input, data),
        _ => Err(syn::Error::new_spanned(
            &input.ident,
            "#[derive(Error)] only supports enums",
        )),
    };

    expanded
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_enum(input: &DeriveInput, data: &DataEnum) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let arms = data
        .variants
        .iter()
        .map(display_arm)
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#arms)*
                }
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Builds the `match` arm that formats one variant.
fn display_arm(variant: &Variant) -> syn::Result<TokenStream2> {
    let ident = &variant.ident;
    let message = error_message(variant)?;

    Ok(match &variant.fields {
        Fields::Unit => quote! {
            Self::#ident => write!(f, #message),
        },
        Fields::Named(fields) => {
            let names: Vec<_> = fields.named.iter().filter_map(|f| f.ident.as_ref()).collect();
            let used: Vec<_> = names
                .iter()
                .filter(|name| references(&message, &name.to_string()))
                .collect();
            quote! {
                #[allow(unused_variables)]
                Self::#ident { #(#names),* } => write!(f, #message, #(#used = #used),*),
            }
        }
        Fields::Unnamed(fields) => {
            let count = fields.unnamed.len();
            let bindings: Vec<_> = (0..count).map(|i| format_ident!("_{}", i)).collect();
            let message = rename_positional(&message, count);
            let used: Vec<_> = bindings
                .iter()
                .filter(|binding| references(&message, &binding.to_string()))
                .collect();
            quote! {
                #[allow(unused_variables)]
                Self::#ident(#(#bindings),*) => write!(f, #message, #(#used = #used),*),
            }
        }
    })
}

/// Reads the string literal out of a variant's `#[error("...")]` attribute.
fn error_message(variant: &Variant) -> syn::Result<String> {
    let attr = variant
        .attrs
        .iter()
        .find(|attr| attr.path().is_ident("error"))
        .ok_or_else(|| {
            syn::Error::new_spanned(
                &variant.ident,
                format!(
                    "variant `{}` is missing its #[error(\"...\")] message",
                    variant.ident
                ),
            )
        })?;

    attr.parse_args::<LitStr>()
        .map(|lit| lit.value())
        .map_err(|_| {
            syn::Error::new_spanned(
                attr,
                "expected a string literal message, e.g. #[error(\"stack underflow\")]",
            )
        })
}

/// Whether `message` interpolates the argument `name`.
fn references(message: &str, name: &str) -> bool {
    message.contains(&format!("{{{name}}}")) || message.contains(&format!("{{{name}:"))
}

/// Rewrites `{0}`-style placeholders to the `_0`-style bindings used in the arm.
///
/// Format specs survive the rename: `{0:>4}` becomes `{_0:>4}`.
fn rename_positional(message: &str, count: usize) -> String {
    (0..count).rev().fold(message.to_string(), |acc, i| {
        acc.replace(&format!("{{{i}}}"), &format!("{{_{i}}}"))
            .replace(&format!("{{{i}:"), &format!("{{_{i}:"))
    })
}
