#![deny(unsafe_code)]

//! Procedural macros for SpriteNav.
//!
//! - `#[derive(Validate)]` generates a `validate()` method from field annotations.
//!   The configuration sections in `spritenav-config` use it for their
//!   per-field bounds.

extern crate proc_macro;

mod validate;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derive macro for field-level input validation.
///
/// Generates a `validate(&self) -> Result<(), Vec<String>>` method that
/// checks field constraints at runtime.
///
/// Supported attributes:
/// - `#[validate(non_empty)]`: string/collection must not be empty
/// - `#[validate(non_zero)]`: numeric value must not be zero
/// - `#[validate(range(min = N, max = M))]`: numeric value in [N, M]; integer or
///   float literals are accepted, and either bound may be omitted
///
/// # Example
///
/// ```ignore
/// use spritenav_macros::Validate;
///
/// #[derive(Validate)]
/// struct CacheSection {
///     #[validate(non_zero)]
///     pub memory_capacity: usize,
///     #[validate(range(min = 0.0, max = 1.0))]
///     pub threshold: f64,
///     #[validate(non_empty)]
///     pub cache_dir: String,
/// }
/// ```
#[proc_macro_derive(Validate, attributes(validate))]
pub fn derive_validate(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    validate::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
