//! Implementation of `#[derive(Validate)]`.
//!
//! Each `#[validate(...)]` attribute contributes one or more [`Rule`]s to its
//! field; the generated `validate` method runs every rule and collects one
//! message per failure.

use proc_macro2::TokenStream;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{DeriveInput, Ident, Lit, Result};

/// A single check on a field.
enum Rule {
    /// `len() > 0` (strings and collections).
    NonEmpty,
    /// Numeric value other than zero.
    NonZero,
    /// Numeric lower bound, inclusive.
    Min(f64),
    /// Numeric upper bound, inclusive.
    Max(f64),
}

impl Rule {
    /// Tokens pushing a message onto `errors` when `self.<field>` fails.
    fn check(&self, field: &Ident) -> TokenStream {
        let label = field.to_string();
        // NaN fails both bounds.
        match self {
            Rule::NonEmpty => quote! {
                if self.#field.is_empty() {
                    errors.push(format!("{}: must not be empty", #label));
                }
            },
            Rule::NonZero => quote! {
                if (self.#field as f64) == 0.0 {
                    errors.push(format!("{}: must be non-zero", #label));
                }
            },
            Rule::Min(min) => {
                let min = number_tokens(*min);
                quote! {
                    let value = self.#field as f64;
                    if value.is_nan() || value < #min {
                        errors.push(format!("{}: must be at least {}", #label, #min));
                    }
                }
            }
            Rule::Max(max) => {
                let max = number_tokens(*max);
                quote! {
                    let value = self.#field as f64;
                    if value.is_nan() || value > #max {
                        errors.push(format!("{}: must be at most {}", #label, #max));
                    }
                }
            }
        }
    }
}

/// `f64` literal tokens; negative values become `-` plus the magnitude.
fn number_tokens(value: f64) -> TokenStream {
    if value.is_sign_negative() {
        let magnitude = -value;
        quote! { (-#magnitude) }
    } else {
        quote! { #value }
    }
}

/// Rules declared on one field, in attribute order.
fn field_rules(field: &syn::Field) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("validate")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("non_empty") {
                rules.push(Rule::NonEmpty);
            } else if meta.path.is_ident("non_zero") {
                rules.push(Rule::NonZero);
            } else if meta.path.is_ident("range") {
                meta.parse_nested_meta(|bound| {
                    if bound.path.is_ident("min") {
                        rules.push(Rule::Min(parse_number(&bound)?));
                    } else if bound.path.is_ident("max") {
                        rules.push(Rule::Max(parse_number(&bound)?));
                    } else {
                        return Err(bound.error("expected `min` or `max`"));
                    }
                    Ok(())
                })?;
            } else {
                return Err(meta.error("unknown validate rule; expected non_empty, non_zero, or range"));
            }
            Ok(())
        })?;
    }
    Ok(rules)
}

/// Parse `= <int or float literal>`, allowing a leading minus sign.
fn parse_number(meta: &ParseNestedMeta) -> Result<f64> {
    let value = meta.value()?;
    let negative = value.peek(syn::Token![-]);
    if negative {
        value.parse::<syn::Token![-]>()?;
    }
    let magnitude = match value.parse::<Lit>()? {
        Lit::Int(lit) => lit.base10_parse::<f64>()?,
        Lit::Float(lit) => lit.base10_parse::<f64>()?,
        other => return Err(syn::Error::new_spanned(other, "expected a numeric literal")),
    };
    Ok(if negative { -magnitude } else { magnitude })
}

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let syn::Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(name, "Validate can only be derived for structs"));
    };
    let syn::Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            name,
            "Validate only supports structs with named fields",
        ));
    };

    let mut checks = Vec::new();
    for field in &fields.named {
        let Some(ident) = &field.ident else { continue };
        for rule in field_rules(field)? {
            // Each check gets its own block so `value` bindings don't clash.
            let check = rule.check(ident);
            checks.push(quote! { { #check } });
        }
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #name #ty_generics #where_clause {
            /// Check every `#[validate]` rule, collecting one message per
            /// failed rule.
            pub fn validate(&self) -> ::std::result::Result<(), ::std::vec::Vec<::std::string::String>> {
                let mut errors: ::std::vec::Vec<::std::string::String> = ::std::vec::Vec::new();
                #(#checks)*
                if errors.is_empty() {
                    ::std::result::Result::Ok(())
                } else {
                    ::std::result::Result::Err(errors)
                }
            }
        }
    })
}
