//! Derive macro for the crate's error enums.
//!
//! Every error family in the workspace is a tagged enum per layer (VM,
//! state, block, storage, assembler), so the derive supports exactly that
//! shape: an enum whose variants each carry an `#[error("...")]` message.
//! It generates `Display`, interpolating variant fields into the message,
//! and a blanket `std::error::Error` impl.
//!
//! ```ignore
//! use txvm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum StoreError {
//!     #[error("no block at height {0}")]
//!     MissingBlock(u64),
//!     #[error("conflicting block at height {height}")]
//!     Conflict { height: u64 },
//!     #[error("storage closed")]
//!     Closed,
//! }
//! ```
//!
//! Unnamed fields are addressed positionally (`{0}`, `{1}`); named fields
//! by name. Anything that is not an enum is rejected - a one-off error
//! struct (like the VM's fault dump) writes its `Display` by hand.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr};

/// Derives `Display` and `Error` for an error enum.
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let variants = match &input.data {
        Data::Enum(data) => &data.variants,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive supports enums only; implement Display by hand for other shapes",
            ))
        }
    };

    let mut arms = Vec::with_capacity(variants.len());
    for variant in variants {
        let name = &variant.ident;
        let message = message_of(variant)?;

        let arm = match &variant.fields {
            Fields::Unit => quote! {
                Self::#name => f.write_str(#message),
            },
            Fields::Unnamed(fields) => {
                // Bind positional fields to v0, v1, ... and rename the
                // message's positional holes to match.
                let binders: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| format_ident!("v{}", i))
                    .collect();
                let renamed = rename_positional_holes(&message, binders.len());
                quote! {
                    Self::#name(#(#binders),*) =>
                        write!(f, #renamed, #(#binders = #binders),*),
                }
            }
            Fields::Named(fields) => {
                let binders: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                quote! {
                    Self::#name { #(#binders),* } =>
                        write!(f, #message, #(#binders = #binders),*),
                }
            }
        };
        arms.push(arm);
    }

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
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

/// Extracts the `#[error("...")]` message from a variant.
fn message_of(variant: &syn::Variant) -> syn::Result<String> {
    for attr in &variant.attrs {
        if attr.path().is_ident("error") {
            return Ok(attr.parse_args::<LitStr>()?.value());
        }
    }
    Err(syn::Error::new_spanned(
        variant,
        "every variant needs an #[error(\"...\")] message",
    ))
}

/// Rewrites positional holes `{0}`..`{n-1}` to the `v0`..`vn-1` binders,
/// with or without a format spec (`{1}`, `{1:?}`). Highest index first so
/// `{1}` is not clobbered by a later `{10}` rewrite.
fn rename_positional_holes(message: &str, fields: usize) -> String {
    let mut out = message.to_string();
    for i in (0..fields).rev() {
        out = out.replace(&format!("{{{}}}", i), &format!("{{v{}}}", i));
        out = out.replace(&format!("{{{}:", i), &format!("{{v{}:", i));
    }
    out
}
