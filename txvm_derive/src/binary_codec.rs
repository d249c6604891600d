//! Derive macro for the block/transaction wire codec.
//!
//! Generates `Encode` and `Decode` impls against `txvm::types::encoding`:
//! struct fields are written in declaration order with that module's
//! primitive rules (little-endian fixed-width ints, length-prefixed
//! vectors); enums are written as a one-byte tag - the variant's position,
//! counting from zero - followed by the variant's fields. The wire surface
//! this serves is small (headers, raw transactions, predicate arguments),
//! so the derive covers exactly those shapes: named structs, tuple structs,
//! and enums of up to 256 variants. Explicit discriminants, unit structs,
//! and unions are rejected rather than silently encoded.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DataEnum, DeriveInput, Fields};

/// Derives `Encode` and `Decode` for a wire type.
///
/// ```ignore
/// use txvm_derive::BinaryCodec;
///
/// #[derive(BinaryCodec)]
/// pub struct RawTx {
///     pub version: u64,
///     pub runlimit: i64,
///     pub program: Vec<u8>,
/// }
/// ```
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let result = match &input.data {
        Data::Struct(data) => struct_codec(&input, &data.fields),
        Data::Enum(data) => enum_codec(&input, data),
        Data::Union(_) => Err(syn::Error::new_spanned(
            &input,
            "BinaryCodec derive does not support unions",
        )),
    };
    match result {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn struct_codec(
    input: &DeriveInput,
    fields: &Fields,
) -> syn::Result<proc_macro2::TokenStream> {
    let (encode_body, decode_body) = match fields {
        Fields::Named(fields) => {
            let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
            (
                quote! { #( encode_field(&self.#names, out); )* },
                quote! { Ok(Self { #( #names: decode_field(input)?, )* }) },
            )
        }
        Fields::Unnamed(fields) => {
            let indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();
            let decoders = indices.iter().map(|_| quote! { decode_field(input)?, });
            (
                quote! { #( encode_field(&self.#indices, out); )* },
                quote! { Ok(Self( #(#decoders)* )) },
            )
        }
        Fields::Unit => {
            return Err(syn::Error::new_spanned(
                input,
                "BinaryCodec derive needs at least one field; a unit struct has no wire form",
            ))
        }
    };
    Ok(wrap_impls(input, encode_body, decode_body))
}

fn enum_codec(input: &DeriveInput, data: &DataEnum) -> syn::Result<proc_macro2::TokenStream> {
    if data.variants.len() > usize::from(u8::MAX) + 1 {
        return Err(syn::Error::new_spanned(
            input,
            "BinaryCodec enums are limited to 256 variants (one-byte tag)",
        ));
    }

    let mut encode_arms = Vec::with_capacity(data.variants.len());
    let mut decode_arms = Vec::with_capacity(data.variants.len());

    for (position, variant) in data.variants.iter().enumerate() {
        if variant.discriminant.is_some() {
            return Err(syn::Error::new_spanned(
                variant,
                "BinaryCodec tags are positional; drop the explicit discriminant",
            ));
        }
        let tag = position as u8;
        let name = &variant.ident;

        match &variant.fields {
            Fields::Unit => {
                encode_arms.push(quote! {
                    Self::#name => encode_field(&#tag, out),
                });
                decode_arms.push(quote! {
                    #tag => Ok(Self::#name),
                });
            }
            Fields::Unnamed(fields) => {
                let binders: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| format_ident!("v{}", i))
                    .collect();
                let decoders = binders.iter().map(|_| quote! { decode_field(input)?, });
                encode_arms.push(quote! {
                    Self::#name(#(#binders),*) => {
                        encode_field(&#tag, out);
                        #( encode_field(#binders, out); )*
                    }
                });
                decode_arms.push(quote! {
                    #tag => Ok(Self::#name( #(#decoders)* )),
                });
            }
            Fields::Named(fields) => {
                let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                encode_arms.push(quote! {
                    Self::#name { #(#names),* } => {
                        encode_field(&#tag, out);
                        #( encode_field(#names, out); )*
                    }
                });
                decode_arms.push(quote! {
                    #tag => Ok(Self::#name { #( #names: decode_field(input)?, )* }),
                });
            }
        }
    }

    let encode_body = quote! {
        match self {
            #(#encode_arms)*
        }
    };
    let decode_body = quote! {
        let tag: u8 = decode_field(input)?;
        match tag {
            #(#decode_arms)*
            _ => Err(crate::types::encoding::DecodeError::InvalidValue),
        }
    };
    Ok(wrap_impls(input, encode_body, decode_body))
}

/// Emits the `Encode`/`Decode` impl pair around the generated bodies.
///
/// The bodies call the local `encode_field`/`decode_field` shims so the
/// generated arms stay free of fully-qualified trait paths.
fn wrap_impls(
    input: &DeriveInput,
    encode_body: proc_macro2::TokenStream,
    decode_body: proc_macro2::TokenStream,
) -> proc_macro2::TokenStream {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                fn encode_field<S: crate::types::encoding::EncodeSink>(
                    field: &impl crate::types::encoding::Encode,
                    out: &mut S,
                ) {
                    field.encode(out);
                }
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(
                input: &mut &[u8],
            ) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                fn decode_field<T: crate::types::encoding::Decode>(
                    input: &mut &[u8],
                ) -> ::std::result::Result<T, crate::types::encoding::DecodeError> {
                    T::decode(input)
                }
                #decode_body
            }
        }
    }
}
