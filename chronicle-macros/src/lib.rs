// These lints are triggered by darling's generated code for
// `#[darling(default)]`.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_continue)]

use darling::{FromDeriveInput, FromField, FromVariant, ast::Data};
use heck::ToKebabCase;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, quote};
use syn::{DeriveInput, Ident, parse_macro_input};

/// Returns the kind override or the default kebab-case name from the ident.
fn default_kind(ident: &Ident, kind: Option<String>) -> String {
    kind.unwrap_or_else(|| ident.to_string().to_kebab_case())
}

/// Configuration for the `#[event(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(event), supports(struct_any, enum_any))]
struct DomainEventArgs {
    ident: Ident,
    #[darling(default)]
    kind: Option<String>,
}

/// The single field of an event set variant.
#[derive(Debug, FromField)]
struct PayloadField {
    ty: syn::Type,
}

/// One `Variant(Payload)` of an event set.
#[derive(Debug, FromVariant)]
struct EventVariant {
    ident: Ident,
    fields: darling::ast::Fields<PayloadField>,
}

/// Input of `#[derive(EventSet)]`.
#[derive(Debug, FromDeriveInput)]
#[darling(supports(enum_newtype))]
struct EventSetArgs {
    ident: Ident,
    data: Data<EventVariant, ()>,
}

/// Parse derive input with darling and render errors as tokens.
fn parse_or_error<T, F>(input: &DeriveInput, f: F) -> TokenStream2
where
    T: FromDeriveInput,
    F: FnOnce(T) -> TokenStream2,
{
    match T::from_derive_input(input) {
        Ok(args) => f(args),
        Err(err) => err.write_errors(),
    }
}

/// Derives the `DomainEvent` trait, giving a payload type its stored name.
///
/// # Attributes
///
/// ## Optional
/// - `kind = "name"` - Stored name (default: kebab-case type name, so
///   `MealSelected` becomes `"meal-selected"`)
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Debug, Serialize, Deserialize, DomainEvent)]
/// pub struct MealSelected {
///     pub meal: String,
/// }
///
/// #[derive(Serialize, Deserialize, DomainEvent)]
/// #[event(kind = "venue-snapshot-v2")]
/// pub struct VenueSnapshot { /* ... */ }
/// ```
#[proc_macro_derive(DomainEvent, attributes(event))]
pub fn derive_domain_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_domain_event_impl(&input).into()
}

/// Internal entry point that returns tokens for the domain event derive.
fn derive_domain_event_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<DomainEventArgs, _>(input, |args| {
        let name = &args.ident;
        let kind = default_kind(name, args.kind);
        let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

        quote! {
            impl #impl_generics ::chronicle::codec::DomainEvent for #name #ty_generics #where_clause {
                const KIND: &'static str = #kind;
            }
        }
    })
}

/// Derives the `EventSet` trait for an enum of event payloads.
///
/// Every variant must wrap exactly one payload type implementing
/// `DomainEvent` and `serde::Serialize`. This macro generates:
/// - `EventSet::kind`, reporting the wrapped payload's `DomainEvent::KIND`
/// - `EventSet::encode`, serializing the wrapped payload alone
/// - `From<Payload>` for each variant
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Debug, EventSet)]
/// pub enum VenueEvent {
///     Created(VenueCreated),
///     MealSelected(MealSelected),
/// }
/// ```
#[proc_macro_derive(EventSet)]
pub fn derive_event_set(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_event_set_impl(&input).into()
}

/// Internal entry point that returns tokens for the event set derive.
fn derive_event_set_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<EventSetArgs, _>(input, |args| generate_event_set_impl(args, input))
}

/// Generate the event set derive implementation tokens.
fn generate_event_set_impl(args: EventSetArgs, input: &DeriveInput) -> TokenStream2 {
    let Data::Enum(variants) = args.data else {
        return darling::Error::unsupported_shape("expected an enum")
            .with_span(&input.ident)
            .write_errors();
    };

    if variants.is_empty() {
        return darling::Error::custom("an event set needs at least one variant")
            .with_span(&input.ident)
            .write_errors();
    }

    let mut errors = darling::Error::accumulator();
    let mut seen: Vec<String> = Vec::with_capacity(variants.len());
    for variant in &variants {
        let payload = variant.fields.fields[0].ty.to_token_stream().to_string();
        if seen.contains(&payload) {
            errors.push(
                darling::Error::custom(format!(
                    "payload type `{payload}` appears in more than one variant"
                ))
                .with_span(&variant.ident),
            );
        }
        seen.push(payload);
    }
    if let Err(err) = errors.finish() {
        return err.write_errors();
    }

    let enum_name = &args.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let variant_names: Vec<&Ident> = variants.iter().map(|v| &v.ident).collect();
    let payload_types: Vec<&syn::Type> = variants.iter().map(|v| &v.fields.fields[0].ty).collect();

    quote! {
        impl #impl_generics ::chronicle::codec::EventSet for #enum_name #ty_generics #where_clause {
            fn kind(&self) -> &'static str {
                match self {
                    #(Self::#variant_names(_) => <#payload_types as ::chronicle::codec::DomainEvent>::KIND),*
                }
            }

            fn encode<C: ::chronicle::codec::Codec>(&self, codec: &C) -> ::core::result::Result<::std::vec::Vec<u8>, C::Error> {
                match self {
                    #(Self::#variant_names(inner) => ::chronicle::codec::Codec::serialize(codec, inner)),*
                }
            }
        }

        #(
            impl #impl_generics ::core::convert::From<#payload_types> for #enum_name #ty_generics #where_clause {
                fn from(event: #payload_types) -> Self {
                    Self::#variant_names(event)
                }
            }
        )*
    }
}
