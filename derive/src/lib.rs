extern crate proc_macro;

mod event;

use proc_macro::TokenStream;

/// Implements `tether::event::Event` for an enum (one `#[event_key(name)]`
/// per variant) or a struct (one `#[event_key(name)]` on the type).
///
/// Also generates an `unwrap_as_<name>(&self)` accessor per key, returning
/// references to the fields of the matching variant.
#[proc_macro_derive(Event, attributes(event_key))]
pub fn event_macro_derive(input: TokenStream) -> TokenStream {
    let ast = syn::parse_macro_input!(input as syn::DeriveInput);

    event::impl_event_macro(ast).unwrap_or_else(syn::Error::into_compile_error).into()
}
