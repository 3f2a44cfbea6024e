use {proc_macro2::TokenStream, quote::quote, syn::spanned::Spanned};

pub fn impl_event_macro(ast: syn::DeriveInput) -> syn::Result<TokenStream> {
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    let name = &ast.ident;

    match &ast.data {
        syn::Data::Enum(enum_data) => {
            let mut keys: Vec<syn::Ident> = Vec::new();
            let mut key_pats: Vec<TokenStream> = Vec::new();
            let mut cast_fns: Vec<TokenStream> = Vec::new();

            for variant in &enum_data.variants {
                let key = find_event_key(&variant.attrs, variant.span())?;
                let um = get_unmatched_variant(variant);
                let func = quote::format_ident!("unwrap_as_{}", key);
                let (match_ext, ty, ret) = get_variant_matched_tuples(variant);

                key_pats.push(quote! { #name::#um => std::stringify!(#key) });

                cast_fns.push(quote! {
                    pub fn #func(&self) -> Option<#ty> {
                        if let #name::#match_ext = self {
                            Some(#ret)
                        } else {
                            None
                        }
                    }
                });

                if !keys.contains(&key) {
                    keys.push(key);
                }
            }

            if key_pats.is_empty() {
                return Err(syn::Error::new(
                    name.span(),
                    "derive(Event) needs at least one variant",
                ));
            }

            Ok(quote! {
                impl #impl_generics tether::event::Event for #name #ty_generics #where_clause {
                    const KEYS: &'static [&'static str] = &[#(std::stringify!(#keys)),*];

                    fn get_key(&self) -> &'static str {
                        match self {
                            #(#key_pats),*
                        }
                    }
                }

                impl #impl_generics #name #ty_generics #where_clause {
                    #(#cast_fns)*
                }
            })
        }
        syn::Data::Struct(_) => {
            let key = find_event_key(&ast.attrs, name.span())?;
            let func = quote::format_ident!("unwrap_as_{}", key);

            Ok(quote! {
                impl #impl_generics tether::event::Event for #name #ty_generics #where_clause {
                    const KEYS: &'static [&'static str] = &[std::stringify!(#key)];

                    fn get_key(&self) -> &'static str {
                        std::stringify!(#key)
                    }
                }

                impl #impl_generics #name #ty_generics #where_clause {
                    pub fn #func(&self) -> Option<&Self> {
                        Some(self)
                    }
                }
            })
        }
        syn::Data::Union(_) => {
            Err(syn::Error::new(name.span(), "derive(Event) only supports structs and enums"))
        }
    }
}

/// Pattern, field reference types and bindings of one variant.
fn get_variant_matched_tuples(variant: &syn::Variant) -> (TokenStream, TokenStream, TokenStream) {
    let name = &variant.ident;
    match &variant.fields {
        syn::Fields::Unit => (quote! { #name }, quote! { () }, quote! { () }),
        syn::Fields::Unnamed(fields) => {
            let (matching, types): (Vec<syn::Ident>, Vec<&syn::Type>) = fields
                .unnamed
                .iter()
                .enumerate()
                .map(|(idx, field)| (quote::format_ident!("x{}", idx), &field.ty))
                .unzip();

            (
                quote! { #name(#(#matching),*) },
                quote! { (#(&#types),*) },
                quote! { (#(#matching),*) },
            )
        }
        syn::Fields::Named(fields) => {
            let matching: Vec<&syn::Ident> =
                fields.named.iter().filter_map(|field| field.ident.as_ref()).collect();
            let types: Vec<&syn::Type> = fields.named.iter().map(|field| &field.ty).collect();

            (
                quote! { #name{#(#matching),*} },
                quote! { (#(&#types),*) },
                quote! { (#(#matching),*) },
            )
        }
    }
}

fn get_unmatched_variant(variant: &syn::Variant) -> TokenStream {
    let ident = &variant.ident;
    match variant.fields {
        syn::Fields::Unit => quote! { #ident },
        syn::Fields::Unnamed(_) => quote! { #ident(..) },
        syn::Fields::Named(_) => quote! { #ident{..} },
    }
}

/// Emitted by every entity on teardown, never derived.
const RESERVED_KEY: &str = "destroy";

fn find_event_key(attrs: &[syn::Attribute], span: proc_macro2::Span) -> syn::Result<syn::Ident> {
    let key: syn::Ident = attrs
        .iter()
        .find(|attr| attr.path.is_ident("event_key"))
        .ok_or_else(|| syn::Error::new(span, "missing #[event_key(name)]"))?
        .parse_args()?;

    if key == RESERVED_KEY {
        return Err(syn::Error::new(
            key.span(),
            "`destroy` is reserved for entity teardown, use `on_destroy` instead",
        ));
    }
    Ok(key)
}
