//! Derive macros for `marked_heap::Trace` and `marked_heap::Cell`.
//!
//! Both macros read a shared `#[heap(...)]` attribute:
//!
//! - on the type: `crate = path`, `cell_type = Variant`, `class_name = "Name"`
//! - on a field: `skip`, which leaves the field out of tracing

use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Attribute, Data, DeriveInput, Field, Fields,
    GenericParam, Generics, Ident, Index, LitStr, Path,
};

/// Options collected from the container-level `#[heap(...)]` attributes.
struct ContainerOptions {
    krate: Path,
    cell_type: Option<Ident>,
    class_name: Option<LitStr>,
}

impl ContainerOptions {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut options = Self {
            krate: parse_quote!(::marked_heap),
            cell_type: None,
            class_name: None,
        };

        for attr in attrs {
            if !attr.path().is_ident("heap") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("crate") {
                    options.krate = meta.value()?.parse()?;
                    Ok(())
                } else if meta.path.is_ident("cell_type") {
                    options.cell_type = Some(meta.value()?.parse()?);
                    Ok(())
                } else if meta.path.is_ident("class_name") {
                    options.class_name = Some(meta.value()?.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("unsupported heap attribute"))
                }
            })?;
        }

        Ok(options)
    }
}

fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("heap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute, expected `skip`"))
            }
        })?;
    }
    Ok(skip)
}

/// Derives `Trace` by tracing every field that is not marked `#[heap(skip)]`.
#[proc_macro_derive(Trace, attributes(heap))]
pub fn derive_trace(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_trace(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derives `Cell`, taking the cell type and class name from `#[heap(...)]`.
#[proc_macro_derive(Cell, attributes(heap))]
pub fn derive_cell(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_cell(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_trace(input: &DeriveInput) -> syn::Result<TokenStream> {
    let options = ContainerOptions::parse(&input.attrs)?;
    let krate = &options.krate;
    let name = &input.ident;
    let generics = add_trait_bounds(krate, input.generics.clone());
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let trace_body = generate_trace_body(krate, name, &input.data)?;

    Ok(quote! {
        unsafe impl #impl_generics #krate::Trace for #name #ty_generics #where_clause {
            #[inline]
            #[allow(unused_variables)]
            fn trace(&self, visitor: &mut impl #krate::Visitor) {
                #trace_body
            }
        }
    })
}

fn expand_cell(input: &DeriveInput) -> syn::Result<TokenStream> {
    let options = ContainerOptions::parse(&input.attrs)?;
    let krate = &options.krate;
    let name = &input.ident;
    let generics = add_trait_bounds(krate, input.generics.clone());
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let cell_type = options
        .cell_type
        .as_ref()
        .map(|variant| quote! { const CELL_TYPE: #krate::CellType = #krate::CellType::#variant; });
    let class_name = options.class_name.as_ref().map(|lit| {
        quote! {
            fn class_name() -> &'static str {
                #lit
            }
        }
    });

    Ok(quote! {
        impl #impl_generics #krate::Cell for #name #ty_generics #where_clause {
            #cell_type
            #class_name
        }
    })
}

fn add_trait_bounds(krate: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_trace = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Trace")
                } else {
                    false
                }
            });
            let has_static = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Lifetime(l) = b {
                    l.ident == "static"
                } else {
                    false
                }
            });

            if !has_trace {
                type_param.bounds.push(parse_quote!(#krate::Trace));
            }
            if !has_static {
                type_param.bounds.push(parse_quote!('static));
            }
        }
    }
    generics
}

fn generate_trace_body(krate: &Path, name: &Ident, data: &Data) -> syn::Result<TokenStream> {
    match data {
        Data::Struct(data) => generate_struct_trace(krate, &data.fields),
        Data::Enum(data) => generate_enum_trace(krate, name, data),
        Data::Union(u) => Err(syn::Error::new(
            u.union_token.span,
            "`Trace` must be manually implemented for unions",
        )),
    }
}

fn generate_struct_trace(krate: &Path, fields: &Fields) -> syn::Result<TokenStream> {
    let mut calls = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if is_skipped(field)? {
            continue;
        }
        let access = field.ident.as_ref().map_or_else(
            || {
                let index = Index::from(i);
                quote! { self.#index }
            },
            |ident| quote! { self.#ident },
        );
        calls.push(quote_spanned! {field.span() =>
            #krate::Trace::trace(&#access, visitor);
        });
    }
    Ok(quote! { #(#calls)* })
}

fn generate_enum_trace(
    krate: &Path,
    name: &Ident,
    data: &syn::DataEnum,
) -> syn::Result<TokenStream> {
    let mut arms = Vec::new();
    for variant in &data.variants {
        let var_name = &variant.ident;
        let bindings: Vec<Ident> = (0..variant.fields.len())
            .map(|i| format_ident!("field{}", i))
            .collect();

        let mut calls = Vec::new();
        for (field, binding) in variant.fields.iter().zip(&bindings) {
            if !is_skipped(field)? {
                calls.push(quote! { #krate::Trace::trace(#binding, visitor); });
            }
        }

        let pattern = match &variant.fields {
            Fields::Named(f) => {
                let idents = f.named.iter().filter_map(|f| f.ident.as_ref());
                quote! { #name::#var_name { #(#idents: #bindings),* } }
            }
            Fields::Unnamed(_) => quote! { #name::#var_name(#(#bindings),*) },
            Fields::Unit => quote! { #name::#var_name },
        };

        arms.push(quote! {
            #pattern => {
                #(#calls)*
            }
        });
    }

    Ok(quote! {
        match self {
            #(#arms)*
        }
    })
}
