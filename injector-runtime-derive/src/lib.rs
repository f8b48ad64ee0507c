//! Derive macros for injector-runtime
//!
//! `#[derive(Inject)]` implements `Describe` for a struct with named
//! fields. The generated metadata has one constructor whose parameters are
//! the struct's `#[inject]` fields, in declaration order.
//!
//! # Example
//!
//! ```rust,ignore
//! use injector_runtime::{Container, Inject, Lifetime};
//! use std::sync::Arc;
//!
//! struct Database { url: String }
//! trait Cache: Send + Sync {}
//!
//! #[derive(Inject)]
//! #[inject(implements(dyn Service))]
//! struct UserService {
//!     #[inject]
//!     db: Arc<Database>,
//!     #[inject(optional)]
//!     cache: Option<Arc<dyn Cache>>,
//!     #[inject(name = "audit")]
//!     audit_db: Arc<Database>,
//!     // Fields without #[inject] use Default
//!     request_count: u64,
//! }
//!
//! let container = Container::new();
//! container.register::<UserService>(Lifetime::Singleton).unwrap();
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parse;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Token, Type, parse_macro_input};

/// Derive `Describe` from field attributes.
///
/// # Field attributes
///
/// - `#[inject]` - Resolve the field. `Arc<T>` resolves a type,
///   `Arc<dyn Trait>` an interface and `Vec<Arc<T>>` every registration of `T`.
/// - `#[inject(optional)]` - `Option<Arc<T>>` or `Option<Arc<dyn Trait>>`;
///   left `None` when nothing is registered.
/// - `#[inject(name = "...")]` - Resolve a named registration. Combines
///   with `optional`.
///
/// Fields without `#[inject]` are initialized with `Default::default()`.
///
/// # Type attributes
///
/// - `#[inject(implements(dyn A, dyn B))]` - Declare interfaces the type can
///   be resolved as.
/// - `#[inject(dispose)]` - Dispose values through the type's `Dispose` impl.
#[proc_macro_derive(Inject, attributes(inject))]
pub fn derive_inject(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(error) => error.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Inject can only be derived for structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new_spanned(input, "Inject can only be derived for structs")),
    };

    let mut params = Vec::new();
    let mut inits = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let Some(spec) = field_spec(&field.attrs)? else {
            inits.push(quote! { #ident: ::std::default::Default::default() });
            continue;
        };

        let index = params.len();
        let label = ident.to_string();
        let (shape, declared) = if spec.optional {
            let inner = option_inner(&field.ty).ok_or_else(|| {
                syn::Error::new_spanned(&field.ty, "#[inject(optional)] fields must be Option<Arc<T>>")
            })?;
            (Shape::of(inner), inner)
        } else {
            (Shape::of(&field.ty), &field.ty)
        };
        let shape = shape.ok_or_else(|| {
            syn::Error::new_spanned(declared, "#[inject] fields must be Arc<T>, Arc<dyn Trait> or Vec<Arc<T>>")
        })?;

        let (parameter, take) = match (shape, spec.optional) {
            (Shape::Concrete(ty), false) => (
                quote! { ::injector_runtime::Parameter::of::<#ty>(#label) },
                quote! { args.take::<#ty>(#index)? },
            ),
            (Shape::Concrete(ty), true) => (
                quote! { ::injector_runtime::Parameter::of::<#ty>(#label) },
                quote! { args.take_optional::<#ty>(#index)? },
            ),
            (Shape::Trait(ty), false) => (
                quote! { ::injector_runtime::Parameter::of_trait::<#ty>(#label) },
                quote! { args.take_trait::<#ty>(#index)? },
            ),
            (Shape::Trait(ty), true) => (
                quote! { ::injector_runtime::Parameter::of_trait::<#ty>(#label) },
                quote! { args.take_trait_optional::<#ty>(#index)? },
            ),
            (Shape::All(ty), false) => (
                quote! { ::injector_runtime::Parameter::all::<#ty>(#label) },
                quote! { args.take_all::<#ty>(#index)? },
            ),
            (Shape::All(_), true) => {
                return Err(syn::Error::new_spanned(&field.ty, "array fields cannot be optional"));
            }
        };

        let mut parameter = parameter;
        if let Some(registration) = &spec.name {
            parameter = quote! { #parameter.named(#registration) };
        }
        if spec.optional {
            parameter = quote! { #parameter.optional() };
        }

        params.push(parameter);
        inits.push(quote! { #ident: #take });
    }

    let spec = type_spec(&input.attrs)?;
    let implements = spec.implements.iter().map(|ty| quote! { .implements::<#ty>(|this| this) });
    let dispose = spec.dispose.then(|| quote! { .disposable() });
    let args = if params.is_empty() {
        quote! { _args }
    } else {
        quote! { mut args }
    };

    Ok(quote! {
        impl #impl_generics ::injector_runtime::Describe for #name #ty_generics #where_clause {
            fn describe() -> ::injector_runtime::TypeMetadata {
                ::injector_runtime::MetadataBuilder::<Self>::new()
                    .constructor(
                        [#(#params),*],
                        |#args: ::injector_runtime::Arguments| {
                            ::std::result::Result::Ok(Self {
                                #(#inits),*
                            })
                        },
                    )
                    #(#implements)*
                    #dispose
                    .finish()
            }
        }
    })
}

/// What an `#[inject]` field resolves
enum Shape<'a> {
    Concrete(&'a Type),
    Trait(&'a Type),
    All(&'a Type),
}

impl<'a> Shape<'a> {
    fn of(ty: &'a Type) -> Option<Self> {
        if let Some(inner) = wrapped("Arc", ty) {
            return Some(match inner {
                Type::TraitObject(_) => Shape::Trait(inner),
                _ => Shape::Concrete(inner),
            });
        }
        let element = wrapped("Arc", wrapped("Vec", ty)?)?;
        match element {
            Type::TraitObject(_) => None,
            _ => Some(Shape::All(element)),
        }
    }
}

#[derive(Default)]
struct FieldSpec {
    optional: bool,
    name: Option<LitStr>,
}

fn field_spec(attrs: &[Attribute]) -> syn::Result<Option<FieldSpec>> {
    let Some(attr) = attrs.iter().find(|attr| attr.path().is_ident("inject")) else {
        return Ok(None);
    };
    let mut spec = FieldSpec::default();
    if attr.meta.require_path_only().is_ok() {
        return Ok(Some(spec));
    }
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("optional") {
            spec.optional = true;
            Ok(())
        } else if meta.path.is_ident("name") {
            spec.name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("expected `optional` or `name = \"...\"`"))
        }
    })?;
    Ok(Some(spec))
}

#[derive(Default)]
struct TypeSpec {
    implements: Vec<Type>,
    dispose: bool,
}

fn type_spec(attrs: &[Attribute]) -> syn::Result<TypeSpec> {
    let mut spec = TypeSpec::default();
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("inject")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("dispose") {
                spec.dispose = true;
                Ok(())
            } else if meta.path.is_ident("implements") {
                let content;
                syn::parenthesized!(content in meta.input);
                spec.implements.extend(content.parse_terminated(Type::parse, Token![,])?);
                Ok(())
            } else {
                Err(meta.error("expected `implements(...)` or `dispose`"))
            }
        })?;
    }
    Ok(spec)
}

/// `T` from `Wrapper<T>`
fn wrapped<'a>(wrapper: &str, ty: &'a Type) -> Option<&'a Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

fn option_inner(ty: &Type) -> Option<&Type> {
    wrapped("Option", ty)
}
