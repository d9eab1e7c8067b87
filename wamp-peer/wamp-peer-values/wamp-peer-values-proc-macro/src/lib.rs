extern crate proc_macro;

use itertools::Itertools;
use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{
    Error,
    Field,
    Ident,
    Index,
    ItemStruct,
    LitStr,
    Meta,
    Path,
    Type,
    parse::{
        Parse,
        ParseStream,
    },
    parse_macro_input,
};

#[derive(Default)]
enum DefaultAttr {
    #[default]
    Required,
    Default,
    Path(Path),
}

impl DefaultAttr {
    fn is_optional(&self) -> bool {
        !matches!(self, Self::Required)
    }
}

#[derive(Default)]
struct FieldAttrs {
    default: DefaultAttr,
    skip_serializing_if: Option<Path>,
    rename: Option<String>,
}

fn parse_field_attrs(field: &Field) -> syn::Result<FieldAttrs> {
    let attr = field.attrs.iter().find(|attr| match &attr.meta {
        Meta::List(list) => list.path.is_ident("wamp_peer_values"),
        _ => false,
    });
    let attr = match attr {
        Some(attr) => attr,
        None => return Ok(FieldAttrs::default()),
    };

    let mut attrs = FieldAttrs::default();
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("default") {
            attrs.default = match meta.value() {
                Ok(value) => DefaultAttr::Path(value.parse::<Path>()?),
                Err(_) => DefaultAttr::Default,
            };
        } else if meta.path.is_ident("skip_serializing_if") {
            attrs.skip_serializing_if = Some(meta.value()?.parse::<Path>()?);
        } else if meta.path.is_ident("rename") {
            attrs.rename = Some(meta.value()?.parse::<LitStr>()?.value());
        } else {
            return Err(meta.error("unsupported wamp_peer_values attribute"));
        }
        Ok(())
    })?;
    Ok(attrs)
}

struct InputField {
    ident: Option<Ident>,
    ty: Type,
    attrs: FieldAttrs,
}

impl InputField {
    fn binding(&self, index: usize) -> Ident {
        self.ident
            .clone()
            .unwrap_or_else(|| Ident::new(&format!("field_{index}"), Span::call_site()))
    }

    fn accessor(&self, index: usize) -> proc_macro2::TokenStream {
        match &self.ident {
            Some(ident) => quote!(self.#ident),
            None => {
                let index = Index::from(index);
                quote!(self.#index)
            }
        }
    }

    fn key(&self, index: usize) -> String {
        match &self.attrs.rename {
            Some(rename) => rename.clone(),
            None => self.binding(index).to_string(),
        }
    }

    fn if_missing(&self, missing: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
        let ty = &self.ty;
        match &self.attrs.default {
            DefaultAttr::Required => quote!(return Err(#missing)),
            DefaultAttr::Default => quote!(<#ty as Default>::default()),
            DefaultAttr::Path(path) => quote!(#path()),
        }
    }
}

struct StructInput {
    ident: Ident,
    named: bool,
    fields: Vec<InputField>,
}

fn parse_struct(input: ParseStream, trailing_defaults: bool) -> syn::Result<StructInput> {
    let call_site = Span::call_site();
    let input = match ItemStruct::parse(input) {
        Ok(item) => item,
        Err(_) => return Err(Error::new(call_site, "input must be a struct")),
    };
    let named = input.fields.is_empty() || input.fields.iter().any(|field| field.ident.is_some());
    let mut defaulted = false;
    let fields = input
        .fields
        .into_iter()
        .map(|field| {
            let attrs = parse_field_attrs(&field)?;
            if trailing_defaults {
                if attrs.default.is_optional() {
                    defaulted = true;
                } else if defaulted {
                    return Err(Error::new(
                        call_site,
                        "fields after a defaulted field must also have a default",
                    ));
                }
            }
            Ok(InputField {
                ident: field.ident,
                ty: field.ty,
                attrs,
            })
        })
        .collect::<syn::Result<Vec<_>>>()?;
    Ok(StructInput {
        ident: input.ident,
        named,
        fields,
    })
}

struct ListInput(StructInput);

impl Parse for ListInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        parse_struct(input, true).map(Self)
    }
}

struct ObjectInput(StructInput);

impl Parse for ObjectInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        parse_struct(input, false).map(Self)
    }
}

fn constructor(input: &StructInput, bindings: &[Ident]) -> proc_macro2::TokenStream {
    let ident = &input.ident;
    if input.named {
        quote!(#ident { #(#bindings,)* })
    } else {
        quote!(#ident(#(#bindings,)*))
    }
}

/// Procedural macro for deriving `wamp_peer_values::IntoVariant` and
/// `wamp_peer_values::FromVariant` for a struct that converts to a `wamp_peer_values::Array`.
///
/// Fields are positional. A field marked `#[wamp_peer_values(default)]` may be absent from the
/// array, and every field after it must also have a default. Serialization stops at the first
/// field whose `skip_serializing_if` predicate returns true.
#[proc_macro_derive(VariantList, attributes(wamp_peer_values))]
pub fn derive_variant_list(input: TokenStream) -> TokenStream {
    let ListInput(input) = parse_macro_input!(input as ListInput);
    let ident = &input.ident;

    let (serializers, deserializers, bindings): (Vec<_>, Vec<_>, Vec<_>) = input
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let accessor = field.accessor(i);
            let binding = field.binding(i);
            let skip = field.attrs.skip_serializing_if.as_ref().map(|predicate| {
                quote! {
                    if #predicate(&#accessor) {
                        return Ok(wamp_peer_values::Variant::Array(array));
                    }
                }
            });
            let if_missing = field.if_missing(quote! {
                wamp_peer_values::ConversionError::new(std::format!(
                    "{} is missing from {}",
                    std::stringify!(#binding),
                    std::stringify!(#ident)
                ))
                .at_index(#i)
            });
            (
                quote! {
                    #skip
                    array.push(
                        wamp_peer_values::IntoVariant::into_variant(#accessor)
                            .map_err(|err| err.at_index(#i))?,
                    );
                },
                quote! {
                    let #binding = match elements.next() {
                        Some(value) => wamp_peer_values::FromVariant::from_variant(value)
                            .map_err(|err| err.at_index(#i))?,
                        None => #if_missing,
                    };
                },
                binding,
            )
        })
        .multiunzip();

    let constructor = constructor(&input, &bindings);

    quote! {
        impl wamp_peer_values::IntoVariant for #ident {
            fn into_variant(self) -> core::result::Result<wamp_peer_values::Variant, wamp_peer_values::ConversionError> {
                let mut array = wamp_peer_values::Array::new();
                #(#serializers)*
                Ok(wamp_peer_values::Variant::Array(array))
            }
        }

        impl wamp_peer_values::FromVariant for #ident {
            fn from_variant(value: wamp_peer_values::Variant) -> core::result::Result<Self, wamp_peer_values::ConversionError> {
                let array = match value {
                    wamp_peer_values::Variant::Array(array) => array,
                    value => return Err(wamp_peer_values::ConversionError::type_mismatch("array", value.kind())),
                };
                #[allow(unused_mut)]
                let mut elements = array.into_iter();
                #(#deserializers)*
                Ok(#constructor)
            }
        }
    }
    .into()
}

/// Procedural macro for deriving `wamp_peer_values::IntoVariant` and
/// `wamp_peer_values::FromVariant` for a struct that converts to a `wamp_peer_values::Object`.
///
/// Each field is keyed by its name, or by `#[wamp_peer_values(rename = "...")]`.
#[proc_macro_derive(VariantObject, attributes(wamp_peer_values))]
pub fn derive_variant_object(input: TokenStream) -> TokenStream {
    let ObjectInput(input) = parse_macro_input!(input as ObjectInput);
    let ident = &input.ident;

    let (serializers, deserializers, bindings): (Vec<_>, Vec<_>, Vec<_>) = input
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let accessor = field.accessor(i);
            let binding = field.binding(i);
            let key = field.key(i);
            let serialize_check = match &field.attrs.skip_serializing_if {
                Some(predicate) => quote!(!#predicate(&#accessor)),
                None => quote!(true),
            };
            let if_missing = field.if_missing(quote! {
                wamp_peer_values::ConversionError::new(std::format!(
                    "{} is missing from {}",
                    #key,
                    std::stringify!(#ident)
                ))
                .at_key(#key)
            });
            (
                quote! {
                    if #serialize_check {
                        let value = wamp_peer_values::IntoVariant::into_variant(#accessor)
                            .map_err(|err| err.at_key(#key))?;
                        object.insert(#key.to_owned(), value);
                    }
                },
                quote! {
                    let #binding = match object.swap_remove(#key) {
                        Some(value) => wamp_peer_values::FromVariant::from_variant(value)
                            .map_err(|err| err.at_key(#key))?,
                        None => #if_missing,
                    };
                },
                binding,
            )
        })
        .multiunzip();

    let constructor = constructor(&input, &bindings);

    quote! {
        impl wamp_peer_values::IntoVariant for #ident {
            fn into_variant(self) -> core::result::Result<wamp_peer_values::Variant, wamp_peer_values::ConversionError> {
                let mut object = wamp_peer_values::Object::new();
                #(#serializers)*
                Ok(wamp_peer_values::Variant::Object(object))
            }
        }

        impl wamp_peer_values::FromVariant for #ident {
            fn from_variant(value: wamp_peer_values::Variant) -> core::result::Result<Self, wamp_peer_values::ConversionError> {
                #[allow(unused_mut)]
                let mut object = match value {
                    wamp_peer_values::Variant::Object(object) => object,
                    value => return Err(wamp_peer_values::ConversionError::type_mismatch("object", value.kind())),
                };
                #(#deserializers)*
                Ok(#constructor)
            }
        }
    }
    .into()
}
