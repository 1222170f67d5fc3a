//! Attribute macros that check operator function signatures at compile time and generate the
//! matching adapter constructors.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    spanned::Spanned, AngleBracketedGenericArguments, FnArg, GenericArgument, Ident, ItemFn, Pat,
    PatIdent, PathArguments, Type,
};

#[proc_macro_attribute]
pub fn kernel(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand_entry(AdapterTarget::Kernel, attr, item)
}

#[proc_macro_attribute]
pub fn infer_shape(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand_entry(AdapterTarget::InferShape, attr, item)
}

#[proc_macro_attribute]
pub fn infer_dtype(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand_entry(AdapterTarget::InferDtype, attr, item)
}

fn expand_entry(target: AdapterTarget, attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        let attr = TokenStream2::from(attr);
        return syn::Error::new(
            attr.span(),
            format!("#[{}] takes no arguments", target.attr_name()),
        )
        .to_compile_error()
        .into();
    }
    match expand_adapter(target, item) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Clone, Copy)]
enum AdapterTarget {
    Kernel,
    InferShape,
    InferDtype,
}

impl AdapterTarget {
    fn attr_name(self) -> &'static str {
        match self {
            AdapterTarget::Kernel => "kernel",
            AdapterTarget::InferShape => "infer_shape",
            AdapterTarget::InferDtype => "infer_dtype",
        }
    }

    fn input_type(self) -> &'static str {
        match self {
            AdapterTarget::Kernel => "Tensor",
            AdapterTarget::InferShape => "Shape",
            AdapterTarget::InferDtype => "DataType",
        }
    }

    fn classify(self, ty: &Type) -> Option<ParamRole> {
        let (ident, inner) = type_ident(ty)?;
        match self {
            AdapterTarget::Kernel => match (ident.to_string().as_str(), inner) {
                ("Tensor", None) => Some(ParamRole::Input),
                ("bool" | "i32" | "f32" | "i64" | "String", None) => Some(ParamRole::Attr),
                ("Vec", Some(inner)) => {
                    let (elem, nested) = type_ident(inner)?;
                    match (elem.to_string().as_str(), nested) {
                        ("i32" | "f32" | "i64" | "String", None) => Some(ParamRole::Attr),
                        _ => None,
                    }
                }
                _ => None,
            },
            AdapterTarget::InferShape => match (ident.to_string().as_str(), inner) {
                ("Shape", None) => Some(ParamRole::Input),
                ("Vec", Some(inner)) => match type_ident(inner)? {
                    (elem, None) if elem == "i64" => Some(ParamRole::Input),
                    _ => None,
                },
                _ => None,
            },
            AdapterTarget::InferDtype => match (ident.to_string().as_str(), inner) {
                ("DataType", None) => Some(ParamRole::Input),
                _ => None,
            },
        }
    }

    fn constructor(self, fn_ident: &Ident) -> TokenStream2 {
        let ctor_ident = format_ident!("{}_{}_fn", fn_ident, self.attr_name());
        let (adapter, build) = match self {
            AdapterTarget::Kernel => (quote!(KernelFn), quote!(kernel_fn)),
            AdapterTarget::InferShape => (quote!(InferShapeFn), quote!(infer_shape_fn)),
            AdapterTarget::InferDtype => (quote!(InferDtypeFn), quote!(infer_dtype_fn)),
        };
        quote! {
            fn #ctor_ident() -> ::custom_ops::OpResult<::custom_ops::#adapter> {
                ::custom_ops::#build(#fn_ident)
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ParamRole {
    Input,
    Attr,
}

struct ParamInfo {
    ident: Ident,
    ty: Type,
}

fn expand_adapter(target: AdapterTarget, item: TokenStream) -> Result<TokenStream2, syn::Error> {
    let function: ItemFn = syn::parse(item)?;
    let name = target.attr_name();

    if !function.sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            function.sig.generics.span(),
            format!("#[{name}] functions cannot be generic"),
        ));
    }
    if let Some(asyncness) = &function.sig.asyncness {
        return Err(syn::Error::new(
            asyncness.span(),
            format!("#[{name}] functions cannot be async"),
        ));
    }

    let params = parse_params(&function.sig.inputs)?;
    let mut first_attr: Option<&ParamInfo> = None;
    for param in &params {
        let role = target.classify(&param.ty).ok_or_else(|| {
            let expected = match target {
                AdapterTarget::Kernel => {
                    "Tensor, bool, i32, f32, i64, String, Vec<i32>, Vec<f32>, Vec<i64> or Vec<String>"
                }
                _ => target.input_type(),
            };
            syn::Error::new(
                param.ty.span(),
                format!("unsupported #[{name}] parameter type; expected {expected}"),
            )
        })?;
        match (role, first_attr) {
            (ParamRole::Attr, None) => first_attr = Some(param),
            (ParamRole::Input, Some(attr)) => {
                return Err(syn::Error::new(
                    param.ident.span(),
                    format!(
                        "input `{}` is declared after attribute `{}`; inputs must come first",
                        param.ident, attr.ident
                    ),
                ));
            }
            _ => {}
        }
    }

    let vis = &function.vis;
    let constructor = target.constructor(&function.sig.ident);
    Ok(quote! {
        #function

        #[allow(dead_code)]
        #vis #constructor
    })
}

fn parse_params(
    inputs: &syn::punctuated::Punctuated<FnArg, syn::token::Comma>,
) -> Result<Vec<ParamInfo>, syn::Error> {
    inputs
        .iter()
        .map(|arg| match arg {
            FnArg::Typed(pat_type) => match &*pat_type.pat {
                Pat::Ident(PatIdent { ident, .. }) => Ok(ParamInfo {
                    ident: ident.clone(),
                    ty: (*pat_type.ty).clone(),
                }),
                _ => Err(syn::Error::new(
                    pat_type.pat.span(),
                    "unsupported parameter pattern",
                )),
            },
            FnArg::Receiver(_) => Err(syn::Error::new(arg.span(), "methods are not supported")),
        })
        .collect()
}

// Last path segment of `ty` and its single generic type argument, if any.
fn type_ident(ty: &Type) -> Option<(&Ident, Option<&Type>)> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    if type_path.qself.is_some() {
        return None;
    }
    let segment = type_path.path.segments.last()?;
    match &segment.arguments {
        PathArguments::None => Some((&segment.ident, None)),
        PathArguments::AngleBracketed(AngleBracketedGenericArguments { args, .. })
            if args.len() == 1 =>
        {
            match args.first() {
                Some(GenericArgument::Type(inner)) => Some((&segment.ident, Some(inner))),
                _ => None,
            }
        }
        _ => None,
    }
}
