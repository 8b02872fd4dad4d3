//! Expansion of `#[rest_client]`.
//!
//! The annotated trait is re-emitted without our attributes, alongside a
//! client struct that implements it by dispatching every method to a
//! `Proxy` endpoint of the same name.

use proc_macro2::{Span, TokenStream};
use quote::{format_ident, quote};
use std::collections::HashSet;
use syn::spanned::Spanned;
use syn::{
    Error, FnArg, GenericArgument, Ident, ItemTrait, Pat, PathArguments, Result, ReturnType,
    TraitItem, TraitItemFn, Type,
};

use crate::attrs::{
    BodyKind, ClientArgs, EndpointAttrs, ParamKind, ResponseKind, placeholders, take_param,
};

/// How a method's result is produced from the response.
enum Output {
    /// Decode the body into the given type.
    Decode(Type),
    /// Discard the body.
    Unit,
    /// Hand back the raw response.
    Raw,
}

struct Argument {
    ident: Ident,
    kind: ParamKind,
}

struct Endpoint {
    name: Ident,
    attrs: EndpointAttrs,
    args: Vec<Argument>,
    output: Output,
    signature: syn::Signature,
}

pub fn expand(args: TokenStream, item: TokenStream) -> Result<TokenStream> {
    let args: ClientArgs = syn::parse2(args)?;
    let mut item: ItemTrait = syn::parse2(item)?;

    if !item.generics.params.is_empty() || item.generics.where_clause.is_some() {
        return Err(Error::new(
            item.generics.span(),
            "#[rest_client] traits cannot be generic",
        ));
    }

    let mut endpoints = Vec::new();
    for trait_item in &mut item.items {
        match trait_item {
            TraitItem::Fn(method) => endpoints.push(parse_endpoint(method)?),
            other => {
                return Err(Error::new(
                    other.span(),
                    "#[rest_client] traits can only contain endpoint methods",
                ));
            }
        }
    }

    let mut seen = HashSet::new();
    for endpoint in &endpoints {
        if !seen.insert(endpoint.name.to_string()) {
            return Err(Error::new(endpoint.name.span(), "duplicate endpoint name"));
        }
    }

    let trait_ident = &item.ident;
    let vis = &item.vis;
    let client_ident = args
        .client
        .unwrap_or_else(|| format_ident!("{}Client", trait_ident));
    let service = &args.service;

    let descriptors = endpoints.iter().map(endpoint_descriptor);
    let methods = endpoints.iter().map(endpoint_method);
    let client_doc = format!(
        "REST client for the `{}` service implementing [`{}`].",
        service.value(),
        trait_ident
    );

    Ok(quote! {
        #[::armature_rest_client::async_trait]
        #item

        #[doc = #client_doc]
        #[derive(Debug, Clone)]
        #vis struct #client_ident {
            proxy: ::armature_rest_client::Proxy,
        }

        impl #client_ident {
            /// Build a client with the default transport.
            #vis fn new(
                config: ::armature_rest_client::ClientConfig,
            ) -> ::armature_rest_client::Result<Self> {
                ::armature_rest_client::Proxy::new(
                    <Self as ::armature_rest_client::RestService>::descriptor(),
                    config,
                )
                .map(<Self as ::armature_rest_client::RestService>::from_proxy)
            }

            /// The underlying proxy.
            #vis fn proxy(&self) -> &::armature_rest_client::Proxy {
                &self.proxy
            }
        }

        impl ::armature_rest_client::RestService for #client_ident {
            fn descriptor() -> ::armature_rest_client::ServiceDescriptor {
                ::armature_rest_client::ServiceDescriptor::builder(#service)
                    #( .endpoint(#descriptors) )*
                    .build()
            }

            fn from_proxy(proxy: ::armature_rest_client::Proxy) -> Self {
                Self { proxy }
            }
        }

        #[::armature_rest_client::async_trait]
        impl #trait_ident for #client_ident {
            #( #methods )*
        }
    })
}

fn parse_endpoint(method: &mut TraitItemFn) -> Result<Endpoint> {
    let name = method.sig.ident.clone();

    if method.default.is_some() {
        return Err(Error::new(
            method.sig.ident.span(),
            "endpoint methods cannot have a default body",
        ));
    }
    if method.sig.asyncness.is_none() {
        return Err(Error::new(
            method.sig.fn_token.span(),
            "endpoint methods must be `async fn`",
        ));
    }
    if !method.sig.generics.params.is_empty() {
        return Err(Error::new(
            method.sig.generics.span(),
            "endpoint methods cannot be generic",
        ));
    }

    let attrs = EndpointAttrs::take(&mut method.attrs, name.span())?;

    let mut inputs = method.sig.inputs.iter_mut();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        Some(other) => {
            return Err(Error::new(other.span(), "endpoint methods must take `&self`"));
        }
        None => {
            return Err(Error::new(name.span(), "endpoint methods must take `&self`"));
        }
    }

    let mut args = Vec::new();
    for input in inputs {
        let FnArg::Typed(typed) = input else {
            return Err(Error::new(input.span(), "unexpected receiver"));
        };
        let Pat::Ident(pat) = typed.pat.as_ref() else {
            return Err(Error::new(
                typed.pat.span(),
                "endpoint arguments must be plain identifiers",
            ));
        };
        let ident = pat.ident.clone();
        let arg_name = ident.to_string();
        let arg_name = arg_name.strip_prefix("r#").unwrap_or(&arg_name);
        let kind = take_param(&mut typed.attrs, arg_name, ident.span())?;
        args.push(Argument { ident, kind });
    }

    check_bindings(&attrs, &args)?;
    let output = output_of(&method.sig.output)?;

    Ok(Endpoint {
        name,
        attrs,
        args,
        output,
        signature: method.sig.clone(),
    })
}

fn check_bindings(attrs: &EndpointAttrs, args: &[Argument]) -> Result<()> {
    let placeholders = placeholders(&attrs.path)?;

    let mut bound = HashSet::new();
    let mut bodies = 0;
    for arg in args {
        match &arg.kind {
            ParamKind::Path { name, .. } => {
                if !placeholders.contains(name) {
                    return Err(Error::new(
                        arg.ident.span(),
                        format!(
                            "path template \"{}\" has no placeholder `{{{name}}}`",
                            attrs.path.value()
                        ),
                    ));
                }
                if !bound.insert(name.clone()) {
                    return Err(Error::new(
                        arg.ident.span(),
                        format!("placeholder `{{{name}}}` is bound twice"),
                    ));
                }
            }
            ParamKind::Body(_) => bodies += 1,
            ParamKind::Query(_) | ParamKind::Header(_) => {}
        }
    }

    if let Some(missing) = placeholders.iter().find(|p| !bound.contains(*p)) {
        return Err(Error::new(
            attrs.path.span(),
            format!("placeholder `{{{missing}}}` has no #[path] argument"),
        ));
    }
    if bodies > 1 {
        return Err(Error::new(
            attrs.path.span(),
            "an endpoint can have at most one #[body] argument",
        ));
    }
    if bodies == 1 && matches!(attrs.method.to_string().as_str(), "GET" | "HEAD") {
        return Err(Error::new(
            attrs.method.span(),
            "GET and HEAD endpoints cannot have a body",
        ));
    }
    Ok(())
}

fn output_of(output: &ReturnType) -> Result<Output> {
    let ReturnType::Type(_, ty) = output else {
        return Err(Error::new(
            Span::call_site(),
            "endpoint methods must return a Result",
        ));
    };

    let ok = match ty.as_ref() {
        Type::Path(path) => path.path.segments.last().and_then(|segment| {
            let PathArguments::AngleBracketed(args) = &segment.arguments else {
                return None;
            };
            match args.args.first() {
                Some(GenericArgument::Type(ok)) if segment.ident == "Result" => Some(ok.clone()),
                _ => None,
            }
        }),
        _ => None,
    };
    let Some(ok) = ok else {
        return Err(Error::new(
            ty.span(),
            "endpoint methods must return `Result<T>` or `Result<T, E>`",
        ));
    };

    Ok(match &ok {
        Type::Tuple(tuple) if tuple.elems.is_empty() => Output::Unit,
        Type::Path(path)
            if path
                .path
                .segments
                .last()
                .is_some_and(|segment| segment.ident == "Response") =>
        {
            Output::Raw
        }
        _ => Output::Decode(ok),
    })
}

fn endpoint_descriptor(endpoint: &Endpoint) -> TokenStream {
    let name = endpoint.name.to_string();
    let method = &endpoint.attrs.method;
    let path = &endpoint.attrs.path;

    let params = endpoint.args.iter().map(|arg| match &arg.kind {
        ParamKind::Path {
            name,
            encoded: false,
        } => quote!(.path_param(#name)),
        ParamKind::Path {
            name,
            encoded: true,
        } => quote!(.encoded_path_param(#name)),
        ParamKind::Query(name) => quote!(.query_param(#name)),
        ParamKind::Header(name) => quote!(.header_param(#name)),
        ParamKind::Body(kind) => {
            let format = match kind {
                BodyKind::Json => quote!(Json),
                BodyKind::Form => quote!(Form),
                BodyKind::Text => quote!(Text),
            };
            quote!(.body(::armature_rest_client::BodyFormat::#format))
        }
    });

    let headers = endpoint
        .attrs
        .headers
        .iter()
        .map(|(name, value)| quote!(.header(#name, #value)));

    let account = endpoint.attrs.service_account.as_ref().map(|account| {
        let name = &account.name;
        let scopes = &account.scopes;
        quote! {
            .service_account(
                ::armature_rest_client::ServiceAccount::new(#name)
                    .with_scopes([#(#scopes),*])
            )
        }
    });

    let response = endpoint.attrs.response.map(|kind| match kind {
        ResponseKind::Json => quote!(.response(::armature_rest_client::ResponseFormat::Json)),
        ResponseKind::Text => quote!(.response(::armature_rest_client::ResponseFormat::Text)),
    });

    let timeout = endpoint
        .attrs
        .timeout_ms
        .map(|ms| quote!(.timeout(::std::time::Duration::from_millis(#ms))));

    quote! {
        ::armature_rest_client::EndpointDescriptor::builder(
            #name,
            ::armature_rest_client::Method::#method,
            #path,
        )
        #(#params)*
        #(#headers)*
        #account
        #response
        #timeout
        .build()
    }
}

fn endpoint_method(endpoint: &Endpoint) -> TokenStream {
    let signature = &endpoint.signature;
    let name = endpoint.name.to_string();

    let bindings = endpoint.args.iter().map(|arg| {
        let ident = &arg.ident;
        match &arg.kind {
            ParamKind::Path { name, .. } => quote!(.path(#name, &#ident)),
            ParamKind::Query(name) => quote!(.query(#name, &#ident)),
            ParamKind::Header(name) => quote!(.header(#name, &#ident)),
            ParamKind::Body(_) => quote!(.body(&#ident)),
        }
    });

    let call = match &endpoint.output {
        Output::Decode(ty) => quote! {
            self.proxy.call::<#ty>(#name, __invocation).await
        },
        Output::Unit => quote! {
            self.proxy.call_raw(#name, __invocation).await.map(|_| ())
        },
        Output::Raw => quote! {
            self.proxy.call_raw(#name, __invocation).await
        },
    };

    quote! {
        #signature {
            let __invocation = ::armature_rest_client::Invocation::new()
                #(#bindings)*;
            ::core::result::Result::map_err(#call, ::core::convert::Into::into)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_ok(args: TokenStream, item: TokenStream) -> String {
        expand(args, item).unwrap().to_string()
    }

    fn expand_err(args: TokenStream, item: TokenStream) -> String {
        expand(args, item).unwrap_err().to_string()
    }

    #[test]
    fn test_generates_client_and_descriptor() {
        let out = expand_ok(
            quote!("users"),
            quote! {
                pub trait UserApi {
                    /// Fetch one user.
                    #[get("users/{id}")]
                    async fn get_user(&self, #[path] id: u64, #[query] expand: Option<String>) -> Result<User>;

                    #[post("users")]
                    #[headers("Accept: application/json")]
                    async fn create(&self, #[body] user: &NewUser) -> Result<User>;

                    #[delete("users/{id}")]
                    #[service_account("admin", scopes = ["users:write"])]
                    async fn delete(&self, #[path] id: u64, #[header("X-Reason")] reason: &str) -> Result<()>;
                }
            },
        );

        assert!(out.contains("pub struct UserApiClient"));
        assert!(out.contains("impl :: armature_rest_client :: RestService for UserApiClient"));
        assert!(out.contains("impl UserApi for UserApiClient"));
        assert!(out.contains(". path_param (\"id\")"));
        assert!(out.contains(". query_param (\"expand\")"));
        assert!(out.contains(". header (\"Accept\" , \"application/json\")"));
        assert!(out.contains(". header_param (\"X-Reason\")"));
        assert!(out.contains("ServiceAccount :: new (\"admin\")"));
        assert!(out.contains("call_raw (\"delete\""));
        assert!(out.contains("call :: < User > (\"get_user\""));
        assert!(!out.contains("# [path]"), "param attributes are stripped");
        assert!(out.contains("Fetch one user."), "doc comments are kept");
    }

    #[test]
    fn test_client_name_override() {
        let out = expand_ok(
            quote!("users", client = Users),
            quote! {
                trait UserApi {
                    #[get("ping")]
                    async fn ping(&self) -> Result<String>;
                }
            },
        );
        assert!(out.contains("struct Users"));
    }

    #[test]
    fn test_text_response_and_timeout() {
        let out = expand_ok(
            quote!("users"),
            quote! {
                trait UserApi {
                    #[get("users/{id}/name")]
                    #[response(text)]
                    #[timeout(ms = 250)]
                    async fn name(&self, #[path("id")] user: u64) -> Result<String>;
                }
            },
        );
        assert!(out.contains("ResponseFormat :: Text"));
        assert!(out.contains("from_millis (250u64)"));
        assert!(out.contains(". path (\"id\" , & user)"));
    }

    #[test]
    fn test_rejects_invalid_endpoints() {
        let cases = [
            (
                quote! { trait A { #[get("a")] fn a(&self) -> Result<()>; } },
                "async fn",
            ),
            (
                quote! { trait A { async fn a(&self) -> Result<()>; } },
                "HTTP method",
            ),
            (
                quote! { trait A { #[get("a")] async fn a(&self, id: u64) -> Result<()>; } },
                "needs a binding",
            ),
            (
                quote! { trait A { #[get("a")] async fn a() -> Result<()>; } },
                "&self",
            ),
            (
                quote! { trait A { #[get("a/{id}")] async fn a(&self) -> Result<()>; } },
                "has no #[path] argument",
            ),
            (
                quote! { trait A { #[get("a")] async fn a(&self, #[path] id: u64) -> Result<()>; } },
                "has no placeholder",
            ),
            (
                quote! { trait A { #[get("a")] async fn a(&self, #[body] b: u64) -> Result<()>; } },
                "cannot have a body",
            ),
            (
                quote! { trait A { #[get("a")] async fn a(&self); } },
                "must return a Result",
            ),
            (
                quote! { trait A<T> { #[get("a")] async fn a(&self) -> Result<T>; } },
                "cannot be generic",
            ),
        ];

        for (item, message) in cases {
            let err = expand_err(quote!("svc"), item);
            assert!(err.contains(message), "expected '{message}' in '{err}'");
        }
    }
}
