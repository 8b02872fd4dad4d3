//! Attribute parsing for `#[rest_client]` traits.

use proc_macro2::Span;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Attribute, Error, Ident, LitInt, LitStr, Result, Token};

pub const VERBS: &[&str] = &["get", "post", "put", "patch", "delete", "head", "options"];

const METHOD_ATTRS: &[&str] = &["headers", "service_account", "response", "timeout"];

const PARAM_ATTRS: &[&str] = &["path", "query", "header", "body"];

/// Arguments of `#[rest_client("name", client = Name)]`.
pub struct ClientArgs {
    pub service: LitStr,
    pub client: Option<Ident>,
}

impl Parse for ClientArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let service: LitStr = input.parse().map_err(|e| {
            Error::new(
                e.span(),
                "expected the service name, e.g. #[rest_client(\"users\")]",
            )
        })?;
        if service.value().trim().is_empty() {
            return Err(Error::new(service.span(), "service name must not be empty"));
        }

        let mut client = None;
        while !input.is_empty() {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                break;
            }
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            match key.to_string().as_str() {
                "client" => client = Some(input.parse()?),
                other => {
                    return Err(Error::new(
                        key.span(),
                        format!("unknown rest_client argument `{other}`, expected `client`"),
                    ));
                }
            }
        }

        Ok(Self { service, client })
    }
}

/// Response decoding selected with `#[response(..)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Json,
    Text,
}

/// Service account declared with `#[service_account("name", scopes = [..])]`.
pub struct ServiceAccountAttr {
    pub name: LitStr,
    pub scopes: Vec<LitStr>,
}

/// Everything declared on one trait method.
pub struct EndpointAttrs {
    pub method: Ident,
    pub path: LitStr,
    pub headers: Vec<(String, String)>,
    pub service_account: Option<ServiceAccountAttr>,
    pub response: Option<ResponseKind>,
    pub timeout_ms: Option<u64>,
}

impl EndpointAttrs {
    /// Parse the endpoint attributes and strip them from `attrs`.
    pub fn take(attrs: &mut Vec<Attribute>, span: Span) -> Result<Self> {
        let mut verb: Option<(Ident, LitStr)> = None;
        let mut headers = Vec::new();
        let mut service_account = None;
        let mut response = None;
        let mut timeout_ms = None;

        let mut kept = Vec::with_capacity(attrs.len());
        for attr in attrs.drain(..) {
            let Some(ident) = attr.path().get_ident().cloned() else {
                kept.push(attr);
                continue;
            };
            let name = ident.to_string();

            if VERBS.contains(&name.as_str()) {
                if verb.is_some() {
                    return Err(Error::new(
                        ident.span(),
                        "only one HTTP method attribute is allowed per endpoint",
                    ));
                }
                let path: LitStr = attr.parse_args().map_err(|e| {
                    Error::new(e.span(), format!("expected a path, e.g. #[{name}(\"users/{{id}}\")]"))
                })?;
                let method = Ident::new(&name.to_ascii_uppercase(), ident.span());
                verb = Some((method, path));
                continue;
            }

            if !METHOD_ATTRS.contains(&name.as_str()) {
                kept.push(attr);
                continue;
            }

            match name.as_str() {
                "headers" => {
                    let lines =
                        attr.parse_args_with(Punctuated::<LitStr, Token![,]>::parse_terminated)?;
                    for line in lines {
                        headers.push(parse_header_line(&line)?);
                    }
                }
                "service_account" => service_account = Some(parse_service_account(&attr)?),
                "response" => {
                    let kind: Ident = attr.parse_args()?;
                    response = Some(match kind.to_string().as_str() {
                        "json" => ResponseKind::Json,
                        "text" => ResponseKind::Text,
                        _ => {
                            return Err(Error::new(
                                kind.span(),
                                "expected `json` or `text`",
                            ));
                        }
                    });
                }
                _ => timeout_ms = Some(parse_timeout(&attr)?),
            }
        }
        *attrs = kept;

        let Some((method, path)) = verb else {
            return Err(Error::new(
                span,
                "endpoint needs an HTTP method attribute: #[get], #[post], #[put], #[patch], #[delete], #[head] or #[options]",
            ));
        };

        Ok(Self {
            method,
            path,
            headers,
            service_account,
            response,
            timeout_ms,
        })
    }
}

fn parse_header_line(line: &LitStr) -> Result<(String, String)> {
    let value = line.value();
    let Some((name, content)) = value.split_once(':') else {
        return Err(Error::new(
            line.span(),
            "expected a header line of the form \"Name: value\"",
        ));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::new(line.span(), "header name must not be empty"));
    }
    Ok((name.to_string(), content.trim().to_string()))
}

fn parse_service_account(attr: &Attribute) -> Result<ServiceAccountAttr> {
    attr.parse_args_with(|input: ParseStream| {
        let name: LitStr = input.parse()?;
        let mut scopes = Vec::new();
        if input.parse::<Option<Token![,]>>()?.is_some() && !input.is_empty() {
            let key: Ident = input.parse()?;
            if key != "scopes" {
                return Err(Error::new(key.span(), "expected `scopes = [..]`"));
            }
            input.parse::<Token![=]>()?;
            let content;
            syn::bracketed!(content in input);
            scopes.extend(Punctuated::<LitStr, Token![,]>::parse_terminated(&content)?);
        }
        Ok(ServiceAccountAttr { name, scopes })
    })
}

fn parse_timeout(attr: &Attribute) -> Result<u64> {
    let mut millis = None;
    attr.parse_nested_meta(|meta| {
        let factor = if meta.path.is_ident("ms") {
            1
        } else if meta.path.is_ident("secs") {
            1000
        } else {
            return Err(meta.error("expected `ms = N` or `secs = N`"));
        };
        let value: LitInt = meta.value()?.parse()?;
        millis = Some(value.base10_parse::<u64>()? * factor);
        Ok(())
    })?;
    millis.ok_or_else(|| Error::new_spanned(attr, "expected `timeout(ms = N)`"))
}

/// Where an argument is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    Path { name: String, encoded: bool },
    Query(String),
    Header(String),
    Body(BodyKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    Text,
}

/// Parse the binding of one argument and strip our attributes from `attrs`.
pub fn take_param(attrs: &mut Vec<Attribute>, arg_name: &str, span: Span) -> Result<ParamKind> {
    let mut kind = None;
    let mut kept = Vec::with_capacity(attrs.len());

    for attr in attrs.drain(..) {
        let Some(ident) = attr.path().get_ident().cloned() else {
            kept.push(attr);
            continue;
        };
        let name = ident.to_string();
        if !PARAM_ATTRS.contains(&name.as_str()) {
            kept.push(attr);
            continue;
        }
        if kind.is_some() {
            return Err(Error::new(
                ident.span(),
                "an argument can only have one binding attribute",
            ));
        }

        let has_args = matches!(attr.meta, syn::Meta::List(_));
        kind = Some(match name.as_str() {
            "path" => {
                let mut binding = arg_name.to_string();
                let mut encoded = false;
                if has_args {
                    attr.parse_args_with(|input: ParseStream| {
                        while !input.is_empty() {
                            if input.peek(LitStr) {
                                binding = input.parse::<LitStr>()?.value();
                            } else {
                                let flag: Ident = input.parse()?;
                                if flag != "encoded" {
                                    return Err(Error::new(flag.span(), "expected `encoded`"));
                                }
                                encoded = true;
                            }
                            if !input.is_empty() {
                                input.parse::<Token![,]>()?;
                            }
                        }
                        Ok(())
                    })?;
                }
                ParamKind::Path {
                    name: binding,
                    encoded,
                }
            }
            "query" => ParamKind::Query(if has_args {
                attr.parse_args::<LitStr>()?.value()
            } else {
                arg_name.to_string()
            }),
            "header" => ParamKind::Header(if has_args {
                attr.parse_args::<LitStr>()?.value()
            } else {
                arg_name.replace('_', "-")
            }),
            _ => ParamKind::Body(if has_args {
                let format: Ident = attr.parse_args()?;
                match format.to_string().as_str() {
                    "json" => BodyKind::Json,
                    "form" => BodyKind::Form,
                    "text" => BodyKind::Text,
                    _ => {
                        return Err(Error::new(
                            format.span(),
                            "expected `json`, `form` or `text`",
                        ));
                    }
                }
            } else {
                BodyKind::Json
            }),
        });
    }
    *attrs = kept;

    kind.ok_or_else(|| {
        Error::new(
            span,
            format!(
                "argument `{arg_name}` needs a binding: #[path], #[query], #[header(\"Name\")] or #[body]"
            ),
        )
    })
}

/// Placeholder names of a path template, in order.
pub fn placeholders(template: &LitStr) -> Result<Vec<String>> {
    let value = template.value();
    let mut names = Vec::new();
    let mut rest = value.as_str();

    while let Some(open) = rest.find(['{', '}']) {
        if rest.as_bytes()[open] == b'}' {
            return Err(Error::new(template.span(), "unbalanced `}` in path template"));
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(Error::new(template.span(), "unclosed `{` in path template"));
        };
        let name = &after[..close];
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(Error::new(
                template.span(),
                format!("invalid placeholder `{{{name}}}` in path template"),
            ));
        }
        names.push(name.to_string());
        rest = &after[close + 1..];
    }

    Ok(names)
}
