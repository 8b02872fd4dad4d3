//! Endpoint and service descriptors.
//!
//! A [`ServiceDescriptor`] is the declarative description of a remote API: a
//! named table of [`EndpointDescriptor`]s, each carrying its HTTP method, path
//! template and parameter bindings. Descriptors are plain data; they are
//! validated once when a [`Proxy`](crate::Proxy) is built.

use http::{HeaderName, HeaderValue, Method};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::{RestClientError, Result};

/// A piece of a parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text copied verbatim.
    Literal(String),
    /// A `{name}` placeholder.
    Placeholder(String),
}

/// Parsed path template such as `users/{id}/posts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a path template.
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(RestClientError::config(format!(
                                    "nested '{{' in path template '{template}' at {pos}"
                                )));
                            }
                            _ => name.push(c),
                        }
                    }

                    if !closed {
                        return Err(RestClientError::config(format!(
                            "unclosed placeholder in path template '{template}' at {pos}"
                        )));
                    }
                    if name.is_empty() {
                        return Err(RestClientError::config(format!(
                            "empty placeholder in path template '{template}' at {pos}"
                        )));
                    }
                    if !name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
                    {
                        return Err(RestClientError::config(format!(
                            "invalid placeholder name '{name}' in path template '{template}'"
                        )));
                    }

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                }
                '}' => {
                    return Err(RestClientError::config(format!(
                        "unmatched '}}' in path template '{template}' at {pos}"
                    )));
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Render the template, resolving each placeholder through `resolve`.
    pub fn render<F>(&self, mut resolve: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<String>,
    {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => out.push_str(&resolve(name)?),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Request body encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyFormat {
    /// `application/json`.
    #[default]
    Json,
    /// `application/x-www-form-urlencoded`.
    Form,
    /// Scalar body as `text/plain`.
    Text,
}

impl BodyFormat {
    /// Content type sent with this body format.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Form => "application/x-www-form-urlencoded",
            Self::Text => "text/plain; charset=utf-8",
        }
    }
}

/// Response body decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// Decode the body as JSON.
    #[default]
    Json,
    /// Decode the body as a UTF-8 string.
    Text,
}

/// Where a call argument ends up in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    /// Substituted into a `{placeholder}` of the path template.
    Path,
    /// Appended as a query pair.
    Query,
    /// Sent as a request header.
    Header,
    /// Serialized as the request body.
    Body(BodyFormat),
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path => f.write_str("path"),
            Self::Query => f.write_str("query"),
            Self::Header => f.write_str("header"),
            Self::Body(_) => f.write_str("body"),
        }
    }
}

/// A declared parameter of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    /// Where the value goes.
    pub location: ParamLocation,
    /// Wire name: placeholder, query key or header name. `body` for bodies.
    pub name: String,
    /// Path values are already percent-encoded.
    pub encoded: bool,
}

/// Service account whose client-credentials token authorizes an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAccount {
    /// Account name, a key of the configured credentials.
    pub name: String,
    /// Optional scopes to request.
    pub scopes: Vec<String>,
}

impl ServiceAccount {
    /// Create a service account reference without scopes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scopes: Vec::new(),
        }
    }

    /// Request these scopes.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Token cache key: `name` or `name#scope#scope`.
    pub fn cache_key(&self) -> String {
        if self.scopes.is_empty() {
            self.name.clone()
        } else {
            format!("{}#{}", self.name, self.scopes.join("#"))
        }
    }
}

/// Description of one remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    name: String,
    method: Method,
    path: String,
    params: Vec<ParamBinding>,
    headers: Vec<(String, String)>,
    service_account: Option<ServiceAccount>,
    response: ResponseFormat,
    timeout: Option<Duration>,
}

impl EndpointDescriptor {
    /// Start describing an endpoint.
    pub fn builder(
        name: impl Into<String>,
        method: Method,
        path: impl Into<String>,
    ) -> EndpointDescriptorBuilder {
        EndpointDescriptorBuilder {
            descriptor: Self {
                name: name.into(),
                method,
                path: path.into(),
                params: Vec::new(),
                headers: Vec::new(),
                service_account: None,
                response: ResponseFormat::Json,
                timeout: None,
            },
        }
    }

    /// Describe a GET endpoint.
    pub fn get(name: impl Into<String>, path: impl Into<String>) -> EndpointDescriptorBuilder {
        Self::builder(name, Method::GET, path)
    }

    /// Describe a POST endpoint.
    pub fn post(name: impl Into<String>, path: impl Into<String>) -> EndpointDescriptorBuilder {
        Self::builder(name, Method::POST, path)
    }

    /// Describe a PUT endpoint.
    pub fn put(name: impl Into<String>, path: impl Into<String>) -> EndpointDescriptorBuilder {
        Self::builder(name, Method::PUT, path)
    }

    /// Describe a PATCH endpoint.
    pub fn patch(name: impl Into<String>, path: impl Into<String>) -> EndpointDescriptorBuilder {
        Self::builder(name, Method::PATCH, path)
    }

    /// Describe a DELETE endpoint.
    pub fn delete(name: impl Into<String>, path: impl Into<String>) -> EndpointDescriptorBuilder {
        Self::builder(name, Method::DELETE, path)
    }

    /// Endpoint name, unique within its service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Raw path template.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Declared parameter bindings in declaration order.
    pub fn params(&self) -> &[ParamBinding] {
        &self.params
    }

    /// Static headers.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Service account authorizing this endpoint.
    pub fn service_account(&self) -> Option<&ServiceAccount> {
        self.service_account.as_ref()
    }

    /// Response decoding.
    pub fn response_format(&self) -> ResponseFormat {
        self.response
    }

    /// Per-call deadline overriding the client's call timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Body encoding, if the endpoint takes a body.
    pub fn body_format(&self) -> Option<BodyFormat> {
        self.params.iter().find_map(|p| match p.location {
            ParamLocation::Body(format) => Some(format),
            _ => None,
        })
    }

    /// Find a binding by location kind and name.
    pub fn binding(&self, location: ParamLocation, name: &str) -> Option<&ParamBinding> {
        self.params.iter().find(|p| {
            same_location(p.location, location)
                && match location {
                    ParamLocation::Header => p.name.eq_ignore_ascii_case(name),
                    _ => p.name == name,
                }
        })
    }

    /// Validate the bindings and compile the path template.
    pub fn validate(&self) -> Result<PathTemplate> {
        let fail = |message: String| {
            RestClientError::config(format!("endpoint '{}': {}", self.name, message))
        };

        if self.name.is_empty() {
            return Err(RestClientError::config("endpoint name must not be empty"));
        }

        let template = PathTemplate::parse(&self.path).map_err(|e| match e {
            RestClientError::Configuration(message) => fail(message),
            other => other,
        })?;

        let mut seen = HashSet::new();
        let mut bodies = 0;
        for param in &self.params {
            let key = match param.location {
                ParamLocation::Header => {
                    HeaderName::from_bytes(param.name.as_bytes()).map_err(|_| {
                        fail(format!("invalid header parameter name '{}'", param.name))
                    })?;
                    format!("header:{}", param.name.to_ascii_lowercase())
                }
                ParamLocation::Body(_) => {
                    bodies += 1;
                    "body".to_string()
                }
                location => format!("{location}:{}", param.name),
            };
            if !seen.insert(key) && bodies <= 1 {
                return Err(fail(format!(
                    "duplicate {} parameter '{}'",
                    param.location, param.name
                )));
            }
        }

        if bodies > 1 {
            return Err(fail("at most one body parameter is allowed".to_string()));
        }
        if bodies == 1 && (self.method == Method::GET || self.method == Method::HEAD) {
            return Err(fail(format!("{} requests cannot carry a body", self.method)));
        }

        let placeholders: Vec<&str> = template.placeholders().collect();
        for placeholder in &placeholders {
            if self.binding(ParamLocation::Path, placeholder).is_none() {
                return Err(fail(format!(
                    "path placeholder '{{{placeholder}}}' has no path parameter"
                )));
            }
        }
        for param in self.params.iter().filter(|p| p.location == ParamLocation::Path) {
            if !placeholders.contains(&param.name.as_str()) {
                return Err(fail(format!(
                    "path parameter '{}' does not appear in '{}'",
                    param.name, self.path
                )));
            }
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| fail(format!("invalid header name '{name}'")))?;
            HeaderValue::from_str(value)
                .map_err(|_| fail(format!("invalid value for header '{name}'")))?;
        }

        Ok(template)
    }
}

fn same_location(a: ParamLocation, b: ParamLocation) -> bool {
    matches!(
        (a, b),
        (ParamLocation::Path, ParamLocation::Path)
            | (ParamLocation::Query, ParamLocation::Query)
            | (ParamLocation::Header, ParamLocation::Header)
            | (ParamLocation::Body(_), ParamLocation::Body(_))
    )
}

/// Builder for [`EndpointDescriptor`].
#[derive(Debug, Clone)]
pub struct EndpointDescriptorBuilder {
    descriptor: EndpointDescriptor,
}

impl EndpointDescriptorBuilder {
    fn param(mut self, location: ParamLocation, name: impl Into<String>, encoded: bool) -> Self {
        self.descriptor.params.push(ParamBinding {
            location,
            name: name.into(),
            encoded,
        });
        self
    }

    /// Bind a path placeholder.
    pub fn path_param(self, name: impl Into<String>) -> Self {
        self.param(ParamLocation::Path, name, false)
    }

    /// Bind a path placeholder whose values are already percent-encoded.
    pub fn encoded_path_param(self, name: impl Into<String>) -> Self {
        self.param(ParamLocation::Path, name, true)
    }

    /// Bind a query parameter.
    pub fn query_param(self, name: impl Into<String>) -> Self {
        self.param(ParamLocation::Query, name, false)
    }

    /// Bind a header parameter.
    pub fn header_param(self, name: impl Into<String>) -> Self {
        self.param(ParamLocation::Header, name, false)
    }

    /// Accept a request body.
    pub fn body(self, format: BodyFormat) -> Self {
        self.param(ParamLocation::Body(format), "body", false)
    }

    /// Add a static header sent with every call.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor.headers.push((name.into(), value.into()));
        self
    }

    /// Authorize calls with a service account token.
    pub fn service_account(mut self, account: ServiceAccount) -> Self {
        self.descriptor.service_account = Some(account);
        self
    }

    /// Set the response decoding.
    pub fn response(mut self, format: ResponseFormat) -> Self {
        self.descriptor.response = format;
        self
    }

    /// Set a per-call deadline for this endpoint.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = Some(timeout);
        self
    }

    /// Finish the descriptor.
    pub fn build(self) -> EndpointDescriptor {
        self.descriptor
    }
}

/// Named table of endpoints making up one remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    endpoints: Vec<EndpointDescriptor>,
}

impl ServiceDescriptor {
    /// Create a descriptor from parts.
    pub fn new(name: impl Into<String>, endpoints: Vec<EndpointDescriptor>) -> Self {
        Self {
            name: name.into(),
            endpoints,
        }
    }

    /// Start describing a service.
    pub fn builder(name: impl Into<String>) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder {
            descriptor: Self::new(name, Vec::new()),
        }
    }

    /// Service name, the key of its configuration section.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared endpoints.
    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    /// Look up an endpoint by name.
    pub fn endpoint(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Validate every endpoint, returning their compiled path templates.
    pub fn validate(&self) -> Result<Vec<PathTemplate>> {
        if self.name.trim().is_empty() {
            return Err(RestClientError::config("service name must not be empty"));
        }

        let mut names = HashSet::new();
        let mut templates = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            if !names.insert(endpoint.name.as_str()) {
                return Err(RestClientError::config(format!(
                    "service '{}': duplicate endpoint '{}'",
                    self.name, endpoint.name
                )));
            }
            let template = endpoint.validate().map_err(|e| match e {
                RestClientError::Configuration(message) => {
                    RestClientError::config(format!("service '{}': {}", self.name, message))
                }
                other => other,
            })?;
            templates.push(template);
        }
        Ok(templates)
    }
}

/// Builder for [`ServiceDescriptor`].
#[derive(Debug, Clone)]
pub struct ServiceDescriptorBuilder {
    descriptor: ServiceDescriptor,
}

impl ServiceDescriptorBuilder {
    /// Add an endpoint.
    pub fn endpoint(mut self, endpoint: EndpointDescriptor) -> Self {
        self.descriptor.endpoints.push(endpoint);
        self
    }

    /// Finish the descriptor.
    pub fn build(self) -> ServiceDescriptor {
        self.descriptor
    }
}
