//! Outgoing requests and the per-endpoint request factory.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::descriptor::{BodyFormat, EndpointDescriptor, ParamLocation, PathTemplate};
use crate::{Invocation, RestClientError, Result};

/// Identifies the service and endpoint a request was built for.
#[derive(Debug, Clone)]
pub struct RequestTag {
    /// Service name.
    pub service: Arc<str>,
    /// Endpoint the request was built from.
    pub endpoint: Arc<EndpointDescriptor>,
}

/// A fully built HTTP request.
///
/// Equality and [`HttpRequest::canonical_bytes`] only consider what goes on
/// the wire: method, URL, headers and body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    tag: Option<RequestTag>,
}

impl HttpRequest {
    /// Create a request without headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            tag: None,
        }
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Absolute URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Request body.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Replace the request body.
    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
    }

    /// Per-attempt timeout overriding the transport default.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set the per-attempt timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Service and endpoint this request belongs to.
    pub fn tag(&self) -> Option<&RequestTag> {
        self.tag.as_ref()
    }

    /// Attach a tag.
    pub fn with_tag(mut self, tag: RequestTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Serialize the wire parts of the request in a stable textual form.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.url.as_str().as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }
}

impl PartialEq for HttpRequest {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.url == other.url
            && self.headers == other.headers
            && self.body == other.body
    }
}

/// Value of an `Authorization: Bearer` header.
pub(crate) fn bearer_auth(token: &str) -> String {
    format!("Bearer {token}")
}

/// Value of an `Authorization: Basic` header.
pub(crate) fn basic_auth(username: &str, password: Option<&str>) -> String {
    use base64::Engine;
    let credentials = match password {
        Some(p) => format!("{username}:{p}"),
        None => format!("{username}:"),
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
    format!("Basic {encoded}")
}

/// Parse a base URL, treating its last path segment as a directory.
pub(crate) fn parse_base_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| RestClientError::config(format!("invalid base URL '{base}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RestClientError::config(format!(
            "base URL '{base}' must use http or https"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn is_dot_segment(value: &str) -> bool {
    value == "." || value == ".."
}

/// Builds requests for one endpoint. One entry of a proxy's dispatch table.
#[derive(Debug)]
pub(crate) struct RequestFactory {
    service: Arc<str>,
    endpoint: Arc<EndpointDescriptor>,
    template: PathTemplate,
    base_url: Url,
    default_headers: HeaderMap,
}

impl RequestFactory {
    /// Create a factory. Static headers must already be validated.
    pub(crate) fn new(
        service: Arc<str>,
        endpoint: Arc<EndpointDescriptor>,
        template: PathTemplate,
        base_url: Url,
        default_headers: &HeaderMap,
    ) -> Result<Self> {
        let mut headers = default_headers.clone();
        for (name, value) in endpoint.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RestClientError::config(format!("invalid header '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RestClientError::config(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            service,
            endpoint,
            template,
            base_url,
            default_headers: headers,
        })
    }

    pub(crate) fn endpoint(&self) -> &Arc<EndpointDescriptor> {
        &self.endpoint
    }

    pub(crate) fn template(&self) -> &PathTemplate {
        &self.template
    }

    fn invalid(&self, message: impl Into<String>) -> RestClientError {
        RestClientError::invocation(self.endpoint.name(), message)
    }

    /// Serialize the invocation's body.
    pub(crate) fn encode_body(&self, invocation: &Invocation) -> Result<Option<Bytes>> {
        let format = self.endpoint.body_format();
        let (value, format) = match (&invocation.body, format) {
            (None, None) => return Ok(None),
            (Some(_), None) => return Err(self.invalid("endpoint does not accept a body")),
            (None, Some(_)) => return Err(self.invalid("missing body argument")),
            (Some(Err(message)), Some(_)) => {
                return Err(RestClientError::Encoding(format!(
                    "failed to serialize body of '{}': {message}",
                    self.endpoint.name()
                )));
            }
            (Some(Ok(value)), Some(format)) => (value, format),
        };

        let bytes = match format {
            BodyFormat::Json => serde_json::to_vec(value)
                .map_err(|e| RestClientError::Encoding(e.to_string()))?,
            BodyFormat::Form => {
                let value = match value {
                    serde_json::Value::Object(map) => serde_json::Value::Object(
                        map.iter()
                            .filter(|(_, v)| !v.is_null())
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    ),
                    other => other.clone(),
                };
                serde_urlencoded::to_string(&value)
                    .map_err(|e| RestClientError::Encoding(e.to_string()))?
                    .into_bytes()
            }
            BodyFormat::Text => match value {
                serde_json::Value::String(s) => s.clone().into_bytes(),
                serde_json::Value::Number(n) => n.to_string().into_bytes(),
                serde_json::Value::Bool(b) => b.to_string().into_bytes(),
                _ => {
                    return Err(RestClientError::Encoding(format!(
                        "text body of '{}' must be a scalar value",
                        self.endpoint.name()
                    )));
                }
            },
        };

        Ok(Some(Bytes::from(bytes)))
    }

    /// Resolve the URL, attach headers and the encoded body.
    pub(crate) fn build(&self, invocation: &Invocation, body: Option<Bytes>) -> Result<HttpRequest> {
        self.check_arguments(invocation)?;

        let path = self.template.render(|name| {
            let encoded = self
                .endpoint
                .binding(ParamLocation::Path, name)
                .map(|b| b.encoded)
                .unwrap_or(false);
            match invocation.path.get(name) {
                Some(values) if !values.is_empty() => {
                    let value = values.join(",");
                    if is_dot_segment(&value)
                        || (encoded && value.split('/').any(is_dot_segment))
                    {
                        return Err(self.invalid(format!(
                            "path argument '{name}' must not be a relative path segment"
                        )));
                    }
                    Ok(if encoded {
                        value
                    } else {
                        urlencoding::encode(&value).into_owned()
                    })
                }
                _ => Err(self.invalid(format!("missing path argument '{name}'"))),
            }
        })?;

        let mut url = self
            .base_url
            .join(&path)
            .map_err(|e| self.invalid(format!("cannot resolve path '{path}': {e}")))?;

        let pairs: Vec<(&str, &str)> = self
            .endpoint
            .params()
            .iter()
            .filter(|p| p.location == ParamLocation::Query)
            .filter_map(|p| invocation.query.get(&p.name).map(|v| (p.name.as_str(), v)))
            .flat_map(|(name, values)| values.iter().map(move |v| (name, v.as_str())))
            .collect();
        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, value) in pairs {
                query.append_pair(name, value);
            }
        }

        let mut headers = self.default_headers.clone();
        for param in self
            .endpoint
            .params()
            .iter()
            .filter(|p| p.location == ParamLocation::Header)
        {
            let Some(values) = invocation.headers.get(&param.name.to_ascii_lowercase()) else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            let name = HeaderName::from_bytes(param.name.as_bytes())
                .map_err(|e| RestClientError::config(e.to_string()))?;
            let value = HeaderValue::from_str(&values.join(",")).map_err(|_| {
                RestClientError::Encoding(format!(
                    "value of header '{}' is not a valid header value",
                    param.name
                ))
            })?;
            headers.insert(name, value);
        }

        if body.is_some()
            && let Some(format) = self.endpoint.body_format()
            && !headers.contains_key(http::header::CONTENT_TYPE)
        {
            headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static(format.content_type()),
            );
        }

        let mut request = HttpRequest::new(self.endpoint.method().clone(), url).with_tag(RequestTag {
            service: self.service.clone(),
            endpoint: self.endpoint.clone(),
        });
        *request.headers_mut() = headers;
        request.set_body(body);
        Ok(request)
    }

    fn check_arguments(&self, invocation: &Invocation) -> Result<()> {
        let declared = |location: ParamLocation, name: &str| {
            self.endpoint.binding(location, name).is_some()
        };

        for name in invocation.path.keys() {
            if !declared(ParamLocation::Path, name) {
                return Err(self.invalid(format!("undeclared path argument '{name}'")));
            }
        }
        for name in invocation.query.keys() {
            if !declared(ParamLocation::Query, name) {
                return Err(self.invalid(format!("undeclared query argument '{name}'")));
            }
        }
        for name in invocation.headers.keys() {
            if !declared(ParamLocation::Header, name) {
                return Err(self.invalid(format!("undeclared header argument '{name}'")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ServiceAccount;
    use serde::Serialize;

    fn factory(endpoint: EndpointDescriptor, base: &str) -> RequestFactory {
        let template = endpoint.validate().unwrap();
        let mut defaults = HeaderMap::new();
        defaults.insert("x-client", HeaderValue::from_static("armature"));
        RequestFactory::new(
            Arc::from("users"),
            Arc::new(endpoint),
            template,
            parse_base_url(base).unwrap(),
            &defaults,
        )
        .unwrap()
    }

    fn build(factory: &RequestFactory, invocation: &Invocation) -> Result<HttpRequest> {
        let body = factory.encode_body(invocation)?;
        factory.build(invocation, body)
    }

    #[derive(Serialize)]
    struct NewUser {
        name: String,
        nickname: Option<String>,
    }

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(
            parse_base_url("https://api.example.com/v1").unwrap().as_str(),
            "https://api.example.com/v1/"
        );
        assert_eq!(
            parse_base_url("https://api.example.com").unwrap().as_str(),
            "https://api.example.com/"
        );
        assert!(parse_base_url("ftp://example.com").is_err());
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn test_path_query_and_headers() {
        let factory = factory(
            EndpointDescriptor::get("posts", "users/{id}/posts")
                .path_param("id")
                .query_param("tag")
                .query_param("page")
                .header_param("X-Trace")
                .header("Accept", "application/json")
                .build(),
            "https://api.example.com/v1",
        );

        let invocation = Invocation::new()
            .header("x-trace", "t-1")
            .query("page", &2)
            .query("tag", &vec!["a b", "c"])
            .path("id", "jo/hn");

        let request = build(&factory, &invocation).unwrap();
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/v1/users/jo%2Fhn/posts?tag=a+b&tag=c&page=2"
        );
        assert_eq!(request.header("x-trace"), Some("t-1"));
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("x-client"), Some("armature"));
        assert!(request.body().is_none());
        assert_eq!(request.tag().unwrap().endpoint.name(), "posts");
    }

    #[test]
    fn test_absolute_path_and_encoded_param() {
        let factory = factory(
            EndpointDescriptor::get("raw", "/files/{path}")
                .encoded_path_param("path")
                .build(),
            "https://api.example.com/v1/",
        );

        let request = build(&factory, &Invocation::new().path("path", "a%20b/c")).unwrap();
        assert_eq!(request.url().as_str(), "https://api.example.com/files/a%20b/c");
    }

    #[test]
    fn test_dot_segments_rejected() {
        let factory = factory(
            EndpointDescriptor::get("profile", "users/{id}/profile")
                .path_param("id")
                .build(),
            "https://api.example.com/v1/",
        );

        for value in [".", ".."] {
            let err = build(&factory, &Invocation::new().path("id", value)).unwrap_err();
            assert!(matches!(err, RestClientError::InvalidInvocation { .. }), "{value}: {err}");
        }

        let request = build(&factory, &Invocation::new().path("id", "...")).unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/v1/users/.../profile"
        );

        let raw = factory_for_encoded();
        let err = build(&raw, &Invocation::new().path("path", "a/../b")).unwrap_err();
        assert!(matches!(err, RestClientError::InvalidInvocation { .. }));
    }

    fn factory_for_encoded() -> RequestFactory {
        factory(
            EndpointDescriptor::get("raw", "files/{path}")
                .encoded_path_param("path")
                .build(),
            "https://api.example.com/v1/",
        )
    }

    #[test]
    fn test_optional_arguments_are_omitted() {
        let factory = factory(
            EndpointDescriptor::get("list", "users")
                .query_param("page")
                .header_param("X-Trace")
                .build(),
            "https://api.example.com",
        );

        let request = build(
            &factory,
            &Invocation::new()
                .query("page", &None::<u32>)
                .header("X-Trace", &None::<String>),
        )
        .unwrap();
        assert_eq!(request.url().as_str(), "https://api.example.com/users");
        assert!(request.header("x-trace").is_none());
    }

    #[test]
    fn test_json_body() {
        let factory = factory(
            EndpointDescriptor::post("create", "users")
                .body(BodyFormat::Json)
                .build(),
            "https://api.example.com",
        );

        let user = NewUser {
            name: "Ada".into(),
            nickname: None,
        };
        let request = build(&factory, &Invocation::new().body(&user)).unwrap();
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(
            request.body().unwrap().as_ref(),
            br#"{"name":"Ada","nickname":null}"#
        );
    }

    #[test]
    fn test_form_and_text_bodies() {
        let form = factory(
            EndpointDescriptor::post("create", "users")
                .body(BodyFormat::Form)
                .build(),
            "https://api.example.com",
        );
        let user = NewUser {
            name: "Ada Lovelace".into(),
            nickname: None,
        };
        let request = build(&form, &Invocation::new().body(&user)).unwrap();
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(request.body().unwrap().as_ref(), b"name=Ada+Lovelace");

        let text = factory(
            EndpointDescriptor::put("rename", "users/{id}/name")
                .path_param("id")
                .body(BodyFormat::Text)
                .build(),
            "https://api.example.com",
        );
        let request = build(&text, &Invocation::new().path("id", &1).body("Grace")).unwrap();
        assert_eq!(request.body().unwrap().as_ref(), b"Grace");

        let err = build(&text, &Invocation::new().path("id", &1).body(&vec![1, 2])).unwrap_err();
        assert!(matches!(err, RestClientError::Encoding(_)));
    }

    #[test]
    fn test_invalid_invocations() {
        let factory = factory(
            EndpointDescriptor::get("get", "users/{id}")
                .path_param("id")
                .build(),
            "https://api.example.com",
        );

        let missing = build(&factory, &Invocation::new()).unwrap_err();
        assert!(matches!(missing, RestClientError::InvalidInvocation { .. }));

        let undeclared = build(
            &factory,
            &Invocation::new().path("id", &1).query("page", &1),
        )
        .unwrap_err();
        assert!(matches!(undeclared, RestClientError::InvalidInvocation { .. }));

        let body = build(&factory, &Invocation::new().path("id", &1).body("x")).unwrap_err();
        assert!(matches!(body, RestClientError::InvalidInvocation { .. }));
    }

    #[test]
    fn test_invalid_header_value_is_encoding_error() {
        let factory = factory(
            EndpointDescriptor::get("get", "users")
                .header_param("X-Note")
                .build(),
            "https://api.example.com",
        );

        let err = build(&factory, &Invocation::new().header("X-Note", "a\nb")).unwrap_err();
        assert!(matches!(err, RestClientError::Encoding(_)));
    }

    #[test]
    fn test_identical_invocations_build_identical_requests() {
        let factory = factory(
            EndpointDescriptor::patch("update", "users/{id}")
                .path_param("id")
                .query_param("notify")
                .query_param("reason")
                .header_param("X-Trace")
                .body(BodyFormat::Json)
                .service_account(ServiceAccount::new("admin"))
                .build(),
            "https://api.example.com",
        );

        let first = Invocation::new()
            .path("id", &7)
            .query("notify", &true)
            .query("reason", "typo")
            .header("X-Trace", "abc")
            .body(&serde_json::json!({"b": 1, "a": [1, 2]}));
        let second = Invocation::new()
            .body(&serde_json::json!({"b": 1, "a": [1, 2]}))
            .header("X-Trace", "abc")
            .query("reason", "typo")
            .query("notify", &true)
            .path("id", &7);

        let a = build(&factory, &first).unwrap();
        let b = build(&factory, &second).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn test_auth_header_values() {
        assert_eq!(bearer_auth("abc"), "Bearer abc");
        assert_eq!(basic_auth("user", Some("pass")), "Basic dXNlcjpwYXNz");
        assert_eq!(basic_auth("user", None), "Basic dXNlcjo=");
    }
}
