//! Request and response interceptors.

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::fmt;

use crate::request::{basic_auth, bearer_auth};
use crate::{HttpRequest, Response, RestClientError, Result, propagation};

/// Interceptor trait for modifying requests and responses.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Intercept and optionally modify the request before sending.
    async fn intercept_request(&self, request: HttpRequest) -> Result<HttpRequest> {
        Ok(request)
    }

    /// Intercept and optionally modify the response after receiving.
    async fn intercept_response(&self, response: Response) -> Result<Response> {
        Ok(response)
    }
}

/// How much of each exchange [`LoggingInterceptor`] logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(from = "String")]
pub enum HttpLogLevel {
    /// Nothing.
    #[default]
    None,
    /// Request line and response status.
    Basic,
    /// Basic plus headers.
    Headers,
    /// Headers plus bodies.
    Body,
}

impl From<&str> for HttpLogLevel {
    /// Unknown names fall back to [`HttpLogLevel::None`].
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "BASIC" => Self::Basic,
            "HEADERS" => Self::Headers,
            "BODY" => Self::Body,
            _ => Self::None,
        }
    }
}

impl From<String> for HttpLogLevel {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for HttpLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Basic => "BASIC",
            Self::Headers => "HEADERS",
            Self::Body => "BODY",
        };
        f.write_str(name)
    }
}

const REDACTED: &str = "██";

fn is_sensitive(name: &HeaderName) -> bool {
    name == http::header::AUTHORIZATION || name == http::header::PROXY_AUTHORIZATION
}

fn log_headers(direction: &'static str, headers: &HeaderMap) {
    for (name, value) in headers {
        let value = if is_sensitive(name) {
            REDACTED
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        tracing::debug!(direction, header = %name, value, "HTTP header");
    }
}

/// Logging interceptor that logs requests and responses.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
    level: HttpLogLevel,
}

impl LoggingInterceptor {
    /// Create a new logging interceptor.
    pub fn new(level: HttpLogLevel) -> Self {
        Self { level }
    }

    /// Logging level.
    pub fn level(&self) -> HttpLogLevel {
        self.level
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept_request(&self, request: HttpRequest) -> Result<HttpRequest> {
        if self.level == HttpLogLevel::None {
            return Ok(request);
        }

        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            body_bytes = request.body().map(|b| b.len()).unwrap_or(0),
            "--> Sending HTTP request"
        );

        if self.level >= HttpLogLevel::Headers {
            log_headers("request", request.headers());
        }
        if self.level >= HttpLogLevel::Body
            && let Some(body) = request.body()
        {
            tracing::debug!(body = %String::from_utf8_lossy(body), "Request body");
        }

        Ok(request)
    }

    async fn intercept_response(&self, response: Response) -> Result<Response> {
        if self.level == HttpLogLevel::None {
            return Ok(response);
        }

        tracing::debug!(
            status = %response.status(),
            url = %response.url(),
            body_bytes = response.bytes().len(),
            "<-- Received HTTP response"
        );

        if self.level >= HttpLogLevel::Headers {
            log_headers("response", response.headers());
        }
        if self.level >= HttpLogLevel::Body && !response.bytes().is_empty() {
            tracing::debug!(body = %String::from_utf8_lossy(response.bytes()), "Response body");
        }

        Ok(response)
    }
}

/// Authentication interceptor that adds auth headers.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    header: HeaderName,
    value: HeaderValue,
}

impl AuthInterceptor {
    fn new(header: HeaderName, value: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(value)
            .map_err(|e| RestClientError::config(format!("invalid credentials: {e}")))?;
        value.set_sensitive(true);
        Ok(Self { header, value })
    }

    /// Create a bearer token interceptor.
    pub fn bearer(token: impl AsRef<str>) -> Result<Self> {
        Self::new(http::header::AUTHORIZATION, &bearer_auth(token.as_ref()))
    }

    /// Create a basic auth interceptor.
    pub fn basic(username: impl AsRef<str>, password: impl AsRef<str>) -> Result<Self> {
        Self::new(
            http::header::AUTHORIZATION,
            &basic_auth(username.as_ref(), Some(password.as_ref())),
        )
    }

    /// Create an API key interceptor.
    pub fn api_key(header: impl AsRef<str>, key: impl AsRef<str>) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_ref().as_bytes())
            .map_err(|e| RestClientError::config(format!("invalid API key header: {e}")))?;
        Self::new(header, key.as_ref())
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept_request(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        request
            .headers_mut()
            .insert(self.header.clone(), self.value.clone());
        Ok(request)
    }
}

/// Copies inbound request headers onto outgoing requests.
///
/// Only headers the outgoing request does not already carry are copied. The
/// inbound headers come from [`propagation::scope`].
#[derive(Debug, Clone)]
pub struct HeaderPropagator {
    headers: Vec<HeaderName>,
}

impl HeaderPropagator {
    /// Propagate the given header names.
    pub fn new<I, S>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers = headers
            .into_iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_ref().as_bytes()).map_err(|e| {
                    RestClientError::config(format!(
                        "invalid propagated header '{}': {e}",
                        name.as_ref()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { headers })
    }

    /// Propagate only the `Authorization` header.
    pub fn authorization() -> Self {
        Self {
            headers: vec![http::header::AUTHORIZATION],
        }
    }
}

#[async_trait]
impl Interceptor for HeaderPropagator {
    async fn intercept_request(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        let Some(inbound) = propagation::current() else {
            return Ok(request);
        };

        for name in &self.headers {
            if request.headers().contains_key(name) {
                continue;
            }
            for value in inbound.get_all(name) {
                request.headers_mut().append(name.clone(), value.clone());
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn request() -> HttpRequest {
        HttpRequest::new(
            Method::GET,
            url::Url::parse("https://api.example.com/users").unwrap(),
        )
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(HttpLogLevel::from("basic"), HttpLogLevel::Basic);
        assert_eq!(HttpLogLevel::from("HEADERS"), HttpLogLevel::Headers);
        assert_eq!(HttpLogLevel::from(" Body "), HttpLogLevel::Body);
        assert_eq!(HttpLogLevel::from("verbose"), HttpLogLevel::None);
        assert!(HttpLogLevel::Body > HttpLogLevel::Basic);
        assert_eq!(HttpLogLevel::Headers.to_string(), "HEADERS");
    }

    #[tokio::test]
    async fn test_logging_passes_through() {
        let interceptor = LoggingInterceptor::new(HttpLogLevel::Body);
        let mut req = request();
        req.set_body(Some("{}".into()));
        let out = interceptor.intercept_request(req.clone()).await.unwrap();
        assert_eq!(out, req);
    }

    #[derive(Clone, Default)]
    struct Capture(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_logging_redacts_credentials() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let interceptor = LoggingInterceptor::new(HttpLogLevel::Headers);
        let mut req = request();
        req.headers_mut()
            .insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        req.headers_mut()
            .insert("x-trace", HeaderValue::from_static("t-1"));

        tracing::subscriber::with_default(subscriber, || {
            tokio_test::block_on(interceptor.intercept_request(req)).unwrap();
        });

        let output = String::from_utf8(capture.0.lock().clone()).unwrap();
        assert!(output.contains("--> Sending HTTP request"));
        assert!(output.contains("t-1"));
        assert!(output.contains(REDACTED));
        assert!(!output.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_auth_interceptor() {
        let bearer = AuthInterceptor::bearer("token").unwrap();
        let req = bearer.intercept_request(request()).await.unwrap();
        assert_eq!(req.header("authorization"), Some("Bearer token"));

        let basic = AuthInterceptor::basic("user", "pass").unwrap();
        let req = basic.intercept_request(request()).await.unwrap();
        assert_eq!(req.header("authorization"), Some("Basic dXNlcjpwYXNz"));

        let api_key = AuthInterceptor::api_key("X-Api-Key", "secret").unwrap();
        let req = api_key.intercept_request(request()).await.unwrap();
        assert_eq!(req.header("x-api-key"), Some("secret"));

        assert!(AuthInterceptor::bearer("bad\ntoken").is_err());
        assert!(AuthInterceptor::api_key("bad header", "x").is_err());
    }

    #[tokio::test]
    async fn test_header_propagation() {
        let propagator = HeaderPropagator::authorization();

        let outside = propagator.intercept_request(request()).await.unwrap();
        assert!(outside.header("authorization").is_none());

        let mut inbound = HeaderMap::new();
        inbound.insert("authorization", HeaderValue::from_static("Bearer inbound"));
        inbound.insert("x-other", HeaderValue::from_static("ignored"));

        let propagated = propagation::scope(inbound.clone(), propagator.intercept_request(request()))
            .await
            .unwrap();
        assert_eq!(propagated.header("authorization"), Some("Bearer inbound"));
        assert!(propagated.header("x-other").is_none());

        let mut own = request();
        own.headers_mut()
            .insert("authorization", HeaderValue::from_static("Bearer own"));
        let kept = propagation::scope(inbound, propagator.intercept_request(own))
            .await
            .unwrap();
        assert_eq!(kept.header("authorization"), Some("Bearer own"));
    }
}
