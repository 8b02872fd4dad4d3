//! REST client error types.

use std::time::Duration;
use thiserror::Error;

/// Result type for REST client operations.
pub type Result<T> = std::result::Result<T, RestClientError>;

/// Coarse classification of a [`RestClientError`].
///
/// Only [`ErrorKind::TransientTransport`] errors are retried and counted as
/// failures by the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid descriptor, configuration or invocation.
    Configuration,
    /// Request body serialization or response body deserialization failed.
    Encoding,
    /// Timeout, connection failure or 5xx response.
    TransientTransport,
    /// 4xx response or another failure retrying cannot fix.
    PermanentTransport,
    /// Rejected by an open circuit breaker.
    CircuitOpen,
}

/// REST client errors.
#[derive(Debug, Error)]
pub enum RestClientError {
    /// Invalid endpoint descriptor or client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A call did not match its endpoint's bindings.
    #[error("Invalid invocation of '{endpoint}': {message}")]
    InvalidInvocation {
        /// Endpoint name.
        endpoint: String,
        /// What was wrong with the arguments.
        message: String,
    },

    /// Body serialization or deserialization error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A single attempt timed out.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's deadline for the whole call elapsed.
    #[error("Call cancelled after {0:?}")]
    CallTimeout(Duration),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Non-success response status.
    #[error("Response error: {status} - {message}")]
    Response {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Circuit breaker is open, rejecting requests.
    #[error("Circuit breaker '{name}' is open, request rejected")]
    CircuitOpen {
        /// Breaker name.
        name: String,
    },

    /// Request failed after all retries exhausted.
    #[error("Request failed after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: Box<RestClientError>,
    },

    /// Service account token could not be obtained.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Interceptor error.
    #[error("Interceptor error: {0}")]
    Interceptor(String),

    /// Underlying HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl RestClientError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an invalid invocation error.
    pub fn invocation(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInvocation {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::InvalidInvocation { .. } | Self::UrlParse(_) => {
                ErrorKind::Configuration
            }
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Timeout(_) | Self::CallTimeout(_) | Self::Connection(_) => {
                ErrorKind::TransientTransport
            }
            Self::Response { status, .. } => {
                if *status >= 500 {
                    ErrorKind::TransientTransport
                } else {
                    ErrorKind::PermanentTransport
                }
            }
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::RetryExhausted { last, .. } => last.kind(),
            Self::Authentication(_) | Self::Interceptor(_) => ErrorKind::PermanentTransport,
            Self::Http(e) => {
                if e.is_builder() {
                    ErrorKind::Configuration
                } else if e.is_decode() {
                    ErrorKind::Encoding
                } else if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                    ErrorKind::TransientTransport
                } else if let Some(status) = e.status() {
                    if status.is_server_error() {
                        ErrorKind::TransientTransport
                    } else {
                        ErrorKind::PermanentTransport
                    }
                } else {
                    ErrorKind::PermanentTransport
                }
            }
        }
    }

    /// Check if this error is a transient transport failure.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientTransport
    }

    /// Check if another attempt could succeed.
    ///
    /// Caller deadlines and exhausted retries are transient but final.
    pub fn is_retryable(&self) -> bool {
        self.is_transient() && !matches!(self, Self::CallTimeout(_) | Self::RetryExhausted { .. })
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::CallTimeout(_) => true,
            Self::Http(e) => e.is_timeout(),
            Self::RetryExhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Http(e) => e.is_connect() || e.is_request() || e.is_body(),
            Self::RetryExhausted { last, .. } => last.is_connection(),
            _ => false,
        }
    }

    /// Get the HTTP status code if this is a response error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::RetryExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }
}
