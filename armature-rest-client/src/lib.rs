//! # Armature REST Client
//!
//! Declarative REST client proxies with retry, circuit breaking, interceptors
//! and optional metrics.
//!
//! A service is described once as a table of endpoint descriptors. A
//! [`Proxy`] validates the table at construction and turns each call into an
//! HTTP request, runs it through the resilience layer and decodes the
//! response. The `#[rest_client]` macro builds the table from an annotated
//! trait.
//!
//! ## Features
//!
//! - **Declarative endpoints**: path templates, query, header and body bindings
//! - **Retry with Backoff**: exponential, linear or constant, with jitter; transient errors only
//! - **Circuit Breaker**: sliding-window failure and slow-call rates, per client or per endpoint
//! - **Timeouts**: connection, request and whole-call deadlines
//! - **Interceptors**: logging, authentication, header propagation, service accounts
//! - **Configuration**: TOML/JSON properties with environment overrides
//! - **Metrics**: Prometheus call observer (`prometheus` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use armature_rest_client::{ClientConfig, rest_client};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[rest_client("users")]
//! pub trait UserApi {
//!     #[get("users/{id}")]
//!     async fn get_user(&self, #[path] id: u64) -> armature_rest_client::Result<User>;
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::with_base_url("https://api.example.com/");
//!     let users = UserApiClient::new(config)?;
//!
//!     let user = users.get_user(42).await?;
//!     println!("{}: {}", user.id, user.name);
//!     Ok(())
//! }
//! ```
//!
//! ## Without the macro
//!
//! ```rust,no_run
//! use armature_rest_client::{
//!     ClientConfig, EndpointDescriptor, Invocation, Proxy, RetryConfig, ServiceDescriptor,
//! };
//! use std::time::Duration;
//!
//! # async fn run() -> armature_rest_client::Result<()> {
//! let descriptor = ServiceDescriptor::builder("orders")
//!     .endpoint(
//!         EndpointDescriptor::get("find", "orders/{id}")
//!             .path_param("id")
//!             .query_param("expand")
//!             .build(),
//!     )
//!     .build();
//!
//! let config = ClientConfig::builder()
//!     .base_url("https://api.example.com/")
//!     .call_timeout(Duration::from_secs(5))
//!     .retry(RetryConfig::exponential(3, Duration::from_millis(100)))
//!     .build();
//!
//! let proxy = Proxy::new(descriptor, config)?;
//! let order: serde_json::Value = proxy
//!     .call("find", Invocation::new().path("id", &7).query("expand", "items"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod config;
mod descriptor;
mod error;
mod interceptor;
mod invocation;
mod observe;
mod pipeline;
pub mod propagation;
mod properties;
mod proxy;
mod registry;
mod request;
mod response;
mod retry;
mod service_account;
mod transport;

pub use circuit_breaker::{
    BreakerScope, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
    CircuitBreakerRegistry, CircuitState, SlidingWindowType,
};
pub use config::{ClientConfig, ClientConfigBuilder, ConnectionConfig};
pub use descriptor::{
    BodyFormat, EndpointDescriptor, EndpointDescriptorBuilder, ParamBinding, ParamLocation,
    PathTemplate, ResponseFormat, Segment, ServiceAccount, ServiceDescriptor,
    ServiceDescriptorBuilder,
};
pub use error::{ErrorKind, RestClientError, Result};
pub use interceptor::{
    AuthInterceptor, HeaderPropagator, HttpLogLevel, Interceptor, LoggingInterceptor,
};
pub use invocation::{Invocation, ParamValue};
#[cfg(feature = "prometheus")]
pub use observe::PrometheusObserver;
pub use observe::{CallObserver, CallOutcome, CallRecord};
pub use properties::{
    CircuitBreakerProperties, ClientCredentials, ConnectionProperties, ENV_PREFIX,
    KeycloakConfig, LogConfig, RestClientsConfig, RetryProperties, ServiceConfig,
};
pub use proxy::{Proxy, ProxyBuilder, RestService};
pub use registry::{RestClients, RestClientsBuilder};
pub use request::{HttpRequest, RequestTag};
pub use response::Response;
pub use retry::{BackoffStrategy, RetryConfig, RetryContext, RetryStrategy};
pub use service_account::{
    AccessToken, KeycloakTokenProvider, ServiceAccountInterceptor, TokenProvider,
};
pub use transport::{InterceptedTransport, ReqwestTransport, Transport};

pub use async_trait::async_trait;
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

#[cfg(feature = "macros")]
pub use armature_rest_client_macro::rest_client;

/// Prelude for common imports.
///
/// ```
/// use armature_rest_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::circuit_breaker::{BreakerScope, CircuitBreakerConfig, CircuitState};
    pub use crate::config::ClientConfig;
    pub use crate::descriptor::{EndpointDescriptor, ServiceDescriptor};
    pub use crate::error::{ErrorKind, RestClientError, Result};
    pub use crate::interceptor::{HttpLogLevel, Interceptor};
    pub use crate::invocation::Invocation;
    pub use crate::properties::RestClientsConfig;
    pub use crate::proxy::{Proxy, RestService};
    pub use crate::registry::RestClients;
    pub use crate::retry::{BackoffStrategy, RetryConfig};
    #[cfg(feature = "macros")]
    pub use armature_rest_client_macro::rest_client;
}
