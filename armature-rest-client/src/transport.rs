//! Transport layer: the pooled HTTP client and the interceptor chain around it.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

use crate::interceptor::Interceptor;
use crate::{ClientConfig, HttpRequest, Response, RestClientError, Result};

/// Sends a single request attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and read the full response.
    async fn send(&self, request: HttpRequest) -> Result<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<Response> {
        (**self).send(request).await
    }
}

/// Transport backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
    in_flight: Arc<AtomicUsize>,
}

impl ReqwestTransport {
    /// Build a transport from the connection settings of `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let connection = &config.connection;
        let mut builder = reqwest::Client::builder()
            .timeout(connection.request_timeout)
            .connect_timeout(connection.connect_timeout)
            .pool_idle_timeout(connection.pool_idle_timeout)
            .pool_max_idle_per_host(connection.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .gzip(config.gzip)
            .brotli(config.brotli);

        if config.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        } else {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        let inner = builder
            .build()
            .map_err(|e| RestClientError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::from_client(inner))
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self {
            inner,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Requests currently holding a connection.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<Response> {
        let _guard = InFlightGuard::enter(&self.in_flight);

        let mut builder = self
            .inner
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout() {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        Response::from_reqwest(response).await
    }
}

/// Runs interceptors around an inner transport.
///
/// Request hooks run in registration order, response hooks in reverse order.
#[derive(Clone)]
pub struct InterceptedTransport {
    inner: Arc<dyn Transport>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptedTransport {
    /// Wrap a transport without interceptors.
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            interceptors: Vec::new(),
        }
    }

    /// Add an interceptor to the end of the chain.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Number of interceptors in the chain.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain has no interceptors.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl std::fmt::Debug for InterceptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptedTransport")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[async_trait]
impl Transport for InterceptedTransport {
    async fn send(&self, mut request: HttpRequest) -> Result<Response> {
        for interceptor in &self.interceptors {
            request = interceptor.intercept_request(request).await?;
        }

        trace!(method = %request.method(), url = %request.url(), "Dispatching request");
        let mut response = self.inner.send(request).await?;

        for interceptor in self.interceptors.iter().rev() {
            response = interceptor.intercept_response(response).await?;
        }
        Ok(response)
    }
}
