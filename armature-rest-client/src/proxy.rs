//! Service proxies: a validated descriptor table plus its dispatch table.

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::descriptor::ServiceDescriptor;
use crate::interceptor::{HeaderPropagator, HttpLogLevel, Interceptor, LoggingInterceptor};
use crate::observe::CallObserver;
use crate::pipeline::{Pipeline, Route};
use crate::request::{RequestFactory, parse_base_url};
use crate::retry::RetryStrategy;
use crate::service_account::{ServiceAccountInterceptor, TokenProvider};
use crate::transport::{InterceptedTransport, ReqwestTransport, Transport};
use crate::{ClientConfig, HttpRequest, Invocation, Response, RestClientError, Result};

/// A client type backed by a [`Proxy`].
///
/// Implemented by clients generated with `#[rest_client]`.
pub trait RestService: Sized {
    /// The descriptor table of the service.
    fn descriptor() -> ServiceDescriptor;

    /// Wrap a proxy built from [`RestService::descriptor`].
    fn from_proxy(proxy: Proxy) -> Self;
}

/// Executes calls against one remote service.
///
/// Cloning is cheap; clones share the connection pool and breakers.
#[derive(Debug, Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

#[derive(Debug)]
struct ProxyInner {
    descriptor: ServiceDescriptor,
    routes: HashMap<String, Route>,
    pipeline: Pipeline,
}

impl Proxy {
    /// Start building a proxy for `descriptor`.
    pub fn builder(descriptor: ServiceDescriptor, config: ClientConfig) -> ProxyBuilder {
        ProxyBuilder {
            descriptor,
            config,
            transport: None,
            interceptors: Vec::new(),
            observers: Vec::new(),
            breaker_registry: None,
            retry_strategy: None,
            token_provider: None,
            log_level: HttpLogLevel::None,
        }
    }

    /// Build a proxy with the default transport.
    pub fn new(descriptor: ServiceDescriptor, config: ClientConfig) -> Result<Self> {
        Self::builder(descriptor, config).build()
    }

    /// The service descriptor.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.inner.descriptor
    }

    /// The service name.
    pub fn service(&self) -> &str {
        self.inner.descriptor.name()
    }

    fn route(&self, endpoint: &str) -> Result<&Route> {
        self.inner.routes.get(endpoint).ok_or_else(|| {
            RestClientError::invocation(
                endpoint,
                format!("service '{}' has no such endpoint", self.service()),
            )
        })
    }

    /// Call `endpoint` and decode the response body.
    pub async fn call<T: DeserializeOwned>(&self, endpoint: &str, invocation: Invocation) -> Result<T> {
        let route = self.route(endpoint)?;
        let format = route.factory.endpoint().response_format();
        self.inner
            .pipeline
            .execute(route, &invocation, |response| response.decode(format))
            .await
    }

    /// Call `endpoint` and return the raw response.
    pub async fn call_raw(&self, endpoint: &str, invocation: Invocation) -> Result<Response> {
        let route = self.route(endpoint)?;
        self.inner
            .pipeline
            .execute(route, &invocation, Ok)
            .await
    }

    /// Build the request `endpoint` would send, without sending it.
    ///
    /// Interceptors are not applied.
    pub fn prepare(&self, endpoint: &str, invocation: &Invocation) -> Result<HttpRequest> {
        let route = self.route(endpoint)?;
        self.inner.pipeline.prepare(route, invocation)
    }

    /// The circuit breaker guarding `endpoint`, if breaking is enabled.
    pub fn circuit_breaker(&self, endpoint: &str) -> Option<Arc<CircuitBreaker>> {
        self.inner
            .routes
            .get(endpoint)
            .and_then(|route| route.breaker.clone())
    }
}

/// Builder for [`Proxy`].
pub struct ProxyBuilder {
    descriptor: ServiceDescriptor,
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    observers: Vec<Arc<dyn CallObserver>>,
    breaker_registry: Option<Arc<CircuitBreakerRegistry>>,
    retry_strategy: Option<Arc<dyn RetryStrategy>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    log_level: HttpLogLevel,
}

impl ProxyBuilder {
    /// Send requests through `transport` instead of a new reqwest client.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Add an interceptor. Interceptors run in the order they are added.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Add a call observer.
    pub fn observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Take breakers from a shared registry.
    pub fn breaker_registry(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.breaker_registry = Some(registry);
        self
    }

    /// Replace the retry policy derived from the configuration.
    pub fn retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    /// Authorize service-account endpoints with tokens from `provider`.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Log every exchange at `level`.
    pub fn log_level(mut self, level: HttpLogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Validate the descriptor and configuration and build the dispatch table.
    pub fn build(self) -> Result<Proxy> {
        let templates = self.descriptor.validate()?;
        self.config.validate()?;

        if self.token_provider.is_none()
            && let Some(endpoint) = self
                .descriptor
                .endpoints()
                .iter()
                .find(|e| e.service_account().is_some())
        {
            return Err(RestClientError::config(format!(
                "endpoint '{}' acts as a service account but no token provider is configured",
                endpoint.name()
            )));
        }

        let service = self.descriptor.name();
        let base_url = self.config.base_url.as_deref().ok_or_else(|| {
            RestClientError::config(format!("no base URL configured for service '{service}'"))
        })?;
        let base_url = parse_base_url(base_url)?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in &self.config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RestClientError::config(format!("invalid header '{name}': {e}")))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                RestClientError::config(format!("invalid value for header '{name}': {e}"))
            })?;
            default_headers.append(name, value);
        }

        let service: Arc<str> = Arc::from(service);
        let registry = self.breaker_registry.unwrap_or_default();
        let mut routes = HashMap::with_capacity(templates.len());
        for (endpoint, template) in self.descriptor.endpoints().iter().zip(templates) {
            let factory = RequestFactory::new(
                service.clone(),
                Arc::new(endpoint.clone()),
                template,
                base_url.clone(),
                &default_headers,
            )?;
            let breaker = self.config.circuit_breaker.as_ref().map(|config| {
                let name = self
                    .config
                    .breaker_scope
                    .breaker_name(&service, endpoint.name());
                registry.get_or_create(&name, config)
            });
            routes.insert(endpoint.name().to_string(), Route { factory, breaker });
        }

        let inner: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };
        let mut transport = InterceptedTransport::new(inner);
        for interceptor in self.interceptors {
            transport = transport.with_interceptor(interceptor);
        }
        if !self.config.propagate_headers.is_empty() {
            transport = transport.with_interceptor(Arc::new(HeaderPropagator::new(
                &self.config.propagate_headers,
            )?));
        }
        if let Some(provider) = self.token_provider {
            transport =
                transport.with_interceptor(Arc::new(ServiceAccountInterceptor::new(provider)));
        }
        if self.log_level != HttpLogLevel::None {
            transport = transport.with_interceptor(Arc::new(LoggingInterceptor::new(self.log_level)));
        }

        let retry = self.retry_strategy.or_else(|| {
            self.config
                .retry
                .clone()
                .map(|config| Arc::new(config) as Arc<dyn RetryStrategy>)
        });

        tracing::debug!(
            service = %service,
            endpoints = routes.len(),
            interceptors = transport.len(),
            "Built REST client proxy"
        );

        Ok(Proxy {
            inner: Arc::new(ProxyInner {
                descriptor: self.descriptor,
                routes,
                pipeline: Pipeline {
                    service,
                    transport: Arc::new(transport),
                    retry,
                    call_timeout: self.config.call_timeout,
                    observers: self.observers,
                },
            }),
        })
    }
}
