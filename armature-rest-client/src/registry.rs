//! Builds proxies for every configured service from one [`RestClientsConfig`].

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::descriptor::ServiceDescriptor;
use crate::interceptor::Interceptor;
use crate::observe::CallObserver;
use crate::properties::RestClientsConfig;
use crate::proxy::{Proxy, RestService};
use crate::service_account::{KeycloakTokenProvider, TokenProvider};
use crate::transport::Transport;
use crate::{ClientConfig, RestClientError, Result};

/// Factory of service proxies sharing configuration and circuit breakers.
///
/// ```rust,no_run
/// use armature_rest_client::{RestClients, RestClientsConfig};
///
/// # fn run() -> armature_rest_client::Result<()> {
/// let mut config = RestClientsConfig::from_file("rest-clients.toml")?;
/// config.apply_env_overrides()?;
/// let clients = RestClients::new(config)?;
/// # Ok(())
/// # }
/// ```
pub struct RestClients {
    config: RestClientsConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    transport: Option<Arc<dyn Transport>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    observers: Vec<Arc<dyn CallObserver>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl RestClients {
    /// Validate `config` and create the factory.
    pub fn new(config: RestClientsConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Load `path`, apply environment overrides and create the factory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = RestClientsConfig::from_file(path)?;
        config.apply_env_overrides()?;
        Self::new(config)
    }

    /// Start building a factory.
    pub fn builder(config: RestClientsConfig) -> RestClientsBuilder {
        RestClientsBuilder {
            config,
            transport: None,
            interceptors: Vec::new(),
            observers: Vec::new(),
            token_provider: None,
        }
    }

    /// Build a proxy for `descriptor` from `services.<name>`.
    pub fn proxy(&self, descriptor: ServiceDescriptor) -> Result<Proxy> {
        let config = self.client_config(descriptor.name()).ok_or_else(|| {
            RestClientError::config(format!(
                "no configuration for service '{}' (services.{})",
                descriptor.name(),
                descriptor.name()
            ))
        })?;

        let mut builder = Proxy::builder(descriptor, config).breaker_registry(self.breakers.clone());
        if let Some(transport) = &self.transport {
            builder = builder.transport(transport.clone());
        }
        for interceptor in &self.interceptors {
            builder = builder.interceptor(interceptor.clone());
        }
        for observer in &self.observers {
            builder = builder.observer(observer.clone());
        }
        if let Some(provider) = &self.token_provider {
            builder = builder.token_provider(provider.clone());
        }
        if self.config.log.enabled {
            builder = builder.log_level(self.config.log.level);
        }
        builder.build()
    }

    /// Build the client `C` for its service.
    pub fn create<C: RestService>(&self) -> Result<C> {
        self.proxy(C::descriptor()).map(C::from_proxy)
    }

    /// Runtime configuration of the named service.
    pub fn client_config(&self, service: &str) -> Option<ClientConfig> {
        self.config.service(service).map(|s| s.to_client_config())
    }

    /// Breakers shared by every proxy of this factory.
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// The configuration.
    pub fn config(&self) -> &RestClientsConfig {
        &self.config
    }
}

impl std::fmt::Debug for RestClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClients")
            .field("services", &self.config.services.keys().collect::<Vec<_>>())
            .field("breakers", &self.breakers)
            .field("interceptors", &self.interceptors.len())
            .field("observers", &self.observers.len())
            .field("token_provider", &self.token_provider.is_some())
            .finish()
    }
}

/// Builder for [`RestClients`].
pub struct RestClientsBuilder {
    config: RestClientsConfig,
    transport: Option<Arc<dyn Transport>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    observers: Vec<Arc<dyn CallObserver>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl RestClientsBuilder {
    /// Use `transport` for every service instead of a per-service reqwest client.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Add an interceptor to every service.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Add a call observer to every service.
    pub fn observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Fetch service-account tokens from `provider` instead of Keycloak.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Validate the configuration and create the factory.
    pub fn build(self) -> Result<RestClients> {
        self.config.validate()?;

        let token_provider = match self.token_provider {
            Some(provider) => Some(provider),
            None if self.config.keycloak.enabled => Some(Arc::new(
                KeycloakTokenProvider::from_config(&self.config.keycloak)?,
            ) as Arc<dyn TokenProvider>),
            None => None,
        };

        info!(
            services = self.config.services.len(),
            keycloak = self.config.keycloak.enabled,
            log_level = %self.config.log.level,
            "Configured REST clients"
        );

        Ok(RestClients {
            config: self.config,
            breakers: Arc::new(CircuitBreakerRegistry::new()),
            transport: self.transport,
            interceptors: self.interceptors,
            observers: self.observers,
            token_provider,
        })
    }
}
