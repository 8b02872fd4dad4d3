//! REST client configuration.

use std::time::Duration;

use crate::circuit_breaker::{BreakerScope, CircuitBreakerConfig};
use crate::retry::RetryConfig;
use crate::{RestClientError, Result};

/// Connection pool and socket settings of a client.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout of a single request attempt.
    pub request_timeout: Duration,
    /// Idle connections older than this are evicted from the pool.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
        }
    }
}

/// Configuration of one REST client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL all endpoint paths are resolved against.
    pub base_url: Option<String>,
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// Deadline for a whole call, retries included.
    pub call_timeout: Option<Duration>,
    /// Retry configuration; `None` makes a single attempt.
    pub retry: Option<RetryConfig>,
    /// Circuit breaker configuration; `None` disables the breaker.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Whether breakers are shared per client or per endpoint.
    pub breaker_scope: BreakerScope,
    /// Default headers for all requests.
    pub default_headers: Vec<(String, String)>,
    /// Inbound headers copied onto outgoing requests.
    pub propagate_headers: Vec<String>,
    /// User agent string.
    pub user_agent: String,
    /// Enable gzip compression.
    pub gzip: bool,
    /// Enable brotli compression.
    pub brotli: bool,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connection: ConnectionConfig::default(),
            call_timeout: None,
            retry: None,
            circuit_breaker: None,
            breaker_scope: BreakerScope::PerClient,
            default_headers: Vec::new(),
            propagate_headers: Vec::new(),
            user_agent: format!("armature-rest-client/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
            brotli: true,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Shorthand for a default configuration with a base URL.
    pub fn with_base_url(url: impl Into<String>) -> Self {
        Self::builder().base_url(url).build()
    }

    /// Check values that would make the client unusable.
    pub fn validate(&self) -> Result<()> {
        if let Some(retry) = &self.retry
            && retry.max_attempts == 0
        {
            return Err(RestClientError::config("retry max_attempts must be at least 1"));
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        if self.call_timeout.is_some_and(|t| t.is_zero()) {
            return Err(RestClientError::config("call_timeout must be positive"));
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the base URL for all requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the per-attempt request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.request_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.connect_timeout = timeout;
        self
    }

    /// Set the deadline for a whole call.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Replace the connection settings.
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.config.connection = connection;
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = Some(config);
        self
    }

    /// Set circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = Some(config);
        self
    }

    /// Set the breaker scope.
    pub fn breaker_scope(mut self, scope: BreakerScope) -> Self {
        self.config.breaker_scope = scope;
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.connection.pool_max_idle_per_host = max;
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Copy an inbound header onto outgoing requests.
    pub fn propagate_header(mut self, name: impl Into<String>) -> Self {
        self.config.propagate_headers.push(name.into());
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable gzip compression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Enable or disable brotli compression.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.brotli = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
