//! File and environment bound configuration of all REST clients.
//!
//! ```toml
//! [log]
//! enabled = true
//! level = "BASIC"
//!
//! [keycloak]
//! enabled = true
//! base_url = "https://sso.example.com"
//! realm = "internal"
//! credentials.billing = { client_id = "billing", client_secret = "s3cret" }
//!
//! [services.users]
//! base_url = "https://users.internal/api/"
//! propagate_auth_header = true
//! connection = { read_timeout = "5s", connect_timeout = "2s" }
//! retry = { max_attempts = 3, wait_duration = "100ms" }
//! circuit_breaker = { failure_rate_threshold = 50.0, sliding_window_size = 20 }
//! ```

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::circuit_breaker::{BreakerScope, CircuitBreakerConfig, SlidingWindowType};
use crate::config::{ClientConfig, ConnectionConfig};
use crate::interceptor::HttpLogLevel;
use crate::request::parse_base_url;
use crate::retry::{BackoffStrategy, RetryConfig};
use crate::{RestClientError, Result};

/// Prefix of the environment variables read by [`RestClientsConfig::apply_env_overrides`].
pub const ENV_PREFIX: &str = "REST_CLIENT_";

fn parse_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

fn parse_optional_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|value| humantime::parse_duration(&value).map_err(serde::de::Error::custom))
        .transpose()
}

/// Configuration of every REST client in the application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RestClientsConfig {
    /// Wire logging.
    pub log: LogConfig,
    /// Keycloak service-account tokens.
    pub keycloak: KeycloakConfig,
    /// Per-service settings, keyed by service name.
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Wire logging settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Install a logging interceptor on every client.
    pub enabled: bool,
    /// How much to log.
    pub level: HttpLogLevel,
}

/// Keycloak settings used to obtain service-account tokens.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeycloakConfig {
    /// Enable service-account tokens.
    pub enabled: bool,
    /// Keycloak base URL.
    pub base_url: Option<String>,
    /// Realm issuing the tokens.
    pub realm: Option<String>,
    /// Client credentials keyed by service-account name.
    pub credentials: BTreeMap<String, ClientCredentials>,
}

/// OAuth2 client credentials of one service account.
#[derive(Clone, Deserialize)]
pub struct ClientCredentials {
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Settings of one service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the service.
    pub base_url: Option<String>,
    /// Copy the inbound `Authorization` header onto outgoing requests.
    pub propagate_auth_header: bool,
    /// Deadline for a whole call, retries included.
    #[serde(deserialize_with = "parse_optional_duration")]
    pub call_timeout: Option<Duration>,
    /// Share one breaker per client or per endpoint.
    pub breaker_scope: BreakerScope,
    /// Headers sent with every request.
    pub default_headers: BTreeMap<String, String>,
    /// Connection settings.
    pub connection: ConnectionProperties,
    /// Retry settings.
    pub retry: RetryProperties,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerProperties,
}

/// Connection settings of one service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionProperties {
    /// Time allowed for reading the response.
    #[serde(deserialize_with = "parse_duration")]
    pub read_timeout: Duration,
    /// Time allowed for writing the request.
    #[serde(deserialize_with = "parse_duration")]
    pub write_timeout: Duration,
    /// Time allowed for establishing a connection.
    #[serde(deserialize_with = "parse_duration")]
    pub connect_timeout: Duration,
    /// Idle connections older than this are evicted.
    #[serde(deserialize_with = "parse_duration")]
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(300),
            pool_max_idle_per_host: 5,
        }
    }
}

/// Retry settings of one service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryProperties {
    /// Enable retries.
    pub enabled: bool,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Retry 5xx responses.
    pub retry_on_5xx: bool,
    /// Delay before the first retry.
    #[serde(deserialize_with = "parse_duration")]
    pub wait_duration: Duration,
    /// Growth factor of the delay.
    pub backoff_multiplier: f64,
    /// Upper bound of the delay.
    #[serde(deserialize_with = "parse_duration")]
    pub max_wait_duration: Duration,
    /// Randomization factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryProperties {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            retry_on_5xx: true,
            wait_duration: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_wait_duration: Duration::from_secs(30),
            jitter: 0.5,
        }
    }
}

impl RetryProperties {
    fn to_retry_config(&self) -> Option<RetryConfig> {
        if !self.enabled {
            return None;
        }
        let backoff = if self.backoff_multiplier > 1.0 {
            BackoffStrategy::Exponential {
                initial: self.wait_duration,
                max: self.max_wait_duration,
                multiplier: self.backoff_multiplier,
            }
        } else {
            BackoffStrategy::Constant(self.wait_duration)
        };

        Some(RetryConfig {
            max_attempts: self.max_attempts,
            backoff,
            jitter: self.jitter.clamp(0.0, 1.0),
            retry_on_5xx: self.retry_on_5xx,
            ..RetryConfig::default()
        })
    }
}

/// Circuit breaker settings of one service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerProperties {
    /// Enable the breaker.
    pub enabled: bool,
    /// Window type.
    pub sliding_window_type: SlidingWindowType,
    /// Window size, in calls or seconds.
    pub sliding_window_size: u32,
    /// Calls required before rates are evaluated.
    pub minimum_number_of_calls: u32,
    /// Time to stay open.
    #[serde(deserialize_with = "parse_duration")]
    pub wait_duration_in_open_state: Duration,
    /// Calls taking at least this long are slow.
    #[serde(deserialize_with = "parse_duration")]
    pub slow_call_duration_threshold: Duration,
    /// Failure rate in percent that opens the breaker.
    pub failure_rate_threshold: f32,
    /// Slow-call rate in percent that opens the breaker.
    pub slow_call_rate_threshold: f32,
    /// Trial calls while half-open.
    pub permitted_number_of_calls_in_half_open_state: u32,
}

impl Default for CircuitBreakerProperties {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            enabled: true,
            sliding_window_type: defaults.sliding_window_type,
            sliding_window_size: defaults.sliding_window_size,
            minimum_number_of_calls: defaults.minimum_number_of_calls,
            wait_duration_in_open_state: defaults.wait_duration_in_open_state,
            slow_call_duration_threshold: defaults.slow_call_duration_threshold,
            failure_rate_threshold: defaults.failure_rate_threshold,
            slow_call_rate_threshold: defaults.slow_call_rate_threshold,
            permitted_number_of_calls_in_half_open_state: defaults
                .permitted_calls_in_half_open_state,
        }
    }
}

impl CircuitBreakerProperties {
    fn to_breaker_config(&self) -> Option<CircuitBreakerConfig> {
        self.enabled.then(|| CircuitBreakerConfig {
            failure_rate_threshold: self.failure_rate_threshold,
            slow_call_rate_threshold: self.slow_call_rate_threshold,
            slow_call_duration_threshold: self.slow_call_duration_threshold,
            sliding_window_type: self.sliding_window_type,
            sliding_window_size: self.sliding_window_size,
            minimum_number_of_calls: self.minimum_number_of_calls,
            wait_duration_in_open_state: self.wait_duration_in_open_state,
            permitted_calls_in_half_open_state: self.permitted_number_of_calls_in_half_open_state,
        })
    }
}

impl ServiceConfig {
    /// Runtime configuration of this service's client.
    pub fn to_client_config(&self) -> ClientConfig {
        let connection = ConnectionConfig {
            connect_timeout: self.connection.connect_timeout,
            request_timeout: self.connection.read_timeout + self.connection.write_timeout,
            pool_idle_timeout: self.connection.pool_idle_timeout,
            pool_max_idle_per_host: self.connection.pool_max_idle_per_host,
        };

        let mut builder = ClientConfig::builder()
            .connection(connection)
            .breaker_scope(self.breaker_scope);
        if let Some(base_url) = &self.base_url {
            builder = builder.base_url(base_url);
        }
        if let Some(timeout) = self.call_timeout {
            builder = builder.call_timeout(timeout);
        }
        if let Some(retry) = self.retry.to_retry_config() {
            builder = builder.retry(retry);
        }
        if let Some(breaker) = self.circuit_breaker.to_breaker_config() {
            builder = builder.circuit_breaker(breaker);
        }
        if self.propagate_auth_header {
            builder = builder.propagate_header(http::header::AUTHORIZATION.as_str());
        }
        for (name, value) in &self.default_headers {
            builder = builder.default_header(name, value);
        }
        builder.build()
    }

    fn validate(&self, name: &str) -> Result<()> {
        let fail = |message: String| RestClientError::config(format!("services.{name}: {message}"));

        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| fail("base_url is required".into()))?;
        parse_base_url(base_url).map_err(|e| fail(e.to_string()))?;

        if self.retry.enabled && self.retry.max_attempts == 0 {
            return Err(fail("retry.max_attempts must be at least 1".into()));
        }
        if let Some(breaker) = self.circuit_breaker.to_breaker_config() {
            breaker
                .validate()
                .map_err(|e| fail(format!("circuit_breaker: {e}")))?;
        }
        Ok(())
    }
}

impl RestClientsConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RestClientError::config(format!("failed to read {}: {e}", path.display()))
        })?;

        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(RestClientError::config(format!(
                "unsupported configuration format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// Parse TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RestClientError::config(format!("TOML parse error: {e}")))
    }

    /// Parse JSON.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| RestClientError::config(format!("JSON parse error: {e}")))
    }

    /// Load `.env` if present, then apply `REST_CLIENT_*` variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(RestClientError::config(format!("failed to load .env: {e}")));
        }
        self.apply_env_overrides_from(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs.
    ///
    /// Recognized: `REST_CLIENT_LOG_ENABLED`, `REST_CLIENT_LOG_LEVEL`,
    /// `REST_CLIENT_KEYCLOAK_BASE_URL`, `REST_CLIENT_KEYCLOAK_REALM` and
    /// `REST_CLIENT_SERVICES_<NAME>_BASE_URL`.
    pub fn apply_env_overrides_from<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let Some(key) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.into();

            match key {
                "LOG_ENABLED" => {
                    self.log.enabled = value.trim().parse().map_err(|_| {
                        RestClientError::config(format!(
                            "{ENV_PREFIX}LOG_ENABLED must be true or false, got '{value}'"
                        ))
                    })?;
                }
                "LOG_LEVEL" => self.log.level = HttpLogLevel::from(value),
                "KEYCLOAK_BASE_URL" => self.keycloak.base_url = Some(value),
                "KEYCLOAK_REALM" => self.keycloak.realm = Some(value),
                _ => {
                    if let Some(service) = key
                        .strip_prefix("SERVICES_")
                        .and_then(|rest| rest.strip_suffix("_BASE_URL"))
                    {
                        let name = self.service_key(service);
                        self.services.entry(name).or_default().base_url = Some(value);
                    }
                }
            }
        }
        Ok(())
    }

    fn service_key(&self, env_name: &str) -> String {
        let normalize = |name: &str| name.to_ascii_uppercase().replace(['-', '.'], "_");
        self.services
            .keys()
            .find(|name| normalize(name) == env_name)
            .cloned()
            .unwrap_or_else(|| env_name.to_ascii_lowercase())
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        if self.keycloak.enabled {
            let base_url = self.keycloak.base_url.as_deref().ok_or_else(|| {
                RestClientError::config("keycloak.base_url is required when keycloak is enabled")
            })?;
            parse_base_url(base_url)
                .map_err(|e| RestClientError::config(format!("keycloak.base_url: {e}")))?;
            if self.keycloak.realm.as_deref().is_none_or(str::is_empty) {
                return Err(RestClientError::config(
                    "keycloak.realm is required when keycloak is enabled",
                ));
            }
        }

        for (name, service) in &self.services {
            service.validate(name)?;
        }
        Ok(())
    }

    /// Settings of the named service.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }
}
