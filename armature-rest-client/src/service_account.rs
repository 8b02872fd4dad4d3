//! OAuth2 client-credentials tokens for endpoints that act as a service account.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::descriptor::ServiceAccount;
use crate::interceptor::Interceptor;
use crate::properties::{ClientCredentials, KeycloakConfig};
use crate::request::{bearer_auth, parse_base_url};
use crate::{HttpRequest, RestClientError, Result};

/// Tokens are refreshed this long before they expire.
const EXPIRY_BUFFER: Duration = Duration::from_secs(30);

/// An access token and its lifetime.
#[derive(Clone)]
pub struct AccessToken {
    /// The bearer token.
    pub token: String,
    /// Lifetime reported by the issuer.
    pub expires_in: Option<Duration>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Source of service-account tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a fresh token for `account`.
    async fn fetch_token(&self, account: &ServiceAccount) -> Result<AccessToken>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Fetches tokens from a Keycloak realm with the client-credentials grant.
#[derive(Debug, Clone)]
pub struct KeycloakTokenProvider {
    client: reqwest::Client,
    token_url: Url,
    credentials: BTreeMap<String, ClientCredentials>,
}

impl KeycloakTokenProvider {
    /// Create a provider for `realm` on the Keycloak at `base_url`.
    pub fn new(
        base_url: &str,
        realm: &str,
        credentials: BTreeMap<String, ClientCredentials>,
    ) -> Result<Self> {
        let token_url = parse_base_url(base_url)?
            .join(&format!(
                "realms/{}/protocol/openid-connect/token",
                urlencoding::encode(realm)
            ))
            .map_err(|e| RestClientError::config(format!("invalid Keycloak realm '{realm}': {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            token_url,
            credentials,
        })
    }

    /// Create a provider from the `keycloak` configuration section.
    pub fn from_config(config: &KeycloakConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| RestClientError::config("keycloak.base_url is required"))?;
        let realm = config
            .realm
            .as_deref()
            .ok_or_else(|| RestClientError::config("keycloak.realm is required"))?;
        Self::new(base_url, realm, config.credentials.clone())
    }

    /// Token endpoint URL.
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }
}

#[async_trait]
impl TokenProvider for KeycloakTokenProvider {
    async fn fetch_token(&self, account: &ServiceAccount) -> Result<AccessToken> {
        let credentials = self.credentials.get(&account.name).ok_or_else(|| {
            RestClientError::config(format!(
                "no Keycloak credentials for service account '{}'",
                account.name
            ))
        })?;

        info!(
            client_id = %credentials.client_id,
            scopes = ?account.scopes,
            "Requesting service account token"
        );

        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if !account.scopes.is_empty() {
            form.push(("scope", account.scopes.join(" ")));
        }

        let response = self
            .client
            .post(self.token_url.clone())
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if status != reqwest::StatusCode::OK {
            return Err(RestClientError::Authentication(format!(
                "token request for '{}' failed with {status}: {}",
                account.name,
                String::from_utf8_lossy(&body)
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            RestClientError::Authentication(format!("invalid token response: {e}"))
        })?;

        Ok(AccessToken {
            token: token.access_token,
            expires_in: token.expires_in.map(Duration::from_secs),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    header: String,
    valid_until: Instant,
}

/// Adds `Authorization: Bearer` to requests of endpoints with a service account.
///
/// Tokens are cached per account and scope set until shortly before they expire.
pub struct ServiceAccountInterceptor {
    provider: Arc<dyn TokenProvider>,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl ServiceAccountInterceptor {
    /// Create an interceptor fetching tokens from `provider`.
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn bearer_header(&self, account: &ServiceAccount) -> Result<String> {
        let key = account.cache_key();
        let now = Instant::now();

        {
            let mut cache = self.cache.lock();
            match cache.get(&key) {
                Some(cached) if cached.valid_until > now => return Ok(cached.header.clone()),
                Some(_) => {
                    debug!(account = %key, "Service account token expired");
                    cache.remove(&key);
                }
                None => {}
            }
        }

        let token = self.provider.fetch_token(account).await?;
        let header = bearer_auth(&token.token);

        if let Some(lifetime) = token.expires_in {
            let valid_for = lifetime.saturating_sub(EXPIRY_BUFFER);
            if !valid_for.is_zero() {
                self.cache.lock().insert(
                    key,
                    CachedToken {
                        header: header.clone(),
                        valid_until: Instant::now() + valid_for,
                    },
                );
            }
        }

        Ok(header)
    }
}

impl std::fmt::Debug for ServiceAccountInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountInterceptor")
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

#[async_trait]
impl Interceptor for ServiceAccountInterceptor {
    async fn intercept_request(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        let Some(account) = request
            .tag()
            .and_then(|tag| tag.endpoint.service_account())
            .cloned()
        else {
            return Ok(request);
        };

        let header = self.bearer_header(&account).await?;
        let mut value = http::HeaderValue::from_str(&header).map_err(|_| {
            RestClientError::Authentication("token is not a valid header value".into())
        })?;
        value.set_sensitive(true);
        request
            .headers_mut()
            .insert(http::header::AUTHORIZATION, value);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EndpointDescriptor;
    use crate::request::RequestTag;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProvider {
        calls: AtomicU32,
        lifetime: Option<Duration>,
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn fetch_token(&self, account: &ServiceAccount) -> Result<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken {
                token: format!("{}-{n}", account.cache_key()),
                expires_in: self.lifetime,
            })
        }
    }

    fn tagged(account: Option<ServiceAccount>) -> HttpRequest {
        let mut endpoint = EndpointDescriptor::get("list", "items");
        if let Some(account) = account {
            endpoint = endpoint.service_account(account);
        }
        HttpRequest::new(
            http::Method::GET,
            Url::parse("https://api.example.com/items").unwrap(),
        )
        .with_tag(RequestTag {
            service: Arc::from("items"),
            endpoint: Arc::new(endpoint.build()),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_are_cached_until_expiry() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            lifetime: Some(Duration::from_secs(60)),
        });
        let interceptor = ServiceAccountInterceptor::new(provider.clone());
        let account = ServiceAccount::new("billing").with_scopes(["read"]);

        let first = interceptor
            .intercept_request(tagged(Some(account.clone())))
            .await
            .unwrap();
        assert_eq!(first.header("authorization"), Some("Bearer billing#read-1"));

        interceptor
            .intercept_request(tagged(Some(account.clone())))
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // Refreshed 30s before the reported expiry.
        tokio::time::advance(Duration::from_secs(31)).await;
        let refreshed = interceptor
            .intercept_request(tagged(Some(account)))
            .await
            .unwrap();
        assert_eq!(refreshed.header("authorization"), Some("Bearer billing#read-2"));
    }

    #[tokio::test]
    async fn test_scopes_have_separate_tokens() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            lifetime: Some(Duration::from_secs(300)),
        });
        let interceptor = ServiceAccountInterceptor::new(provider.clone());

        interceptor
            .intercept_request(tagged(Some(ServiceAccount::new("billing"))))
            .await
            .unwrap();
        interceptor
            .intercept_request(tagged(Some(ServiceAccount::new("billing").with_scopes(["a"]))))
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_endpoints_without_account_untouched() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            lifetime: None,
        });
        let interceptor = ServiceAccountInterceptor::new(provider.clone());

        let request = interceptor.intercept_request(tagged(None)).await.unwrap();
        assert!(request.header("authorization").is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_keycloak_token_url() {
        let provider =
            KeycloakTokenProvider::new("https://sso.example.com/auth", "internal", BTreeMap::new())
                .unwrap();
        assert_eq!(
            provider.token_url().as_str(),
            "https://sso.example.com/auth/realms/internal/protocol/openid-connect/token"
        );
    }

    #[tokio::test]
    async fn test_unknown_account_is_configuration_error() {
        let provider =
            KeycloakTokenProvider::new("https://sso.example.com", "internal", BTreeMap::new())
                .unwrap();
        let err = provider
            .fetch_token(&ServiceAccount::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RestClientError::Configuration(_)));
    }
}
