//! Remote JWKS fetching and caching.
//!
//! Resource servers verify tokens against the issuer's published key set.
//! [`JwksCache`] keeps one entry per JWKS URI with a TTL taken from the
//! response's `Cache-Control: max-age` (clamped to configured bounds), or the
//! configured default.
//!
//! Concurrent misses for the same URI coalesce into one fetch; other URIs are
//! never blocked. An unknown `kid` forces one refetch, rate-limited by
//! `min_refresh_interval` so a flood of bogus key ids cannot hammer the
//! issuer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use url::Url;

use crate::config::ValidatorConfig;
use crate::keyed_lock::KeyedLocks;

/// Configuration for [`JwksCache`].
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// TTL when the response carries no `max-age`.
    pub default_ttl: Duration,

    /// Lower bound for any TTL.
    pub min_ttl: Duration,

    /// Upper bound for any TTL.
    pub max_ttl: Duration,

    /// Minimum age of an entry before an unknown `kid` may force a refetch.
    pub min_refresh_interval: Duration,

    /// HTTP request timeout.
    pub request_timeout: Duration,

    /// Maximum response size in bytes.
    pub max_response_size: usize,

    /// Allow `http://` URIs. Testing only.
    pub allow_http: bool,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            min_ttl: Duration::from_secs(30),
            max_ttl: Duration::from_secs(86400),
            min_refresh_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl From<&ValidatorConfig> for JwksCacheConfig {
    fn from(config: &ValidatorConfig) -> Self {
        Self {
            default_ttl: config.jwks_ttl,
            min_ttl: config.jwks_ttl.min(Self::default().min_ttl),
            min_refresh_interval: config.jwks_min_refresh_interval,
            request_timeout: config.request_timeout,
            allow_http: config.allow_http,
            ..Self::default()
        }
    }
}

/// Errors that can occur during JWKS operations.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// Request failed or timed out.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Non-success status.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// Body is not a JWK Set.
    #[error("Failed to parse JWKS: {0}")]
    ParseError(String),

    /// No key with this id, even after a refetch.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The set holds no usable signing key.
    #[error("No signing keys found in JWKS")]
    NoSigningKeys,

    /// `http://` URI while HTTP is not allowed.
    #[error("Invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    /// Body exceeded the configured limit.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The limit.
        max_size: usize,
    },
}

#[derive(Debug)]
struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
    expires_at: Instant,
}

impl CachedJwks {
    fn find(&self, kid: &str) -> Option<(DecodingKey, Option<Algorithm>)> {
        self.jwks
            .keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
            .filter(|jwk| is_signing_key(jwk))
            .and_then(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .ok()
                    .map(|key| (key, jwk_algorithm(jwk)))
            })
    }
}

/// Per-URI JWKS cache.
pub struct JwksCache {
    http_client: reqwest::Client,
    entries: DashMap<String, Arc<CachedJwks>>,
    fetch_locks: KeyedLocks<String>,
    config: JwksCacheConfig,
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JwksCache {
    /// Creates a cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: JwksCacheConfig) -> Result<Self, JwksError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| JwksError::NetworkError(e.to_string()))?;
        Ok(Self::with_client(http_client, config))
    }

    /// Creates a cache around an existing HTTP client.
    #[must_use]
    pub fn with_client(http_client: reqwest::Client, config: JwksCacheConfig) -> Self {
        Self {
            http_client,
            entries: DashMap::new(),
            fetch_locks: KeyedLocks::new(),
            config,
        }
    }

    /// Decoding key for `kid`.
    ///
    /// Serves from cache when fresh; fetches on a miss or expiry; forces one
    /// refetch when the key id is unknown.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key is still unknown after the refetch, or the
    /// fetch error.
    pub async fn get_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Result<(DecodingKey, Option<Algorithm>), JwksError> {
        let cached = self.load(jwks_uri, false).await?;
        if let Some(found) = cached.find(kid) {
            return Ok(found);
        }

        tracing::debug!(%jwks_uri, kid, "Unknown key id, forcing JWKS refetch");
        let refreshed = self.load(jwks_uri, true).await?;
        refreshed
            .find(kid)
            .ok_or_else(|| JwksError::KeyNotFound(kid.to_string()))
    }

    /// Every signing key in the set, for tokens without a `kid`.
    ///
    /// # Errors
    ///
    /// `NoSigningKeys` if the set has none, or the fetch error.
    pub async fn signing_keys(
        &self,
        jwks_uri: &Url,
    ) -> Result<Vec<(DecodingKey, Option<Algorithm>)>, JwksError> {
        let cached = self.load(jwks_uri, false).await?;
        let keys: Vec<_> = cached
            .jwks
            .keys
            .iter()
            .filter(|jwk| is_signing_key(jwk))
            .filter_map(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .ok()
                    .map(|key| (key, jwk_algorithm(jwk)))
            })
            .collect();
        if keys.is_empty() {
            Err(JwksError::NoSigningKeys)
        } else {
            Ok(keys)
        }
    }

    /// Returns a usable entry, fetching if needed.
    ///
    /// With `force`, refetches unless another caller already did while we
    /// waited or the entry is younger than `min_refresh_interval`.
    async fn load(&self, jwks_uri: &Url, force: bool) -> Result<Arc<CachedJwks>, JwksError> {
        let key = normalize_uri(jwks_uri);
        let observed = self.entry(&key);
        if !force
            && let Some(cached) = &observed
            && Instant::now() < cached.expires_at
        {
            return Ok(Arc::clone(cached));
        }

        let _guard = self.fetch_locks.lock(&key).await;
        if let Some(current) = self.entry(&key) {
            let now = Instant::now();
            let replaced_while_waiting = observed
                .as_ref()
                .is_none_or(|seen| !Arc::ptr_eq(seen, &current));
            let reuse = if force {
                replaced_while_waiting
                    || now.duration_since(current.fetched_at) < self.config.min_refresh_interval
            } else {
                now < current.expires_at
            };
            if reuse {
                return Ok(current);
            }
        }

        let fetched = Arc::new(self.fetch(jwks_uri).await?);
        self.entries.insert(key, Arc::clone(&fetched));
        Ok(fetched)
    }

    fn entry(&self, key: &str) -> Option<Arc<CachedJwks>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    async fn fetch(&self, jwks_uri: &Url) -> Result<CachedJwks, JwksError> {
        self.validate_scheme(jwks_uri)?;
        tracing::debug!(%jwks_uri, "Fetching JWKS");

        let response = self
            .http_client
            .get(jwks_uri.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(%jwks_uri, error = %e, "Failed to fetch JWKS");
                JwksError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(JwksError::HttpError(response.status().as_u16()));
        }
        let max_size = self.config.max_response_size;
        if response
            .content_length()
            .is_some_and(|len| len as usize > max_size)
        {
            return Err(JwksError::ResponseTooLarge { max_size });
        }

        let ttl = self.ttl_from(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| JwksError::NetworkError(e.to_string()))?;
        if body.len() > max_size {
            return Err(JwksError::ResponseTooLarge { max_size });
        }
        let jwks: JwkSet = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(%jwks_uri, error = %e, "Failed to parse JWKS");
            JwksError::ParseError(e.to_string())
        })?;

        tracing::debug!(%jwks_uri, keys = jwks.keys.len(), ?ttl, "Cached JWKS");
        let now = Instant::now();
        Ok(CachedJwks {
            jwks,
            fetched_at: now,
            expires_at: now + ttl,
        })
    }

    fn validate_scheme(&self, uri: &Url) -> Result<(), JwksError> {
        match uri.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            _ => Err(JwksError::InvalidScheme),
        }
    }

    /// `max-age` from `Cache-Control`, clamped to `[min_ttl, max_ttl]`.
    fn ttl_from(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                value.split(',').find_map(|directive| {
                    directive
                        .trim()
                        .strip_prefix("max-age=")
                        .and_then(|seconds| seconds.parse::<u64>().ok())
                })
            })
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl)
            .clamp(self.config.min_ttl, self.config.max_ttl)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached URIs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_uri(uri: &Url) -> String {
    uri.as_str().trim_end_matches('/').to_string()
}

fn is_signing_key(jwk: &Jwk) -> bool {
    !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption))
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::token::jwt::{SigningAlgorithm, SigningKeyPair};
    use crate::token::keys::KeyRing;

    fn config() -> JwksCacheConfig {
        JwksCacheConfig {
            allow_http: true,
            min_refresh_interval: Duration::ZERO,
            ..JwksCacheConfig::default()
        }
    }

    fn ring() -> KeyRing {
        KeyRing::generate(SigningAlgorithm::RS256, Duration::from_secs(3600)).unwrap()
    }

    fn jwks_uri(server: &MockServer) -> Url {
        Url::parse(&format!("{}/oauth2/jwks", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_cached_key_is_served_without_refetch() {
        let server = MockServer::start().await;
        let ring = ring();
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ring.jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwksCache::new(config()).unwrap();
        let kid = ring.active().kid.clone();
        let (_, algorithm) = cache.get_key(&jwks_uri(&server), &kid).await.unwrap();
        assert_eq!(algorithm, Some(Algorithm::RS256));
        cache.get_key(&jwks_uri(&server), &kid).await.unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let server = MockServer::start().await;
        let ring = ring();
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ring.jwks())
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(JwksCache::new(config()).unwrap());
        let uri = jwks_uri(&server);
        let kid = ring.active().kid.clone();
        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let uri = uri.clone();
            let kid = kid.clone();
            handles.push(tokio::spawn(
                async move { cache.get_key(&uri, &kid).await.is_ok() },
            ));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_unknown_kid_forces_one_refetch() {
        let server = MockServer::start().await;
        let ring = ring();
        let first = ring.jwks();
        let old_kid = ring.active().kid.clone();
        let new_kid = ring.rotate().unwrap();

        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ring.jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwksCache::new(config()).unwrap();
        let uri = jwks_uri(&server);
        cache.get_key(&uri, &old_kid).await.unwrap();
        // not in the first set: one forced refetch finds it
        cache.get_key(&uri, &new_kid).await.unwrap();
    }

    #[tokio::test]
    async fn test_refetch_is_rate_limited() {
        let server = MockServer::start().await;
        let ring = ring();
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ring.jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwksCache::new(JwksCacheConfig {
            min_refresh_interval: Duration::from_secs(60),
            ..config()
        })
        .unwrap();
        let uri = jwks_uri(&server);
        for _ in 0..5 {
            let err = cache.get_key(&uri, "bogus").await.unwrap_err();
            assert!(matches!(err, JwksError::KeyNotFound(_)));
        }
    }

    #[tokio::test]
    async fn test_cache_control_max_age_is_clamped() {
        let cache = JwksCache::new(JwksCacheConfig {
            min_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(600),
            ..config()
        })
        .unwrap();
        let mut headers = reqwest::header::HeaderMap::new();

        headers.insert(
            reqwest::header::CACHE_CONTROL,
            "public, max-age=120".parse().unwrap(),
        );
        assert_eq!(cache.ttl_from(&headers), Duration::from_secs(120));

        headers.insert(reqwest::header::CACHE_CONTROL, "max-age=5".parse().unwrap());
        assert_eq!(cache.ttl_from(&headers), Duration::from_secs(60));

        headers.insert(
            reqwest::header::CACHE_CONTROL,
            "max-age=999999".parse().unwrap(),
        );
        assert_eq!(cache.ttl_from(&headers), Duration::from_secs(600));

        headers.clear();
        assert_eq!(cache.ttl_from(&headers), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_http_rejected_unless_allowed() {
        let cache = JwksCache::new(JwksCacheConfig::default()).unwrap();
        let uri = Url::parse("http://localhost:1/oauth2/jwks").unwrap();
        assert!(matches!(
            cache.get_key(&uri, "k").await,
            Err(JwksError::InvalidScheme)
        ));
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let cache = JwksCache::new(config()).unwrap();
        assert!(matches!(
            cache.get_key(&jwks_uri(&server), "k").await,
            Err(JwksError::HttpError(503))
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_ec_keys_are_usable() {
        let server = MockServer::start().await;
        let ring = KeyRing::new(
            SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap(),
            Duration::from_secs(60),
        );
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ring.jwks()))
            .mount(&server)
            .await;
        let cache = JwksCache::new(config()).unwrap();
        let keys = cache.signing_keys(&jwks_uri(&server)).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].1, Some(Algorithm::ES384));
    }
}
