//! Client token manager.
//!
//! Obtains outbound bearer tokens for service-to-service calls. Tokens are
//! cached per `(registration, principal)`; a cached token is served until it
//! enters the expiry skew window. Concurrent callers for a key with no fresh
//! entry coalesce into one request to the issuer.
//!
//! # Acquisition
//!
//! 1. Fresh cache entry: return it.
//! 2. Take the per-key lock and look again (another caller may have filled it).
//! 3. Stale entry with a refresh token: try the `refresh_token` grant.
//! 4. Service account: `client_credentials` with the registration's scopes.
//!
//! Principal entries only come from the login bridge, so a principal whose
//! refresh fails has to log in again.
//!
//! Each request is bounded by the configured timeout. Transient failures are
//! retried with exponential backoff; OAuth rejections fail fast.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::AuthResult;
use crate::client::cache::{AuthorizedClientCache, AuthorizedClientEntry, CacheKey};
use crate::client::endpoint::{Registration, TokenEndpoint};
use crate::client::error::ClientTokenError;
use crate::config::ClientConfig;
use crate::error::AuthError;
use crate::keyed_lock::KeyedLocks;
use crate::oauth::token::{TokenRequest, TokenResponse};

/// Timeout and retry settings for requests to the issuer.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry. Doubles on each retry.
    pub backoff: Duration,
    /// Upper bound for the delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
            backoff: config.retry_backoff,
            max_backoff: config.max_backoff,
        }
    }
}

/// Acquires, caches and refreshes outbound tokens.
pub struct ClientTokenManager {
    registrations: BTreeMap<String, Registration>,
    endpoint: Arc<dyn TokenEndpoint>,
    cache: AuthorizedClientCache,
    locks: KeyedLocks<CacheKey>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ClientTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTokenManager")
            .field("registrations", &self.registrations.keys().collect::<Vec<_>>())
            .field("cached", &self.cache.len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ClientTokenManager {
    /// Creates a manager with the registrations from `config`.
    ///
    /// Registrations without their own `token_uri` use `default_token_uri`.
    #[must_use]
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        config: &ClientConfig,
        default_token_uri: &str,
    ) -> Self {
        let registrations = config
            .registrations
            .iter()
            .map(|(id, registration)| {
                (
                    id.clone(),
                    Registration::from_config(id, registration, default_token_uri),
                )
            })
            .collect();

        Self {
            registrations,
            endpoint,
            cache: AuthorizedClientCache::new(config.expiry_skew),
            locks: KeyedLocks::new(),
            retry: RetryPolicy::from(config),
        }
    }

    /// Adds or replaces a registration.
    #[must_use]
    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registrations
            .insert(registration.id.clone(), registration);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Looks up a registration.
    #[must_use]
    pub fn registration(&self, registration_id: &str) -> Option<&Registration> {
        self.registrations.get(registration_id)
    }

    /// The authorized-client cache.
    #[must_use]
    pub fn cache(&self) -> &AuthorizedClientCache {
        &self.cache
    }

    /// Returns a service-account access token for `registration_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenAcquisitionFailed`] if the registration is
    /// unknown or the issuer could not be reached or refused the request.
    pub async fn acquire(&self, registration_id: &str) -> AuthResult<String> {
        self.acquire_key(CacheKey::service(registration_id)).await
    }

    /// Returns the access token `principal` holds under `registration_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] if the principal has no usable
    /// entry and its refresh token (if any) was rejected.
    pub async fn acquire_for(&self, registration_id: &str, principal: &str) -> AuthResult<String> {
        self.acquire_key(CacheKey::principal(registration_id, principal))
            .await
    }

    /// Caches a token obtained elsewhere (the login bridge's code exchange).
    pub fn store(
        &self,
        registration_id: &str,
        principal: Option<&str>,
        response: &TokenResponse,
    ) -> AuthorizedClientEntry {
        let key = match principal {
            Some(principal) => CacheKey::principal(registration_id, principal),
            None => CacheKey::service(registration_id),
        };
        self.insert(key, response, None)
    }

    /// Drops every cached entry of `principal`.
    pub fn evict_principal(&self, principal: &str) -> usize {
        let removed = self.cache.evict_principal(principal);
        tracing::debug!(removed, "Evicted authorized clients of principal");
        removed
    }

    /// Clears the cache.
    pub fn shutdown(&self) {
        tracing::debug!(entries = self.cache.len(), "Clearing authorized-client cache");
        self.cache.clear();
    }

    async fn acquire_key(&self, key: CacheKey) -> AuthResult<String> {
        if let Some(entry) = self.cache.get_fresh(&key) {
            return Ok(entry.access_token);
        }

        let registration = self
            .registrations
            .get(&key.registration_id)
            .ok_or_else(|| {
                ClientTokenError::UnknownRegistration(key.registration_id.clone())
                    .into_auth_error(&key.registration_id)
            })?;

        let _guard = self.locks.lock(&key).await;

        if let Some(entry) = self.cache.get_fresh(&key) {
            tracing::trace!(key = %key, "Token acquired by concurrent caller");
            return Ok(entry.access_token);
        }

        let stale_refresh = self.cache.get(&key).and_then(|entry| entry.refresh_token);
        if let Some(refresh_token) = stale_refresh {
            let request = TokenRequest::refresh(refresh_token.clone(), None);
            match self.request_with_retry(registration, &request).await {
                Ok(response) => {
                    tracing::debug!(key = %key, "Refreshed authorized client");
                    return Ok(self.insert(key, &response, Some(refresh_token)).access_token);
                }
                Err(err) => {
                    tracing::debug!(key = %key, error = %err, "Refresh failed");
                    self.cache.remove(&key);
                }
            }
        }

        if key.principal.is_some() {
            return Err(AuthError::unauthenticated(format!(
                "no authorized client for '{key}'"
            )));
        }

        let request = TokenRequest::client_credentials(registration.scope());
        let response = self
            .request_with_retry(registration, &request)
            .await
            .map_err(|err| err.into_auth_error(&registration.id))?;

        tracing::info!(
            registration_id = %registration.id,
            expires_in = response.expires_in,
            "Acquired client credentials token"
        );
        Ok(self.insert(key, &response, None).access_token)
    }

    fn insert(
        &self,
        key: CacheKey,
        response: &TokenResponse,
        previous_refresh: Option<String>,
    ) -> AuthorizedClientEntry {
        let mut entry = AuthorizedClientEntry::from_response(response, Instant::now());
        if entry.refresh_token.is_none() {
            entry.refresh_token = previous_refresh;
        }
        self.cache.insert(key, entry.clone());
        entry
    }

    async fn request_with_retry(
        &self,
        registration: &Registration,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ClientTokenError> {
        let mut backoff = self.retry.backoff;
        let mut attempt = 0;

        loop {
            let result = tokio::time::timeout(
                self.retry.request_timeout,
                self.endpoint.request_token(registration, request),
            )
            .await
            .unwrap_or(Err(ClientTokenError::Timeout(self.retry.request_timeout)));

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        registration_id = %registration.id,
                        attempt,
                        error = %err,
                        "Transient token request failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2).min(self.retry.max_backoff);
                }
                Err(err) => {
                    tracing::warn!(
                        registration_id = %registration.id,
                        grant_type = %request.grant_type,
                        transient = err.is_transient(),
                        error = %err,
                        "Token request failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}
