//! Authorized-client cache.
//!
//! Entries are keyed by `(registration id, principal)`; service-account
//! entries have no principal. An entry is served while it is not within the
//! expiry skew window. Nothing is persisted.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::oauth::token::TokenResponse;
use crate::types::parse_scope;

/// Cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Client registration.
    pub registration_id: String,
    /// Principal name, `None` for the service account.
    pub principal: Option<String>,
}

impl CacheKey {
    /// Key for the service account of `registration_id`.
    #[must_use]
    pub fn service(registration_id: impl Into<String>) -> Self {
        Self {
            registration_id: registration_id.into(),
            principal: None,
        }
    }

    /// Key for `principal` under `registration_id`.
    #[must_use]
    pub fn principal(registration_id: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            registration_id: registration_id.into(),
            principal: Some(principal.into()),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.principal {
            Some(principal) => write!(f, "{}/{}", self.registration_id, principal),
            None => write!(f, "{}", self.registration_id),
        }
    }
}

/// A cached token.
#[derive(Clone)]
pub struct AuthorizedClientEntry {
    /// Access token.
    pub access_token: String,
    /// Refresh token, if the issuer sent one.
    pub refresh_token: Option<String>,
    /// Granted scopes.
    pub scopes: BTreeSet<String>,
    /// When the access token expires.
    pub expires_at: Instant,
}

impl fmt::Debug for AuthorizedClientEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedClientEntry")
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthorizedClientEntry {
    /// Builds an entry from a token response received at `received_at`.
    #[must_use]
    pub fn from_response(response: &TokenResponse, received_at: Instant) -> Self {
        Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            scopes: parse_scope(&response.scope),
            expires_at: received_at + Duration::from_secs(response.expires_in),
        }
    }

    /// Returns `true` if the token is still usable `skew` from `now`.
    #[must_use]
    pub fn is_fresh(&self, now: Instant, skew: Duration) -> bool {
        now + skew < self.expires_at
    }
}

/// In-memory authorized-client cache.
#[derive(Debug)]
pub struct AuthorizedClientCache {
    entries: DashMap<CacheKey, AuthorizedClientEntry>,
    skew: Duration,
}

impl AuthorizedClientCache {
    /// Creates an empty cache treating tokens within `skew` of expiry as expired.
    #[must_use]
    pub fn new(skew: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            skew,
        }
    }

    /// The expiry skew.
    #[must_use]
    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// The entry for `key` if it is fresh.
    #[must_use]
    pub fn get_fresh(&self, key: &CacheKey) -> Option<AuthorizedClientEntry> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(now, self.skew))
            .map(|entry| entry.value().clone())
    }

    /// The entry for `key`, fresh or not.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<AuthorizedClientEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Stores `entry` under `key`.
    pub fn insert(&self, key: CacheKey, entry: AuthorizedClientEntry) {
        self.entries.insert(key, entry);
    }

    /// Removes the entry for `key`.
    pub fn remove(&self, key: &CacheKey) -> Option<AuthorizedClientEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Removes every entry of `principal`. Returns how many were removed.
    pub fn evict_principal(&self, principal: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| key.principal.as_deref() != Some(principal));
        before.saturating_sub(self.entries.len())
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(expires_in: Duration) -> AuthorizedClientEntry {
        AuthorizedClientEntry {
            access_token: "t".to_string(),
            refresh_token: None,
            scopes: BTreeSet::new(),
            expires_at: Instant::now() + expires_in,
        }
    }

    #[test]
    fn test_skew_window_hides_entry() {
        let cache = AuthorizedClientCache::new(Duration::from_secs(60));
        let key = CacheKey::service("bookings");

        cache.insert(key.clone(), entry(Duration::from_secs(30)));
        assert!(cache.get_fresh(&key).is_none());
        assert!(cache.get(&key).is_some());

        cache.insert(key.clone(), entry(Duration::from_secs(300)));
        assert!(cache.get_fresh(&key).is_some());
    }

    #[test]
    fn test_evict_principal_only_touches_that_principal() {
        let cache = AuthorizedClientCache::new(Duration::ZERO);
        let long = Duration::from_secs(300);
        cache.insert(CacheKey::service("bookings"), entry(long));
        cache.insert(CacheKey::principal("bookings", "alice"), entry(long));
        cache.insert(CacheKey::principal("customers", "alice"), entry(long));
        cache.insert(CacheKey::principal("bookings", "bob"), entry(long));

        assert_eq!(cache.evict_principal("alice"), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&CacheKey::service("bookings")).is_some());
    }

    #[test]
    fn test_entry_from_response() {
        let response = TokenResponse::new("secret-access".to_string(), 120, "x y".to_string())
            .with_refresh_token(Some("r".to_string()));
        let now = Instant::now();
        let entry = AuthorizedClientEntry::from_response(&response, now);
        assert_eq!(entry.expires_at, now + Duration::from_secs(120));
        assert_eq!(entry.scopes.len(), 2);
        assert!(!format!("{entry:?}").contains("secret-access"));
    }
}
