//! Signing key ring with rotation.
//!
//! Exactly one key is active for signing. Rotation generates a new active key
//! and retires the previous one; retired keys remain published in the JWKS
//! (so tokens they signed keep validating) until the retention window has
//! elapsed, then [`KeyRing::prune`] drops them.
//!
//! Readers load an immutable snapshot through `ArcSwap`; writers build a new
//! snapshot and swap it in.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use jsonwebtoken::{Algorithm, DecodingKey};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::token::jwt::{Jwks, JwtError, SigningAlgorithm, SigningKeyPair};

#[derive(Debug, Clone)]
struct RetiredKey {
    key: Arc<SigningKeyPair>,
    retired_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
struct KeySet {
    active: Arc<SigningKeyPair>,
    retired: Vec<RetiredKey>,
}

/// The issuer's signing keys.
#[derive(Debug)]
pub struct KeyRing {
    keys: ArcSwap<KeySet>,
    retention: Duration,
}

impl KeyRing {
    /// Creates a ring with `initial` as the active key.
    #[must_use]
    pub fn new(initial: SigningKeyPair, retention: Duration) -> Self {
        Self {
            keys: ArcSwap::from_pointee(KeySet {
                active: Arc::new(initial),
                retired: Vec::new(),
            }),
            retention,
        }
    }

    /// Creates a ring with a freshly generated key.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate(algorithm: SigningAlgorithm, retention: Duration) -> Result<Self, JwtError> {
        Ok(Self::new(SigningKeyPair::generate(algorithm)?, retention))
    }

    /// The key currently used for signing.
    #[must_use]
    pub fn active(&self) -> Arc<SigningKeyPair> {
        Arc::clone(&self.keys.load().active)
    }

    /// Makes `key` the active key and retires the previous one.
    pub fn install(&self, key: SigningKeyPair) {
        let key = Arc::new(key);
        let now = OffsetDateTime::now_utc();
        self.keys.rcu(|current| {
            let mut retired = current.retired.clone();
            retired.push(RetiredKey {
                key: Arc::clone(&current.active),
                retired_at: now,
            });
            KeySet {
                active: Arc::clone(&key),
                retired,
            }
        });
        tracing::info!(kid = %key.kid, algorithm = %key.algorithm, "Activated signing key");
    }

    /// Generates a key with the active key's algorithm and installs it.
    ///
    /// Returns the new `kid`.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn rotate(&self) -> Result<String, JwtError> {
        let algorithm = self.active().algorithm;
        let key = SigningKeyPair::generate(algorithm)?;
        let kid = key.kid.clone();
        self.install(key);
        Ok(kid)
    }

    /// Drops retired keys older than the retention window.
    ///
    /// Returns the number of keys pruned.
    pub fn prune(&self, now: OffsetDateTime) -> usize {
        let retention = self.retention;
        let before = self.keys.load().retired.len();
        self.keys.rcu(|current| KeySet {
            active: Arc::clone(&current.active),
            retired: current
                .retired
                .iter()
                .filter(|retired| retired.retired_at + retention > now)
                .cloned()
                .collect(),
        });
        let pruned = before.saturating_sub(self.keys.load().retired.len());
        if pruned > 0 {
            tracing::info!(pruned, "Pruned retired signing keys");
        }
        pruned
    }

    /// Public keys of the active and every retained key.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        let keys = self.keys.load();
        Jwks {
            keys: std::iter::once(&keys.active)
                .chain(keys.retired.iter().map(|retired| &retired.key))
                .map(|key| key.to_jwk())
                .collect(),
        }
    }

    /// Verification key and algorithm for `kid`, if it is still published.
    #[must_use]
    pub fn decoding_key(&self, kid: &str) -> Option<(DecodingKey, Algorithm)> {
        let keys = self.keys.load();
        std::iter::once(&keys.active)
            .chain(keys.retired.iter().map(|retired| &retired.key))
            .find(|key| key.kid == kid)
            .map(|key| {
                (
                    key.decoding_key().clone(),
                    key.algorithm.to_jwt_algorithm(),
                )
            })
    }

    /// Rotates every `interval` and prunes expired keys, until aborted.
    pub fn spawn_rotation(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.rotate() {
                    tracing::error!(error = %e, "Signing key rotation failed");
                }
                self.prune(OffsetDateTime::now_utc());
            }
        })
    }
}
