//! Consent storage trait.
//!
//! Consents let a principal skip the consent form on repeat authorizations
//! for the same client and a subset of previously approved scopes. Only the
//! authorization_code flow consults them.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;

/// Scopes a principal has approved for a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    /// Internal id of the registered client.
    pub registered_client_id: String,
    /// Username of the approving principal.
    pub principal_name: String,
    /// Approved scopes.
    pub scopes: BTreeSet<String>,
    /// Last update.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Consent {
    /// Returns `true` if every requested scope was approved.
    #[must_use]
    pub fn covers(&self, requested: &BTreeSet<String>) -> bool {
        requested.is_subset(&self.scopes)
    }
}

/// Storage operations for consents.
#[async_trait]
pub trait ConsentStorage: Send + Sync {
    /// Find the consent for a client and principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(
        &self,
        registered_client_id: &str,
        principal_name: &str,
    ) -> AuthResult<Option<Consent>>;

    /// Save a consent, merging with previously approved scopes.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save(
        &self,
        registered_client_id: &str,
        principal_name: &str,
        scopes: &BTreeSet<String>,
    ) -> AuthResult<()>;

    /// Revoke a consent. Returns `true` if one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke(&self, registered_client_id: &str, principal_name: &str) -> AuthResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consent_covers_subset() {
        let consent = Consent {
            registered_client_id: "c".to_string(),
            principal_name: "alice".to_string(),
            scopes: crate::types::parse_scope("openid profile backend.read"),
            updated_at: OffsetDateTime::now_utc(),
        };
        assert!(consent.covers(&crate::types::parse_scope("openid backend.read")));
        assert!(!consent.covers(&crate::types::parse_scope("openid backend.write")));
    }
}
