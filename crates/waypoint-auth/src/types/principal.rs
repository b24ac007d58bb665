//! Principals (resource owners and service accounts) and their authorities.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix marking an authority as a role.
pub const ROLE_PREFIX: &str = "ROLE_";

/// A user or service account that tokens are issued for.
///
/// Principals are created at provisioning time and only mutated by
/// administrative operations. The `Debug` impl omits the password hash.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Internal identifier.
    pub id: String,

    /// Login name, used as the token subject.
    pub username: String,

    /// Argon2id hash of the password. `None` for service accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    /// Account may authenticate.
    pub enabled: bool,

    /// Account is not locked.
    pub account_non_locked: bool,

    /// Password has not expired.
    pub credentials_non_expired: bool,

    /// Granted authorities, e.g. `ROLE_ADMIN`.
    pub authorities: BTreeSet<String>,

    /// Email address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("enabled", &self.enabled)
            .field("account_non_locked", &self.account_non_locked)
            .field("credentials_non_expired", &self.credentials_non_expired)
            .field("authorities", &self.authorities)
            .finish_non_exhaustive()
    }
}

impl Principal {
    /// Creates an enabled user principal.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            password_hash: None,
            enabled: true,
            account_non_locked: true,
            credentials_non_expired: true,
            authorities: BTreeSet::new(),
            email: None,
            name: None,
        }
    }

    /// Service-account view of a client: the authorities are the granted scopes.
    #[must_use]
    pub fn service_account(client_id: &str, scopes: &BTreeSet<String>) -> Self {
        Self {
            id: client_id.to_string(),
            authorities: scopes.clone(),
            ..Self::new(client_id)
        }
    }

    /// Adds authorities.
    #[must_use]
    pub fn with_authorities<I, S>(mut self, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorities
            .extend(authorities.into_iter().map(Into::into));
        self
    }

    /// Returns `true` if the principal may authenticate right now.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.enabled && self.account_non_locked && self.credentials_non_expired
    }

    /// Authorities carrying the role prefix.
    pub fn roles(&self) -> impl Iterator<Item = &String> {
        self.authorities
            .iter()
            .filter(|authority| authority.starts_with(ROLE_PREFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_filter_prefix() {
        let principal =
            Principal::new("alice").with_authorities(["ROLE_ADMIN", "backend.read", "ROLE_USER"]);
        let roles: Vec<_> = principal.roles().cloned().collect();
        assert_eq!(roles, vec!["ROLE_ADMIN", "ROLE_USER"]);
    }

    #[test]
    fn test_usable_flags() {
        let mut principal = Principal::new("bob");
        assert!(principal.is_usable());
        principal.account_non_locked = false;
        assert!(!principal.is_usable());
    }

    #[test]
    fn test_service_account_uses_scopes() {
        let scopes = crate::types::parse_scope("backend.read");
        let principal = Principal::service_account("test-client", &scopes);
        assert_eq!(principal.username, "test-client");
        assert!(principal.authorities.contains("backend.read"));
        assert_eq!(principal.roles().count(), 0);
    }

    #[test]
    fn test_debug_hides_password_hash() {
        let mut principal = Principal::new("carol");
        principal.password_hash = Some("$argon2id$secret".to_string());
        assert!(!format!("{principal:?}").contains("argon2id"));
    }
}
