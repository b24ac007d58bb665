//! In-memory storage backend.
//!
//! `DashMap` shards give many concurrent readers and per-shard writers.
//! Nothing is persisted; a restart drops every record.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::{
    AuthorizationStorage, ClientStorage, Consent, ConsentStorage, PrincipalStorage,
};
use crate::types::{Authorization, Principal, RegisteredClient, TokenKind};

// =============================================================================
// Clients
// =============================================================================

/// Registered clients keyed by `client_id`.
#[derive(Debug, Default)]
pub struct InMemoryClientStorage {
    clients: DashMap<String, RegisteredClient>,
}

impl InMemoryClientStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStorage for InMemoryClientStorage {
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<RegisteredClient>> {
        Ok(self.clients.get(client_id).map(|entry| entry.clone()))
    }

    async fn find_by_id(&self, id: &str) -> AuthResult<Option<RegisteredClient>> {
        Ok(self
            .clients
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.clone()))
    }

    async fn save(&self, client: RegisteredClient) -> AuthResult<()> {
        client
            .validate()
            .map_err(|e| AuthError::storage(format!("Invalid client registration: {e}")))?;

        if let Some(existing) = self.clients.get(&client.client_id)
            && existing.id != client.id
        {
            return Err(AuthError::storage(format!(
                "Client '{}' already exists",
                client.client_id
            )));
        }

        tracing::debug!(client_id = %client.client_id, "Saved registered client");
        self.clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn delete(&self, client_id: &str) -> AuthResult<bool> {
        Ok(self.clients.remove(client_id).is_some())
    }
}

// =============================================================================
// Principals
// =============================================================================

/// Principals keyed by username.
#[derive(Debug, Default)]
pub struct InMemoryPrincipalStorage {
    principals: DashMap<String, Principal>,
}

impl InMemoryPrincipalStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalStorage for InMemoryPrincipalStorage {
    async fn find_by_username(&self, username: &str) -> AuthResult<Option<Principal>> {
        Ok(self.principals.get(username).map(|entry| entry.clone()))
    }

    async fn save(&self, principal: Principal) -> AuthResult<()> {
        self.principals.insert(principal.username.clone(), principal);
        Ok(())
    }

    async fn set_authorities(
        &self,
        username: &str,
        authorities: BTreeSet<String>,
    ) -> AuthResult<()> {
        let mut principal = self
            .principals
            .get_mut(username)
            .ok_or_else(|| AuthError::storage(format!("Unknown principal '{username}'")))?;
        principal.authorities = authorities;
        Ok(())
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> AuthResult<()> {
        let mut principal = self
            .principals
            .get_mut(username)
            .ok_or_else(|| AuthError::storage(format!("Unknown principal '{username}'")))?;
        principal.enabled = enabled;
        Ok(())
    }
}

// =============================================================================
// Authorizations
// =============================================================================

/// Authorization records keyed by id, with a secondary token index.
///
/// The index covers live and superseded segments so replays resolve.
#[derive(Debug, Default)]
pub struct InMemoryAuthorizationStorage {
    records: DashMap<String, Authorization>,
    token_index: DashMap<(TokenKind, String), String>,
}

impl InMemoryAuthorizationStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn index_keys(authorization: &Authorization) -> Vec<(TokenKind, String)> {
        let live = [
            TokenKind::AuthorizationCode,
            TokenKind::AccessToken,
            TokenKind::RefreshToken,
            TokenKind::IdToken,
        ]
        .into_iter()
        .filter_map(|kind| {
            authorization
                .segment(kind)
                .map(|segment| (kind, segment.value.clone()))
        });
        let history = authorization
            .history
            .iter()
            .map(|(kind, segment)| (*kind, segment.value.clone()));
        live.chain(history).collect()
    }

    /// Drops records whose every segment has expired.
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self, now: OffsetDateTime) -> usize {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|entry| {
                entry.state_at(now) == crate::types::AuthorizationState::Expired
                    && [
                        &entry.authorization_code,
                        &entry.access_token,
                        &entry.refresh_token,
                    ]
                    .into_iter()
                    .flatten()
                    .all(|segment| segment.is_expired(now))
            })
            .map(|entry| entry.id.clone())
            .collect();
        for id in &expired {
            if let Some((_, record)) = self.records.remove(id) {
                for key in Self::index_keys(&record) {
                    self.token_index.remove(&key);
                }
            }
        }
        expired.len()
    }
}

#[async_trait]
impl AuthorizationStorage for InMemoryAuthorizationStorage {
    async fn save(&self, authorization: Authorization) -> AuthResult<()> {
        for key in Self::index_keys(&authorization) {
            self.token_index.insert(key, authorization.id.clone());
        }
        self.records.insert(authorization.id.clone(), authorization);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> AuthResult<Option<Authorization>> {
        Ok(self.records.get(id).map(|entry| entry.clone()))
    }

    async fn find_by_token(
        &self,
        value: &str,
        kind: TokenKind,
    ) -> AuthResult<Option<Authorization>> {
        let Some(id) = self
            .token_index
            .get(&(kind, value.to_string()))
            .map(|entry| entry.clone())
        else {
            return Ok(None);
        };
        Ok(self.records.get(&id).map(|entry| entry.clone()))
    }

    async fn remove(&self, id: &str) -> AuthResult<bool> {
        let Some((_, record)) = self.records.remove(id) else {
            return Ok(false);
        };
        for key in Self::index_keys(&record) {
            self.token_index.remove(&key);
        }
        Ok(true)
    }
}

// =============================================================================
// Consents
// =============================================================================

/// Consents keyed by `(registered_client_id, principal_name)`.
#[derive(Debug, Default)]
pub struct InMemoryConsentStorage {
    consents: DashMap<(String, String), Consent>,
}

impl InMemoryConsentStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentStorage for InMemoryConsentStorage {
    async fn find(
        &self,
        registered_client_id: &str,
        principal_name: &str,
    ) -> AuthResult<Option<Consent>> {
        let key = (registered_client_id.to_string(), principal_name.to_string());
        Ok(self.consents.get(&key).map(|entry| entry.clone()))
    }

    async fn save(
        &self,
        registered_client_id: &str,
        principal_name: &str,
        scopes: &BTreeSet<String>,
    ) -> AuthResult<()> {
        let key = (registered_client_id.to_string(), principal_name.to_string());
        let now = OffsetDateTime::now_utc();
        self.consents
            .entry(key)
            .and_modify(|consent| {
                consent.scopes.extend(scopes.iter().cloned());
                consent.updated_at = now;
            })
            .or_insert_with(|| Consent {
                registered_client_id: registered_client_id.to_string(),
                principal_name: principal_name.to_string(),
                scopes: scopes.clone(),
                updated_at: now,
            });
        Ok(())
    }

    async fn revoke(&self, registered_client_id: &str, principal_name: &str) -> AuthResult<bool> {
        let key = (registered_client_id.to_string(), principal_name.to_string());
        Ok(self.consents.remove(&key).is_some())
    }
}
