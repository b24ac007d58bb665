//! Principal storage trait.
//!
//! There is deliberately no delete: principals referenced by live tokens
//! must keep resolving. Disable them instead.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::Principal;

/// Storage operations for principals and their authorities.
#[async_trait]
pub trait PrincipalStorage: Send + Sync {
    /// Find a principal by username.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_username(&self, username: &str) -> AuthResult<Option<Principal>>;

    /// Insert or replace a principal (provisioning).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save(&self, principal: Principal) -> AuthResult<()>;

    /// Replace the authority set of an existing principal.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the principal does not exist.
    async fn set_authorities(&self, username: &str, authorities: BTreeSet<String>)
    -> AuthResult<()>;

    /// Enable or disable an existing principal.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the principal does not exist.
    async fn set_enabled(&self, username: &str, enabled: bool) -> AuthResult<()>;
}
