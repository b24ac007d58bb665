//! Issued-authorization storage trait.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::{Authorization, TokenKind};

/// Storage operations for [`Authorization`] records.
///
/// Lookups by token use the stored segment value: the SHA-256 digest for
/// codes and refresh tokens, the `jti` for access and ID tokens. Lookups
/// also match superseded segments kept in the record history, so a replayed
/// value still resolves to its record.
#[async_trait]
pub trait AuthorizationStorage: Send + Sync {
    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save(&self, authorization: Authorization) -> AuthResult<()>;

    /// Find a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: &str) -> AuthResult<Option<Authorization>>;

    /// Find the record holding a token segment of `kind` with `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_token(&self, value: &str, kind: TokenKind)
    -> AuthResult<Option<Authorization>>;

    /// Remove a record. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn remove(&self, id: &str) -> AuthResult<bool>;
}
