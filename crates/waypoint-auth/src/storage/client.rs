//! Registered client storage trait.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::RegisteredClient;

/// Storage operations for registered clients.
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Find a client by its OAuth `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<RegisteredClient>>;

    /// Find a client by its internal id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: &str) -> AuthResult<Option<RegisteredClient>>;

    /// Insert or replace a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client fails validation or another client
    /// already uses the same `client_id`.
    async fn save(&self, client: RegisteredClient) -> AuthResult<()>;

    /// Remove a client by `client_id`. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete(&self, client_id: &str) -> AuthResult<bool>;
}
