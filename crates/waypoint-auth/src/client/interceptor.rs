//! Outbound HTTP client that attaches bearer tokens.

use std::sync::Arc;

use reqwest::{Method, RequestBuilder};

use crate::AuthResult;
use crate::client::manager::ClientTokenManager;
use crate::error::AuthError;

/// A `reqwest::Client` bound to one client registration.
///
/// Every request built through it first acquires a token from the
/// [`ClientTokenManager`]. If acquisition fails no request is built.
#[derive(Debug, Clone)]
pub struct AuthorizedClient {
    http_client: reqwest::Client,
    manager: Arc<ClientTokenManager>,
    registration_id: String,
    principal: Option<String>,
    base_url: String,
}

impl AuthorizedClient {
    /// Creates a client for the service account of `registration_id`.
    ///
    /// The base URL comes from the registration's `base_url` when configured.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        manager: Arc<ClientTokenManager>,
        registration_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            manager,
            registration_id: registration_id.into(),
            principal: None,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Acts on behalf of `principal` instead of the service account.
    #[must_use]
    pub fn for_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// The registration this client uses.
    #[must_use]
    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    /// Builds a request to `path` with the bearer token set.
    ///
    /// # Errors
    ///
    /// Returns the acquisition error; the request is not built.
    pub async fn request(&self, method: Method, path: &str) -> AuthResult<RequestBuilder> {
        let token = match &self.principal {
            Some(principal) => {
                self.manager
                    .acquire_for(&self.registration_id, principal)
                    .await?
            }
            None => self.manager.acquire(&self.registration_id).await?,
        };

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Ok(self.http_client.request(method, url).bearer_auth(token))
    }

    /// `GET path`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get(&self, path: &str) -> AuthResult<RequestBuilder> {
        self.request(Method::GET, path).await
    }

    /// `POST path`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn post(&self, path: &str) -> AuthResult<RequestBuilder> {
        self.request(Method::POST, path).await
    }

    /// `DELETE path`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn delete(&self, path: &str) -> AuthResult<RequestBuilder> {
        self.request(Method::DELETE, path).await
    }

    /// Sends `GET path` and decodes a JSON body.
    ///
    /// # Errors
    ///
    /// Returns the acquisition error, or `Internal` for transport and
    /// decoding failures of the downstream call.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> AuthResult<T> {
        let response = self
            .get(path)
            .await?
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AuthError::internal(format!("downstream call failed: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| AuthError::internal(format!("downstream response invalid: {e}")))
    }
}
