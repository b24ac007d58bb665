//! Client authentication at the token endpoint.
//!
//! Supports `client_secret_basic` (preferred), `client_secret_post`, and
//! public clients identified by `client_id` alone (authorization_code with
//! PKCE only).

use crate::AuthResult;
use crate::error::AuthError;

/// Credentials presented by a client.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Client id.
    pub client_id: String,
    /// Secret, absent for public clients.
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ClientCredentials {
    /// Confidential client credentials.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
        }
    }

    /// Resolves credentials from the `Authorization` header or the form body.
    ///
    /// # Errors
    ///
    /// `InvalidClient` if the Basic header is malformed, both methods are
    /// used at once, or no client id is present.
    pub fn resolve(
        authorization_header: Option<&str>,
        form_client_id: Option<&str>,
        form_client_secret: Option<&str>,
    ) -> AuthResult<Self> {
        if let Some(header) = authorization_header {
            let (client_id, client_secret) = parse_basic_auth(header)
                .ok_or_else(|| AuthError::invalid_client("Malformed Basic authorization"))?;
            if form_client_secret.is_some() {
                return Err(AuthError::invalid_client(
                    "Multiple client authentication methods",
                ));
            }
            if form_client_id.is_some_and(|id| id != client_id) {
                return Err(AuthError::invalid_client("client_id mismatch"));
            }
            return Ok(Self::new(client_id, client_secret));
        }

        match form_client_id {
            Some(client_id) if !client_id.is_empty() => Ok(Self {
                client_id: client_id.to_string(),
                client_secret: form_client_secret.map(ToString::to_string),
            }),
            _ => Err(AuthError::invalid_client("Client authentication required")),
        }
    }
}

/// Parses `Basic base64(client_id:client_secret)`.
#[must_use]
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header_value.trim().strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    // the secret may contain colons
    let (client_id, client_secret) = credentials.split_once(':')?;
    Some((client_id.to_string(), client_secret.to_string()))
}
