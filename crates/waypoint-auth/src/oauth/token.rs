//! Token endpoint wire types.
//!
//! The same types are used by the issuer (serializing) and by the client
//! token manager and login bridge (deserializing issuer responses).

use serde::{Deserialize, Serialize};

/// Form body of `POST /oauth2/token`.
///
/// Which fields are required depends on `grant_type`:
///
/// - `client_credentials`: optional `scope`
/// - `authorization_code`: `code`, `redirect_uri`, `code_verifier`
/// - `refresh_token`: `refresh_token`, optional narrowing `scope`
/// - `password`: `username`, `password`, optional `scope`
///
/// Client credentials come from the Basic header or from
/// `client_id`/`client_secret` in the body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    #[serde(default)]
    pub grant_type: String,

    /// Authorization code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Redirect URI bound to the code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// PKCE code verifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,

    /// Client id (client_secret_post or public clients).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Client secret (client_secret_post).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Requested scope, space-delimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Resource owner username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Resource owner password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl TokenRequest {
    /// A client_credentials request for `scope`.
    #[must_use]
    pub fn client_credentials(scope: Option<String>) -> Self {
        Self {
            grant_type: "client_credentials".to_string(),
            scope,
            ..Self::default()
        }
    }

    /// A refresh_token request.
    #[must_use]
    pub fn refresh(refresh_token: impl Into<String>, scope: Option<String>) -> Self {
        Self {
            grant_type: "refresh_token".to_string(),
            refresh_token: Some(refresh_token.into()),
            scope,
            ..Self::default()
        }
    }

    /// An authorization_code exchange.
    #[must_use]
    pub fn authorization_code(
        code: impl Into<String>,
        redirect_uri: impl Into<String>,
        code_verifier: impl Into<String>,
    ) -> Self {
        Self {
            grant_type: "authorization_code".to_string(),
            code: Some(code.into()),
            redirect_uri: Some(redirect_uri.into()),
            code_verifier: Some(code_verifier.into()),
            ..Self::default()
        }
    }
}

/// Successful token response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed access token.
    pub access_token: String,

    /// Always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scopes, space-delimited.
    #[serde(default)]
    pub scope: String,

    /// Refresh token, when the client may refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token, when `openid` was granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Creates a bearer response.
    #[must_use]
    pub fn new(access_token: String, expires_in: u64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            refresh_token: None,
            id_token: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = token;
        self
    }

    /// Sets the ID token.
    #[must_use]
    pub fn with_id_token(mut self, token: Option<String>) -> Self {
        self.id_token = token;
        self
    }
}

/// OAuth 2.0 error body (RFC 6749 section 5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    /// Error code such as `invalid_grant`.
    pub error: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}
