//! Interactive browser login against the issuer.

pub mod bridge;
pub mod session;
pub mod state;

use axum::http::StatusCode;

use crate::client::error::ClientTokenError;

pub use bridge::{CallbackParams, CompletedLogin, LoginBridge, LoginRedirect};
pub use session::{LoginSession, SessionStore};
pub use state::{AuthorizationRequestState, StateCodec};

/// Login flow failures.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// The callback arrived without a state cookie.
    #[error("Missing login state")]
    MissingState,

    /// The state cookie failed verification.
    #[error("Invalid login state")]
    InvalidState,

    /// The state cookie has expired.
    #[error("Login state expired")]
    StateExpired,

    /// The returned `state` does not match the cookie.
    #[error("Login state mismatch")]
    StateMismatch,

    /// The callback carried no code.
    #[error("Missing authorization code")]
    MissingCode,

    /// The issuer redirected back with an error.
    #[error("Authorization failed: {error}")]
    AuthorizationDenied {
        /// OAuth error code.
        error: String,
        /// Error description.
        description: Option<String>,
    },

    /// The code exchange failed.
    #[error("Code exchange failed: {0}")]
    TokenExchange(#[from] ClientTokenError),

    /// The ID token was missing or invalid.
    #[error("Invalid ID token: {0}")]
    InvalidIdToken(String),

    /// Bad login configuration.
    #[error("Login configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal failure.
    #[error("Internal login error: {0}")]
    Internal(String),
}

impl LoginError {
    /// HTTP status for the callback response.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidIdToken(_) => StatusCode::UNAUTHORIZED,
            Self::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
            Self::TokenExchange(err) if err.is_transient() => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
