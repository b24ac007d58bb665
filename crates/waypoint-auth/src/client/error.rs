//! Outbound token acquisition errors.

use std::time::Duration;

use crate::error::AuthError;

/// Why a token request to the issuer failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientTokenError {
    /// No registration with this id.
    #[error("Unknown client registration: {0}")]
    UnknownRegistration(String),

    /// Connection or transport failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("Token request timed out after {0:?}")]
    Timeout(Duration),

    /// The issuer returned a 5xx.
    #[error("Issuer error: HTTP {status}")]
    Server {
        /// Status code.
        status: u16,
    },

    /// The issuer returned 429.
    #[error("Issuer rate limited the request")]
    RateLimited,

    /// The issuer rejected the request with an OAuth error.
    #[error("Token request rejected ({status}): {error}")]
    Rejected {
        /// Status code.
        status: u16,
        /// OAuth error code, or `http_<status>` when the body had none.
        error: String,
        /// Error description from the issuer.
        description: Option<String>,
    },

    /// The response body could not be parsed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}

impl ClientTokenError {
    /// Returns `true` if retrying may succeed.
    ///
    /// Network errors, timeouts, 5xx and 429 are transient. OAuth rejections
    /// and every other 4xx are permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Server { .. } | Self::RateLimited
        )
    }

    /// Wraps this error as [`AuthError::TokenAcquisitionFailed`].
    #[must_use]
    pub fn into_auth_error(self, registration_id: &str) -> AuthError {
        AuthError::token_acquisition_failed(registration_id, self.to_string())
    }
}

impl From<reqwest::Error> for ClientTokenError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClientTokenError::Network("reset".to_string()).is_transient());
        assert!(ClientTokenError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ClientTokenError::Server { status: 503 }.is_transient());
        assert!(ClientTokenError::RateLimited.is_transient());

        let rejected = ClientTokenError::Rejected {
            status: 401,
            error: "invalid_client".to_string(),
            description: None,
        };
        assert!(!rejected.is_transient());
        assert!(!ClientTokenError::InvalidResponse("x".to_string()).is_transient());
    }

    #[test]
    fn test_into_auth_error() {
        let err = ClientTokenError::Timeout(Duration::from_secs(2)).into_auth_error("bookings");
        assert!(matches!(
            &err,
            AuthError::TokenAcquisitionFailed { registration_id, .. } if registration_id == "bookings"
        ));
        assert_eq!(err.oauth_error_code(), "server_error");
    }
}
