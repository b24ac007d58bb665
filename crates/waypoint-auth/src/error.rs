//! Authentication and authorization error types.
//!
//! Every failure in the trust chain maps onto one variant of [`AuthError`].
//! The variant decides the HTTP status and the OAuth 2.0 error code; the
//! message is for logs and is only echoed to callers where that is safe
//! (issuance errors), never for token validation failures.

use std::fmt;

use axum::http::StatusCode;

/// Errors that can occur while issuing, validating, or propagating tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown client id or bad client secret.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The client is registered but not permitted to use the grant type.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of the grant restriction.
        message: String,
    },

    /// The requested scope is not a subset of the allowed scopes.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// Bad or expired authorization code, refresh token, or resource-owner credentials.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The request is missing a parameter or is otherwise malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// The grant type is not supported by this issuer.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The presented bearer token was rejected.
    ///
    /// The message carries the rejection reason for logs only. Responses
    /// always use a fixed description.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Internal rejection reason.
        message: String,
    },

    /// No credential was presented where one is required.
    #[error("Authentication required: {message}")]
    Unauthenticated {
        /// Description of what was missing.
        message: String,
    },

    /// The caller is authenticated but holds none of the required authorities.
    #[error("Insufficient authority: {message}")]
    InsufficientAuthority {
        /// Description of the failed requirement.
        message: String,
    },

    /// The resource owner denied the authorization request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of the denial.
        message: String,
    },

    /// A service could not obtain its own outbound token.
    #[error("Token acquisition failed for registration '{registration_id}': {message}")]
    TokenAcquisitionFailed {
        /// Client registration the token was requested for.
        registration_id: String,
        /// Underlying cause.
        message: String,
    },

    /// Storage backend failure.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthenticated` error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Creates a new `InsufficientAuthority` error.
    #[must_use]
    pub fn insufficient_authority(message: impl Into<String>) -> Self {
        Self::InsufficientAuthority {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `TokenAcquisitionFailed` error.
    #[must_use]
    pub fn token_acquisition_failed(
        registration_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TokenAcquisitionFailed {
            registration_id: registration_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::TokenAcquisitionFailed { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidClient { .. }
            | Self::InvalidGrant { .. }
            | Self::Unauthenticated { .. } => ErrorCategory::Authentication,
            Self::UnauthorizedClient { .. }
            | Self::InvalidScope { .. }
            | Self::InsufficientAuthority { .. }
            | Self::AccessDenied { .. } => ErrorCategory::Authorization,
            Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::InvalidRequest { .. } | Self::UnsupportedGrantType { .. } => {
                ErrorCategory::Validation
            }
            Self::TokenAcquisitionFailed { .. } => ErrorCategory::Propagation,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidClient { .. } => "invalid_client",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::InvalidToken { .. } | Self::Unauthenticated { .. } => "invalid_token",
            Self::InsufficientAuthority { .. } => "insufficient_scope",
            Self::AccessDenied { .. } => "access_denied",
            Self::TokenAcquisitionFailed { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the HTTP status this error is surfaced as.
    ///
    /// `invalid_client` is 401 at the token endpoint, every other issuance
    /// error is 400. Missing or rejected bearer tokens are 401 and a valid
    /// token lacking authority is 403.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClient { .. }
            | Self::InvalidToken { .. }
            | Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::UnauthorizedClient { .. }
            | Self::InvalidScope { .. }
            | Self::InvalidGrant { .. }
            | Self::InvalidRequest { .. }
            | Self::UnsupportedGrantType { .. } => StatusCode::BAD_REQUEST,
            Self::InsufficientAuthority { .. } | Self::AccessDenied { .. } => {
                StatusCode::FORBIDDEN
            }
            Self::TokenAcquisitionFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the description that may be shown to the caller.
    ///
    /// Token validation and server-side failures collapse to fixed strings.
    #[must_use]
    pub fn public_description(&self) -> String {
        match self {
            Self::InvalidToken { .. } => "The access token is invalid".to_string(),
            Self::Unauthenticated { .. } => "Full authentication is required".to_string(),
            Self::InsufficientAuthority { .. } => {
                "The request requires higher privileges than provided by the access token"
                    .to_string()
            }
            Self::TokenAcquisitionFailed { .. } => "Upstream authorization failed".to_string(),
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "Internal server error".to_string()
            }
            Self::UnsupportedGrantType { grant_type } => {
                format!("Unsupported grant type: {grant_type}")
            }
            Self::InvalidClient { message }
            | Self::UnauthorizedClient { message }
            | Self::InvalidScope { message }
            | Self::InvalidGrant { message }
            | Self::InvalidRequest { message }
            | Self::AccessDenied { message } => message.clone(),
        }
    }
}

/// Categories of authentication/authorization errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity verification failures.
    Authentication,
    /// Permission checks.
    Authorization,
    /// Bearer token validation.
    Token,
    /// Request validation.
    Validation,
    /// Outbound token acquisition.
    Propagation,
    /// Storage.
    Infrastructure,
    /// Configuration.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Token => write!(f, "token"),
            Self::Validation => write!(f, "validation"),
            Self::Propagation => write!(f, "propagation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
