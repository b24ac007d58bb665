//! Error responses.
//!
//! Errors render as the OAuth 2.0 error body `{error, error_description}`.
//! 401 responses carry `WWW-Authenticate`: `Basic` for client
//! authentication failures at the token endpoint, `Bearer` otherwise. 403
//! responses carry `Bearer error="insufficient_scope"`.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::AuthError;
use crate::login::LoginError;
use crate::oauth::token::TokenErrorResponse;

/// Realm in `WWW-Authenticate` challenges.
pub const REALM: &str = "waypoint";

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = TokenErrorResponse {
            error: self.oauth_error_code().to_string(),
            error_description: Some(self.public_description()),
        };
        let mut response = (status, Json(body)).into_response();

        if let Some(challenge) = www_authenticate(&self)
            && let Ok(value) = HeaderValue::from_str(&challenge)
        {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

/// The `WWW-Authenticate` challenge for `error`, if it needs one.
#[must_use]
pub fn www_authenticate(error: &AuthError) -> Option<String> {
    match error {
        AuthError::InvalidClient { .. } => Some(format!("Basic realm=\"{REALM}\"")),
        AuthError::InvalidToken { .. }
        | AuthError::Unauthenticated { .. }
        | AuthError::InsufficientAuthority { .. } => Some(format!(
            "Bearer realm=\"{REALM}\", error=\"{}\", error_description=\"{}\"",
            error.oauth_error_code(),
            error.public_description().replace('"', "\\\"")
        )),
        _ => None,
    }
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR || status == StatusCode::BAD_GATEWAY {
            tracing::error!(error = %self, "Login failed");
        } else {
            tracing::debug!(error = %self, "Login rejected");
        }
        let error = match &self {
            Self::AuthorizationDenied { error, .. } => error.clone(),
            Self::InvalidIdToken(_) => "invalid_token".to_string(),
            Self::TokenExchange(_) => "token_exchange_failed".to_string(),
            Self::Configuration(_) | Self::Internal(_) => "server_error".to_string(),
            _ => "invalid_request".to_string(),
        };
        let body = TokenErrorResponse {
            error,
            error_description: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
