//! Authorization server metadata.
//!
//! The same document is served at `/.well-known/openid-configuration` and
//! `/.well-known/oauth-authorization-server`. Endpoint URLs derive from the
//! configured issuer, not from the bind address.

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::http::IssuerState;
use crate::types::GrantType;

/// Discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
}

impl DiscoveryDocument {
    /// Builds the document for `config`.
    #[must_use]
    pub fn build(config: &AuthConfig) -> Self {
        let strings = |values: &[&str]| values.iter().map(ToString::to_string).collect();
        Self {
            issuer: config.issuer_url().to_string(),
            authorization_endpoint: config.authorization_endpoint(),
            token_endpoint: config.token_endpoint(),
            jwks_uri: config.jwks_endpoint(),
            response_types_supported: strings(&["code"]),
            grant_types_supported: [
                GrantType::AuthorizationCode,
                GrantType::ClientCredentials,
                GrantType::RefreshToken,
                GrantType::Password,
            ]
            .iter()
            .map(|g| g.as_str().to_string())
            .collect(),
            subject_types_supported: strings(&["public"]),
            id_token_signing_alg_values_supported: vec![config.signing.algorithm.clone()],
            token_endpoint_auth_methods_supported: strings(&[
                "client_secret_basic",
                "client_secret_post",
                "none",
            ]),
            code_challenge_methods_supported: strings(&["S256"]),
            scopes_supported: strings(&["openid", "profile", "email"]),
        }
    }
}

/// `GET /.well-known/openid-configuration`.
pub async fn openid_configuration_handler(State(state): State<IssuerState>) -> impl IntoResponse {
    Json(DiscoveryDocument::build(&state.config))
}

/// `GET /.well-known/oauth-authorization-server`.
pub async fn authorization_server_metadata_handler(
    State(state): State<IssuerState>,
) -> impl IntoResponse {
    Json(DiscoveryDocument::build(&state.config))
}
