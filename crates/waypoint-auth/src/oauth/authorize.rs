//! Authorization endpoint request validation and redirect building.
//!
//! Validation is split in two phases. Until the client and its exact
//! redirect URI are known to be valid, errors are shown to the user and never
//! redirected ([`AuthorizeRejection::Display`]). After that point every
//! error is sent back to the client as `error`/`error_description`/`state`
//! query parameters ([`AuthorizeRejection::Redirect`]).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::oauth::pkce::{PkceChallenge, require_s256};
use crate::types::{GrantType, RegisteredClient, parse_scope};

/// Query parameters of `GET /oauth2/authorize`.
///
/// Every field is optional on the wire so that missing parameters surface as
/// OAuth errors rather than extractor rejections.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizationRequest {
    /// Must be "code".
    #[serde(default)]
    pub response_type: Option<String>,

    /// Client identifier.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Exact-match redirect URI.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Requested scopes, space-delimited.
    #[serde(default)]
    pub scope: Option<String>,

    /// Opaque client state, echoed back.
    #[serde(default)]
    pub state: Option<String>,

    /// PKCE S256 challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,

    /// Must be "S256" when a challenge is sent.
    #[serde(default)]
    pub code_challenge_method: Option<String>,

    /// OpenID Connect nonce.
    #[serde(default)]
    pub nonce: Option<String>,
}

/// An authorization request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedAuthorizationRequest {
    /// Client id.
    pub client_id: String,
    /// Validated redirect URI.
    pub redirect_uri: String,
    /// Requested scopes (all allowed for the client).
    pub scopes: BTreeSet<String>,
    /// Client state.
    pub state: Option<String>,
    /// PKCE challenge, required for public clients.
    pub code_challenge: Option<String>,
    /// Nonce.
    pub nonce: Option<String>,
}

/// Why an authorization request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeRejection {
    /// Client or redirect URI could not be trusted: show an error page.
    Display {
        /// Message for the error page.
        message: String,
    },
    /// Report the error to the client via redirect.
    Redirect(AuthorizationError),
}

/// Validates `request` against the registered `client`.
///
/// # Errors
///
/// See [`AuthorizeRejection`].
pub fn validate_request(
    request: &AuthorizationRequest,
    client: &RegisteredClient,
) -> Result<ValidatedAuthorizationRequest, AuthorizeRejection> {
    let redirect_uri = match request.redirect_uri.as_deref() {
        Some(uri) if client.is_redirect_uri_allowed(uri) => uri.to_string(),
        Some(_) => {
            return Err(AuthorizeRejection::Display {
                message: "The redirect_uri is not registered for this client".to_string(),
            });
        }
        None => {
            return Err(AuthorizeRejection::Display {
                message: "Missing redirect_uri".to_string(),
            });
        }
    };

    let fail = |code: AuthorizationErrorCode, description: &str| {
        AuthorizeRejection::Redirect(AuthorizationError {
            redirect_uri: redirect_uri.clone(),
            error: code,
            error_description: Some(description.to_string()),
            state: request.state.clone(),
        })
    };

    if request.response_type.as_deref() != Some("code") {
        return Err(fail(
            AuthorizationErrorCode::UnsupportedResponseType,
            "Only response_type=code is supported",
        ));
    }

    if !client.is_grant_type_allowed(GrantType::AuthorizationCode) {
        return Err(fail(
            AuthorizationErrorCode::UnauthorizedClient,
            "Client may not use the authorization_code grant",
        ));
    }

    let scopes = parse_scope(request.scope.as_deref().unwrap_or_default());
    if scopes.is_empty() {
        return Err(fail(AuthorizationErrorCode::InvalidScope, "Missing scope"));
    }
    if !client.disallowed_scopes(&scopes).is_empty() {
        return Err(fail(
            AuthorizationErrorCode::InvalidScope,
            "Requested scope is not allowed for this client",
        ));
    }

    let code_challenge = match request.code_challenge.as_deref() {
        Some(challenge) => {
            if require_s256(request.code_challenge_method.as_deref().unwrap_or("plain")).is_err() {
                return Err(fail(
                    AuthorizationErrorCode::InvalidRequest,
                    "code_challenge_method must be S256",
                ));
            }
            if PkceChallenge::new(challenge.to_string()).is_err() {
                return Err(fail(
                    AuthorizationErrorCode::InvalidRequest,
                    "Malformed code_challenge",
                ));
            }
            Some(challenge.to_string())
        }
        None if !client.is_confidential() => {
            return Err(fail(
                AuthorizationErrorCode::InvalidRequest,
                "PKCE is required for public clients",
            ));
        }
        None => None,
    };

    Ok(ValidatedAuthorizationRequest {
        client_id: client.client_id.clone(),
        redirect_uri,
        scopes,
        state: request.state.clone(),
        code_challenge,
        nonce: request.nonce.clone(),
    })
}

/// Builds the success redirect `redirect_uri?code=...&state=...`.
///
/// # Errors
///
/// Returns an error if `redirect_uri` does not parse.
pub fn success_redirect(
    redirect_uri: &str,
    code: &str,
    state: Option<&str>,
) -> Result<String, url::ParseError> {
    let mut url = url::Url::parse(redirect_uri)?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("code", code);
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    Ok(url.to_string())
}

/// An error reported to the client via redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationError {
    /// Where to send the error.
    pub redirect_uri: String,
    /// Error code.
    pub error: AuthorizationErrorCode,
    /// Description.
    pub error_description: Option<String>,
    /// Echoed client state.
    pub state: Option<String>,
}

impl AuthorizationError {
    /// Builds `redirect_uri?error=...&error_description=...&state=...`.
    ///
    /// # Errors
    ///
    /// Returns an error if `redirect_uri` does not parse.
    pub fn to_redirect_url(&self) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(&self.redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("error", self.error.as_str());
            if let Some(description) = &self.error_description {
                pairs.append_pair("error_description", description);
            }
            if let Some(state) = &self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

/// Authorization endpoint error codes (RFC 6749 section 4.1.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationErrorCode {
    /// Missing or malformed parameter.
    InvalidRequest,
    /// Client may not use this flow.
    UnauthorizedClient,
    /// Resource owner denied the request.
    AccessDenied,
    /// Only `code` is supported.
    UnsupportedResponseType,
    /// Scope not allowed.
    InvalidScope,
    /// Unexpected failure.
    ServerError,
}

impl AuthorizationErrorCode {
    /// Wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
        }
    }
}

impl fmt::Display for AuthorizationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
