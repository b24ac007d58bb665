//! Registered client domain types.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TokenDefaults;

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow with PKCE.
    AuthorizationCode,
    /// Client Credentials flow (service-to-service).
    ClientCredentials,
    /// Refresh Token flow.
    RefreshToken,
    /// Resource Owner Password Credentials flow.
    /// Legacy; only for trusted first-party callers.
    Password,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::Password => "password",
        }
    }

    /// Parses the grant_type parameter value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            "password" => Some(Self::Password),
            _ => None,
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Token Settings
// =============================================================================

/// Per-client token lifetimes and refresh policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSettings {
    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,
    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_ttl: Duration,
    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_ttl: Duration,
    /// `true` keeps the refresh token across refreshes, `false` rotates it.
    pub reuse_refresh_tokens: bool,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self::from(&TokenDefaults::default())
    }
}

impl From<&TokenDefaults> for TokenSettings {
    fn from(defaults: &TokenDefaults) -> Self {
        Self {
            access_token_ttl: defaults.access_token_ttl,
            refresh_token_ttl: defaults.refresh_token_ttl,
            authorization_code_ttl: defaults.authorization_code_ttl,
            id_token_ttl: defaults.id_token_ttl,
            reuse_refresh_tokens: defaults.reuse_refresh_tokens,
        }
    }
}

// =============================================================================
// Registered Client
// =============================================================================

/// A client registered with the authorization server.
///
/// `client_secret_hash` is an Argon2id PHC string; the plaintext secret is
/// never stored. The `Debug` impl omits the hash.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredClient {
    /// Internal identifier.
    pub id: String,

    /// Client identifier used in OAuth flows. Unique.
    pub client_id: String,

    /// Argon2id hash of the client secret. `None` for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_hash: Option<String>,

    /// Human-readable display name.
    pub client_name: String,

    /// Grant types this client may use.
    pub grant_types: BTreeSet<GrantType>,

    /// Scopes this client may request.
    pub scopes: BTreeSet<String>,

    /// Exact-match redirect URIs for the authorization code flow.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Audience placed in tokens issued to this client. Defaults to the client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    /// Ask the resource owner to approve scopes before issuing a code.
    #[serde(default)]
    pub require_consent: bool,

    /// Token lifetimes and refresh policy.
    #[serde(default)]
    pub token_settings: TokenSettings,
}

impl fmt::Debug for RegisteredClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredClient")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret_hash",
                &self.client_secret_hash.as_ref().map(|_| "[REDACTED]"),
            )
            .field("client_name", &self.client_name)
            .field("grant_types", &self.grant_types)
            .field("scopes", &self.scopes)
            .field("redirect_uris", &self.redirect_uris)
            .field("audience", &self.audience)
            .field("require_consent", &self.require_consent)
            .field("token_settings", &self.token_settings)
            .finish()
    }
}

/// Errors from [`RegisteredClient::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    /// `client_id` is empty.
    #[error("client_id cannot be empty")]
    EmptyClientId,

    /// No grant types configured.
    #[error("at least one grant type is required")]
    NoGrantTypes,

    /// client_credentials without a secret.
    #[error("client_credentials requires a client secret")]
    MissingSecret,

    /// authorization_code without redirect URIs.
    #[error("authorization_code requires at least one redirect URI")]
    MissingRedirectUri,

    /// A redirect URI is not an absolute URL or carries a fragment.
    #[error("invalid redirect URI: {0}")]
    InvalidRedirectUri(String),
}

impl RegisteredClient {
    /// Creates a client with default token settings and a fresh internal id.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            client_secret_hash: None,
            client_name: client_name.into(),
            grant_types: BTreeSet::new(),
            scopes: BTreeSet::new(),
            redirect_uris: Vec::new(),
            audience: None,
            require_consent: false,
            token_settings: TokenSettings::default(),
        }
    }

    /// Validates the registration.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        if self.grant_types.is_empty() {
            return Err(ClientValidationError::NoGrantTypes);
        }

        if self.grant_types.contains(&GrantType::ClientCredentials)
            && self.client_secret_hash.is_none()
        {
            return Err(ClientValidationError::MissingSecret);
        }

        if self.grant_types.contains(&GrantType::AuthorizationCode) && self.redirect_uris.is_empty()
        {
            return Err(ClientValidationError::MissingRedirectUri);
        }

        for uri in &self.redirect_uris {
            match url::Url::parse(uri) {
                Ok(parsed) if parsed.fragment().is_none() => {}
                _ => return Err(ClientValidationError::InvalidRedirectUri(uri.clone())),
            }
        }

        Ok(())
    }

    /// Returns `true` if the client has a secret (confidential client).
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_secret_hash.is_some()
    }

    /// Checks an exact redirect URI match.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    /// Checks if the client may use the grant type.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Returns the scopes in `requested` that this client may not request.
    #[must_use]
    pub fn disallowed_scopes<'a>(&self, requested: &'a BTreeSet<String>) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|scope| !self.scopes.contains(*scope))
            .map(String::as_str)
            .collect()
    }

    /// Audience placed in tokens issued to this client.
    #[must_use]
    pub fn token_audience(&self) -> &str {
        self.audience.as_deref().unwrap_or(&self.client_id)
    }
}
