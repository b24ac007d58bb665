//! Authentication and authorization configuration.
//!
//! Each component of the trust chain reads one subsection: the issuer uses
//! [`SigningConfig`] and [`TokenDefaults`], resource servers use
//! [`ValidatorConfig`] and [`PolicyConfig`], outbound calls use
//! [`ClientConfig`], and the browser edge uses [`LoginConfig`].
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! issuer = "http://localhost:9000"
//!
//! [auth.tokens]
//! access_token_ttl = "5m"
//!
//! [auth.client.registrations.bookings]
//! client_id = "customer-service"
//! client_secret = "customer-secret"
//! scopes = ["backend.read"]
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::{PolicyRule, Requirement};

/// Root authentication and authorization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL placed in the `iss` claim and used to derive endpoint URLs.
    pub issuer: String,

    /// Serve the authorization server endpoints (`/oauth2/*`, discovery).
    pub authorization_server: bool,

    /// Token signing configuration.
    pub signing: SigningConfig,

    /// Token lifetimes applied to clients that do not override them.
    pub tokens: TokenDefaults,

    /// Bearer token validation for this service's protected API.
    pub validator: ValidatorConfig,

    /// Per-endpoint authorization table.
    pub policy: PolicyConfig,

    /// Outbound token acquisition.
    pub client: ClientConfig,

    /// Interactive browser login.
    pub login: LoginConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:9000".to_string(),
            authorization_server: true,
            signing: SigningConfig::default(),
            tokens: TokenDefaults::default(),
            validator: ValidatorConfig::default(),
            policy: PolicyConfig::default(),
            client: ClientConfig::default(),
            login: LoginConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Returns the issuer URL without a trailing slash.
    #[must_use]
    pub fn issuer_url(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    /// Token endpoint of the configured issuer.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/token", self.issuer_url())
    }

    /// Authorization endpoint of the configured issuer.
    #[must_use]
    pub fn authorization_endpoint(&self) -> String {
        format!("{}/oauth2/authorize", self.issuer_url())
    }

    /// JWKS endpoint of the configured issuer.
    #[must_use]
    pub fn jwks_endpoint(&self) -> String {
        format!("{}/oauth2/jwks", self.issuer_url())
    }

    /// Issuer expected in validated tokens.
    #[must_use]
    pub fn expected_issuer(&self) -> String {
        self.validator
            .issuer
            .clone()
            .unwrap_or_else(|| self.issuer_url().to_string())
    }
}

/// Token signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    /// Supported: "RS256", "RS384", "ES384"
    pub algorithm: String,

    /// Generate a new signing key after this interval. `None` disables rotation.
    #[serde(with = "humantime_serde")]
    pub rotation_interval: Option<Duration>,

    /// How long a retired key stays published after rotation.
    /// Must cover the longest lived signed token.
    #[serde(with = "humantime_serde")]
    pub retired_key_retention: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            rotation_interval: None,
            retired_key_retention: Duration::from_secs(3600),
        }
    }
}

/// Default token settings for registered clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenDefaults {
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

    /// Keep the same refresh token across refreshes instead of rotating it.
    pub reuse_refresh_tokens: bool,
}

impl TokenDefaults {
    /// Longest lifetime of a signed token (access or ID token).
    #[must_use]
    pub fn longest_signed_ttl(&self) -> Duration {
        self.access_token_ttl.max(self.id_token_ttl)
    }
}

impl Default for TokenDefaults {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(300),
            refresh_token_ttl: Duration::from_secs(3600),
            authorization_code_ttl: Duration::from_secs(300),
            id_token_ttl: Duration::from_secs(1800),
            reuse_refresh_tokens: true,
        }
    }
}

/// Bearer token validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Remote JWKS URI. `None` validates against the local key ring.
    pub jwks_uri: Option<String>,

    /// Expected `iss`. Defaults to the configured issuer.
    pub issuer: Option<String>,

    /// Required `aud` entry, if any.
    pub audience: Option<String>,

    /// Tolerated clock difference when checking `exp` and `nbf`.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Cache lifetime of a fetched key set when the response carries no `max-age`.
    #[serde(with = "humantime_serde")]
    pub jwks_ttl: Duration,

    /// Minimum spacing between forced refetches triggered by unknown key ids.
    #[serde(with = "humantime_serde")]
    pub jwks_min_refresh_interval: Duration,

    /// Timeout for key set requests.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Permit plain HTTP key set URIs (development only).
    pub allow_http: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            jwks_uri: None,
            issuer: None,
            audience: None,
            clock_skew: Duration::from_secs(60),
            jwks_ttl: Duration::from_secs(300),
            jwks_min_refresh_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            allow_http: false,
        }
    }
}

/// Authorization policy table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Ordered rules, first match wins. Unmatched requests require authentication.
    pub rules: Vec<PolicyRule>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let any_of = |authorities: &[&str]| {
            Requirement::AnyOf(authorities.iter().map(ToString::to_string).collect())
        };
        Self {
            rules: vec![
                PolicyRule::new(&["GET"], "/health/**", Requirement::PermitAll),
                PolicyRule::new(
                    &["GET"],
                    "/customers/**",
                    any_of(&["backend.read", "ROLE_USER", "ROLE_OPERATOR", "ROLE_ADMIN"]),
                ),
                PolicyRule::new(
                    &["POST", "PUT", "DELETE"],
                    "/bookings/**",
                    any_of(&["backend.write", "ROLE_OPERATOR", "ROLE_ADMIN"]),
                ),
                PolicyRule::new(&[], "/customers/**", any_of(&["ROLE_ADMIN"])),
            ],
        }
    }
}

/// Outbound token acquisition configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Cached tokens expiring within this window are treated as expired.
    #[serde(with = "humantime_serde")]
    pub expiry_skew: Duration,

    /// Timeout for a single token request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Retries after the first attempt, transient failures only.
    pub max_retries: u32,

    /// Initial backoff between retries; doubles per attempt.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Upper bound for the backoff.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Client registrations keyed by registration id.
    pub registrations: BTreeMap<String, RegistrationConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            expiry_skew: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            registrations: BTreeMap::new(),
        }
    }
}

/// One outbound client registration (one hop).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Client id at the issuer.
    pub client_id: String,

    /// Client secret at the issuer.
    pub client_secret: String,

    /// Token endpoint. Defaults to the issuer's `/oauth2/token`.
    pub token_uri: Option<String>,

    /// Scopes requested with client_credentials.
    pub scopes: Vec<String>,

    /// Base URL of the downstream service this registration calls.
    pub base_url: Option<String>,
}

/// Browser login configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Serve the login bridge endpoints.
    pub enabled: bool,

    /// Registration id used in the login paths.
    pub registration_id: String,

    /// Client id of the browser-facing client at the issuer.
    pub client_id: String,

    /// Client secret of the browser-facing client.
    pub client_secret: String,

    /// Authorization endpoint. Defaults to the issuer's `/oauth2/authorize`.
    pub authorization_uri: Option<String>,

    /// Token endpoint. Defaults to the issuer's `/oauth2/token`.
    pub token_uri: Option<String>,

    /// Callback URL registered at the issuer.
    pub redirect_uri: String,

    /// Scopes requested at login.
    pub scopes: Vec<String>,

    /// Name of the cookie carrying the pending authorization request.
    pub state_cookie_name: String,

    /// Lifetime of the pending authorization request.
    #[serde(with = "humantime_serde")]
    pub state_cookie_ttl: Duration,

    /// HMAC secret for the pending authorization request cookie.
    pub state_signing_secret: String,

    /// Name of the session cookie.
    pub session_cookie_name: String,

    /// Session lifetime.
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Mark cookies `Secure`.
    pub secure_cookies: bool,

    /// Where to send the browser after a successful login without `return_to`.
    pub post_login_redirect: String,

    /// Where to send the browser after logout.
    pub post_logout_redirect: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            registration_id: "web".to_string(),
            client_id: "web-client".to_string(),
            client_secret: String::new(),
            authorization_uri: None,
            token_uri: None,
            redirect_uri: "http://localhost:8080/login/oauth2/code/web".to_string(),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            state_cookie_name: "WAYPOINT_AUTH_REQUEST".to_string(),
            state_cookie_ttl: Duration::from_secs(300),
            state_signing_secret: String::new(),
            session_cookie_name: "WAYPOINT_SESSION".to_string(),
            session_ttl: Duration::from_secs(1800),
            secure_cookies: false,
            post_login_redirect: "/".to_string(),
            post_logout_redirect: "/".to_string(),
        }
    }
}

impl LoginConfig {
    /// Path that starts the login flow.
    #[must_use]
    pub fn login_path(&self) -> String {
        format!("/oauth2/authorization/{}", self.registration_id)
    }

    /// Path of the login callback.
    #[must_use]
    pub fn callback_path(&self) -> String {
        format!("/login/oauth2/code/{}", self.registration_id)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the issuer is empty, the signing algorithm is
    /// unsupported, a lifetime is zero, retired keys would be dropped before
    /// the tokens they signed expire, a policy path is not absolute, a client
    /// registration lacks credentials, or login is enabled without a usable
    /// state signing secret.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        match self.signing.algorithm.as_str() {
            "RS256" | "RS384" | "ES384" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signing algorithm: '{}'. Must be RS256, RS384, or ES384",
                    other
                )));
            }
        }

        if self.signing.rotation_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidValue(
                "signing.rotation_interval must be > 0".to_string(),
            ));
        }

        if self.tokens.access_token_ttl.is_zero() || self.tokens.authorization_code_ttl.is_zero()
        {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be > 0".to_string(),
            ));
        }

        let needed = self.tokens.longest_signed_ttl() + self.validator.clock_skew;
        if self.authorization_server && self.signing.retired_key_retention < needed {
            return Err(ConfigError::InvalidValue(format!(
                "signing.retired_key_retention must be at least {}s to cover the longest token lifetime plus clock skew",
                needed.as_secs()
            )));
        }

        for rule in &self.policy.rules {
            if !rule.path.starts_with('/') {
                return Err(ConfigError::InvalidValue(format!(
                    "policy path '{}' must start with '/'",
                    rule.path
                )));
            }
        }

        for (id, registration) in &self.client.registrations {
            if registration.client_id.is_empty() {
                return Err(ConfigError::Missing(format!(
                    "client.registrations.{id}.client_id"
                )));
            }
            if registration.client_secret.is_empty() {
                return Err(ConfigError::Missing(format!(
                    "client.registrations.{id}.client_secret"
                )));
            }
        }

        if self.client.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "client.request_timeout must be > 0".to_string(),
            ));
        }

        if self.login.enabled {
            if self.login.state_signing_secret.len() < 32 {
                return Err(ConfigError::InvalidValue(
                    "login.state_signing_secret must be at least 32 bytes".to_string(),
                ));
            }
            if self.login.client_id.is_empty() {
                return Err(ConfigError::Missing("login.client_id".to_string()));
            }
            if url::Url::parse(&self.login.redirect_uri).is_err() {
                return Err(ConfigError::InvalidValue(format!(
                    "login.redirect_uri '{}' is not an absolute URL",
                    self.login.redirect_uri
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert!(config.authorization_server);
        assert_eq!(config.issuer, "http://localhost:9000");
        assert!(config.tokens.reuse_refresh_tokens);
        assert_eq!(config.signing.algorithm, "RS256");
        assert_eq!(config.validator.clock_skew, Duration::from_secs(60));
        assert!(!config.login.enabled);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(AuthConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_policy_table_shape() {
        let config = PolicyConfig::default();
        assert_eq!(config.rules.len(), 4);
        assert_eq!(config.rules[0].path, "/health/**");
        assert!(matches!(config.rules[0].require, Requirement::PermitAll));
        assert!(config.rules[3].methods.is_empty());
    }

    #[test]
    fn test_endpoint_urls_strip_trailing_slash() {
        let config = AuthConfig {
            issuer: "https://auth.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.token_endpoint(),
            "https://auth.example.com/oauth2/token"
        );
        assert_eq!(config.expected_issuer(), "https://auth.example.com");
    }

    #[test]
    fn test_empty_issuer_fails_validation() {
        let mut config = AuthConfig::default();
        config.issuer = String::new();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        assert!(err.to_string().contains("issuer"));
    }

    #[test]
    fn test_invalid_algorithm_fails_validation() {
        let mut config = AuthConfig::default();
        config.signing.algorithm = "HS256".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signing algorithm"));
    }

    #[test]
    fn test_key_retention_must_outlive_tokens() {
        let mut config = AuthConfig::default();
        config.tokens.access_token_ttl = Duration::from_secs(7200);
        config.signing.retired_key_retention = Duration::from_secs(60);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retired_key_retention"));

        // lifetime plus the default 60s skew
        config.signing.retired_key_retention = Duration::from_secs(7260);
        assert!(config.validate().is_ok());

        // a resource-only node publishes no keys
        config.signing.retired_key_retention = Duration::from_secs(60);
        config.authorization_server = false;
        config.validator.jwks_uri = Some("https://issuer.example.com/oauth2/jwks".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_registration_without_secret_fails() {
        let mut config = AuthConfig::default();
        config.client.registrations.insert(
            "bookings".to_string(),
            RegistrationConfig {
                client_id: "customer-service".to_string(),
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_login_requires_signing_secret() {
        let mut config = AuthConfig::default();
        config.login.enabled = true;
        assert!(config.validate().is_err());

        config.login.state_signing_secret = "0123456789abcdef0123456789abcdef".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_humantime_and_rules() {
        let json = serde_json::json!({
            "issuer": "http://issuer:9000",
            "tokens": { "access_token_ttl": "2m", "reuse_refresh_tokens": false },
            "policy": { "rules": [
                { "methods": ["GET"], "path": "/health/**", "require": "permit_all" },
                { "path": "/admin/**", "require": { "any_of": ["ROLE_ADMIN"] } }
            ]}
        });
        let config: AuthConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.tokens.access_token_ttl, Duration::from_secs(120));
        assert!(!config.tokens.reuse_refresh_tokens);
        assert_eq!(config.policy.rules.len(), 2);
        assert!(matches!(config.policy.rules[1].require, Requirement::AnyOf(_)));
        // untouched sections keep their defaults
        assert_eq!(config.client.max_retries, 2);
    }
}
