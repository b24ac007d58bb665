//! Bearer token validation.
//!
//! [`TokenValidator::validate`] runs the checks in order and stops at the
//! first failure:
//!
//! 1. three non-empty segments and a decodable header
//! 2. signature against a trusted key (remote JWKS or the local key ring)
//! 3. `exp` (and `nbf`) with clock-skew tolerance
//! 4. `iss` equals the expected issuer
//! 5. `aud` contains the configured audience, when one is configured
//!
//! Every failure surfaces as a generic [`AuthError::InvalidToken`]; the
//! reason is only logged at debug level.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::de::DeserializeOwned;
use url::Url;

use crate::AuthResult;
use crate::config::{AuthConfig, ValidatorConfig};
use crate::error::AuthError;
use crate::token::jwt::{AccessTokenClaims, IdTokenClaims};
use crate::token::keys::KeyRing;
use crate::validation::jwks::{JwksCache, JwksCacheConfig, JwksError};

/// Signature algorithms accepted in token headers.
pub const ACCEPTED_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::RS256, Algorithm::RS384, Algorithm::ES384];

/// Where verification keys come from.
#[derive(Clone)]
pub enum KeySource {
    /// The issuer's own key ring.
    Local(Arc<KeyRing>),
    /// A remote JWKS endpoint.
    Remote {
        /// Shared key cache.
        cache: Arc<JwksCache>,
        /// JWKS URI.
        jwks_uri: Url,
    },
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => f.write_str("Local"),
            Self::Remote { jwks_uri, .. } => write!(f, "Remote({jwks_uri})"),
        }
    }
}

/// Why a token was rejected. Logged, never returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Not three segments or undecodable header.
    Malformed,
    /// Header algorithm not accepted or inconsistent with the key.
    Algorithm,
    /// No trusted key with this id.
    UnknownKey,
    /// The key set could not be fetched.
    KeysUnavailable,
    /// Signature does not verify.
    Signature,
    /// Past `exp` beyond skew, or before `nbf`.
    Expired,
    /// `iss` mismatch.
    Issuer,
    /// `aud` mismatch.
    Audience,
    /// ID token `nonce` mismatch.
    Nonce,
    /// Missing or malformed claim.
    Claims(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("malformed token"),
            Self::Algorithm => f.write_str("algorithm not accepted"),
            Self::UnknownKey => f.write_str("unknown key id"),
            Self::KeysUnavailable => f.write_str("key set unavailable"),
            Self::Signature => f.write_str("bad signature"),
            Self::Expired => f.write_str("expired"),
            Self::Issuer => f.write_str("issuer mismatch"),
            Self::Audience => f.write_str("audience mismatch"),
            Self::Nonce => f.write_str("nonce mismatch"),
            Self::Claims(detail) => write!(f, "invalid claims: {detail}"),
        }
    }
}

impl From<Rejection> for AuthError {
    fn from(rejection: Rejection) -> Self {
        AuthError::invalid_token(rejection.to_string())
    }
}

/// An accepted access token.
#[derive(Debug, Clone)]
pub struct ValidatedClaims {
    /// `sub`.
    pub subject: String,
    /// `client_id`, if present.
    pub client_id: Option<String>,
    /// Scopes from `scope` or `scp`.
    pub scopes: BTreeSet<String>,
    /// Scopes, roles and authorities, verbatim.
    pub authorities: BTreeSet<String>,
    /// `exp` as a Unix timestamp.
    pub expires_at: i64,
    /// The decoded claims.
    pub claims: AccessTokenClaims,
}

impl ValidatedClaims {
    fn from_claims(claims: AccessTokenClaims) -> Self {
        let scopes = claims.scopes();
        let mut authorities = scopes.clone();
        authorities.extend(claims.extra.roles.iter().cloned());
        authorities.extend(claims.extra.authorities.iter().cloned());
        Self {
            subject: claims.sub.clone(),
            client_id: claims.client_id.clone(),
            scopes,
            authorities,
            expires_at: claims.exp,
            claims,
        }
    }
}

/// Validates bearer tokens.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    keys: KeySource,
    issuer: String,
    audience: Option<String>,
    clock_skew: Duration,
}

impl TokenValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(keys: KeySource, issuer: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: None,
            clock_skew: Duration::from_secs(60),
        }
    }

    /// Requires `aud` to contain `audience`.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Sets the clock-skew tolerance.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Builds a validator from configuration.
    ///
    /// A configured `jwks_uri` selects the remote key source; otherwise
    /// `local_keys` must be given.
    ///
    /// # Errors
    ///
    /// `Configuration` if neither key source is available or the URI is invalid.
    pub fn from_config(config: &AuthConfig, local_keys: Option<Arc<KeyRing>>) -> AuthResult<Self> {
        let validator: &ValidatorConfig = &config.validator;
        let keys = match (&validator.jwks_uri, local_keys) {
            (Some(uri), _) => {
                let jwks_uri = Url::parse(uri).map_err(|e| {
                    AuthError::configuration(format!("Invalid validator.jwks_uri: {e}"))
                })?;
                let cache = JwksCache::new(JwksCacheConfig::from(validator))
                    .map_err(|e| AuthError::configuration(e.to_string()))?;
                KeySource::Remote {
                    cache: Arc::new(cache),
                    jwks_uri,
                }
            }
            (None, Some(ring)) => KeySource::Local(ring),
            (None, None) => {
                return Err(AuthError::configuration(
                    "validator.jwks_uri is required when this node does not issue tokens",
                ));
            }
        };

        let mut result = Self::new(keys, config.expected_issuer()).with_clock_skew(validator.clock_skew);
        if let Some(audience) = &validator.audience {
            result = result.with_audience(audience);
        }
        Ok(result)
    }

    /// Expected `iss`.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Validates an access token.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for any rejection.
    pub async fn validate(&self, token: &str) -> AuthResult<ValidatedClaims> {
        let claims: AccessTokenClaims = self
            .verify(token, self.audience.as_deref())
            .await
            .inspect_err(|rejection| {
                tracing::debug!(reason = %rejection, "Rejected bearer token");
            })?;
        if claims.scope.is_none() && claims.scp.is_none() {
            tracing::debug!(sub = %claims.sub, "Rejected bearer token without scope claim");
            return Err(Rejection::Claims("missing scope".to_string()).into());
        }
        Ok(ValidatedClaims::from_claims(claims))
    }

    /// Validates an ID token issued to `client_id`.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for any rejection, including a `nonce` mismatch.
    pub async fn validate_id_token(
        &self,
        token: &str,
        client_id: &str,
        expected_nonce: Option<&str>,
    ) -> AuthResult<IdTokenClaims> {
        let result = self
            .verify::<IdTokenClaims>(token, Some(client_id))
            .await
            .and_then(|claims| {
                if expected_nonce.is_some() && claims.nonce.as_deref() != expected_nonce {
                    Err(Rejection::Nonce)
                } else {
                    Ok(claims)
                }
            });
        result.map_err(|rejection| {
            tracing::debug!(reason = %rejection, client_id, "Rejected ID token");
            rejection.into()
        })
    }

    async fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        audience: Option<&str>,
    ) -> Result<T, Rejection> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|segment| segment.is_empty()) {
            return Err(Rejection::Malformed);
        }
        let header = decode_header(token).map_err(|_| Rejection::Malformed)?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(Rejection::Algorithm);
        }

        let candidates = self.candidate_keys(header.kid.as_deref()).await?;
        let mut last = Rejection::UnknownKey;
        for (key, algorithm) in candidates {
            if algorithm.is_some_and(|algorithm| algorithm != header.alg) {
                last = Rejection::Algorithm;
                continue;
            }
            match decode::<T>(token, &key, &self.validation(header.alg, audience)) {
                Ok(data) => return Ok(data.claims),
                Err(e) => {
                    last = match e.kind() {
                        ErrorKind::InvalidSignature => Rejection::Signature,
                        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => {
                            Rejection::Expired
                        }
                        ErrorKind::InvalidIssuer => Rejection::Issuer,
                        ErrorKind::InvalidAudience => Rejection::Audience,
                        ErrorKind::InvalidAlgorithm => Rejection::Algorithm,
                        _ => Rejection::Claims(e.to_string()),
                    };
                    // only a bad signature is worth trying the next key for
                    if last != Rejection::Signature {
                        return Err(last);
                    }
                }
            }
        }
        Err(last)
    }

    fn validation(&self, algorithm: Algorithm, audience: Option<&str>) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.clock_skew.as_secs();
        validation.validate_nbf = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }

    async fn candidate_keys(
        &self,
        kid: Option<&str>,
    ) -> Result<Vec<(DecodingKey, Option<Algorithm>)>, Rejection> {
        match (&self.keys, kid) {
            (KeySource::Local(ring), Some(kid)) => ring
                .decoding_key(kid)
                .map(|(key, algorithm)| vec![(key, Some(algorithm))])
                .ok_or(Rejection::UnknownKey),
            (KeySource::Local(ring), None) => {
                let active = ring.active();
                Ok(vec![(
                    active.decoding_key().clone(),
                    Some(active.algorithm.to_jwt_algorithm()),
                )])
            }
            (KeySource::Remote { cache, jwks_uri }, Some(kid)) => cache
                .get_key(jwks_uri, kid)
                .await
                .map(|found| vec![found])
                .map_err(Self::key_rejection),
            (KeySource::Remote { cache, jwks_uri }, None) => cache
                .signing_keys(jwks_uri)
                .await
                .map_err(Self::key_rejection),
        }
    }

    fn key_rejection(error: JwksError) -> Rejection {
        match error {
            JwksError::KeyNotFound(_) | JwksError::NoSigningKeys => Rejection::UnknownKey,
            other => {
                tracing::warn!(error = %other, "JWKS unavailable");
                Rejection::KeysUnavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::token::claims::ExtraClaims;
    use crate::token::jwt::{SigningAlgorithm, SigningKeyPair};

    const ISSUER: &str = "http://localhost:9000";

    fn ring() -> Arc<KeyRing> {
        Arc::new(KeyRing::generate(SigningAlgorithm::RS256, Duration::from_secs(3600)).unwrap())
    }

    fn claims(lifetime: i64) -> AccessTokenClaims {
        let mut extra = ExtraClaims::default();
        extra.roles.insert("ROLE_USER".to_string());
        AccessTokenClaims::builder(ISSUER, "alice", "web-client")
            .audience("booking-service")
            .issued_at(OffsetDateTime::now_utc(), lifetime)
            .scope("backend.read openid")
            .extra(extra)
            .build()
    }

    fn local(ring: &Arc<KeyRing>) -> TokenValidator {
        TokenValidator::new(KeySource::Local(Arc::clone(ring)), ISSUER)
    }

    #[tokio::test]
    async fn test_valid_token_maps_authorities() {
        let ring = ring();
        let token = ring.active().sign(&claims(300)).unwrap();
        let validated = local(&ring).validate(&token).await.unwrap();

        assert_eq!(validated.subject, "alice");
        assert_eq!(validated.client_id.as_deref(), Some("web-client"));
        let authorities: Vec<_> = validated.authorities.iter().map(String::as_str).collect();
        assert_eq!(authorities, vec!["ROLE_USER", "backend.read", "openid"]);
        assert!(!validated.authorities.contains("backend.write"));
    }

    #[tokio::test]
    async fn test_malformed_tokens() {
        let validator = local(&ring());
        for token in ["", "abc", "a.b", "a..c", "a.b.c.d", "not.a.jwt"] {
            let err = validator.validate(token).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidToken { .. }), "{token}");
            assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_expiry_respects_skew() {
        let ring = ring();
        // expired 30s ago: inside the default 60s skew
        let token = ring.active().sign(&claims(-30)).unwrap();
        assert!(local(&ring).validate(&token).await.is_ok());

        let strict = local(&ring).with_clock_skew(Duration::ZERO);
        let err = strict.validate(&token).await.unwrap_err();
        assert!(err.to_string().contains("expired"));

        let token = ring.active().sign(&claims(-600)).unwrap();
        assert!(local(&ring).validate(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_issuer_and_audience() {
        let ring = ring();
        let token = ring.active().sign(&claims(300)).unwrap();

        let other_issuer = TokenValidator::new(KeySource::Local(Arc::clone(&ring)), "http://evil");
        assert!(other_issuer.validate(&token).await.is_err());

        assert!(
            local(&ring)
                .with_audience("booking-service")
                .validate(&token)
                .await
                .is_ok()
        );
        let err = local(&ring)
            .with_audience("customer-service")
            .validate(&token)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("audience"));
        // the public description never carries the reason
        assert!(!err.public_description().contains("audience"));
    }

    #[tokio::test]
    async fn test_foreign_key_rejected() {
        let ring = ring();
        let foreign = SigningKeyPair::generate(SigningAlgorithm::RS256).unwrap();
        let token = foreign.sign(&claims(300)).unwrap();
        let err = local(&ring).validate(&token).await.unwrap_err();
        assert!(err.to_string().contains("unknown key"));
    }

    #[tokio::test]
    async fn test_token_without_jti_is_accepted() {
        let ring = ring();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let minimal = serde_json::json!({
            "iss": ISSUER,
            "sub": "svc",
            "iat": now,
            "exp": now + 300,
            "scope": "backend.read",
        });
        let token = ring.active().sign(&minimal).unwrap();

        let validated = local(&ring).validate(&token).await.unwrap();
        assert_eq!(validated.subject, "svc");
        assert!(validated.authorities.contains("backend.read"));
    }

    #[tokio::test]
    async fn test_retired_key_still_validates() {
        let ring = ring();
        let token = ring.active().sign(&claims(300)).unwrap();
        ring.rotate().unwrap();
        assert!(local(&ring).validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_remote_unknown_kid_triggers_refetch() {
        let server = MockServer::start().await;
        let ring = ring();
        let stale = ring.jwks();
        ring.rotate().unwrap();
        let token = ring.active().sign(&claims(300)).unwrap();

        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stale))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ring.jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwksCache::new(JwksCacheConfig {
            allow_http: true,
            min_refresh_interval: Duration::ZERO,
            ..JwksCacheConfig::default()
        })
        .unwrap();
        let validator = TokenValidator::new(
            KeySource::Remote {
                cache: Arc::new(cache),
                jwks_uri: Url::parse(&format!("{}/oauth2/jwks", server.uri())).unwrap(),
            },
            ISSUER,
        );
        assert!(validator.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_id_token_audience_and_nonce() {
        let ring = ring();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let id_claims = IdTokenClaims {
            iss: ISSUER.to_string(),
            sub: "alice".to_string(),
            aud: vec!["web-client".to_string()],
            exp: now + 300,
            iat: now,
            jti: "j".to_string(),
            nonce: Some("n-1".to_string()),
            email: None,
            name: None,
            extra: ExtraClaims::default(),
        };
        let token = ring.active().sign(&id_claims).unwrap();
        let validator = local(&ring);

        assert!(
            validator
                .validate_id_token(&token, "web-client", Some("n-1"))
                .await
                .is_ok()
        );
        assert!(
            validator
                .validate_id_token(&token, "web-client", Some("n-2"))
                .await
                .is_err()
        );
        assert!(
            validator
                .validate_id_token(&token, "other-client", Some("n-1"))
                .await
                .is_err()
        );
    }
}
