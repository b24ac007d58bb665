//! Authorization-request state carried in a signed cookie.
//!
//! The login bridge keeps no server-side state between redirecting the
//! browser to the issuer and receiving the callback. `state`, the PKCE
//! verifier and the nonce travel in a short-lived HS256 JWT stored in an
//! HttpOnly cookie scoped to the callback path.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::login::LoginError;
use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
use crate::types::generate_token;

/// What the callback needs to finish the flow.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequestState {
    /// Anti-CSRF value echoed back by the issuer.
    pub state: String,
    /// PKCE code verifier.
    pub verifier: String,
    /// ID token nonce.
    pub nonce: String,
    /// Redirect URI sent with the authorization request.
    pub redirect_uri: String,
    /// Where to send the browser after login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
    /// Expiry (Unix seconds).
    pub exp: i64,
}

impl std::fmt::Debug for AuthorizationRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationRequestState")
            .field("redirect_uri", &self.redirect_uri)
            .field("return_to", &self.return_to)
            .field("exp", &self.exp)
            .finish_non_exhaustive()
    }
}

impl AuthorizationRequestState {
    /// Fresh state, verifier and nonce, valid for `ttl`.
    #[must_use]
    pub fn generate(redirect_uri: &str, return_to: Option<String>, ttl: Duration) -> Self {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            state: generate_token(),
            verifier: PkceVerifier::generate().as_str().to_string(),
            nonce: generate_token(),
            redirect_uri: redirect_uri.to_string(),
            return_to,
            exp: OffsetDateTime::now_utc().unix_timestamp().saturating_add(ttl),
        }
    }

    /// S256 challenge of the verifier.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::InvalidState`] if the verifier is malformed.
    pub fn code_challenge(&self) -> Result<String, LoginError> {
        let verifier =
            PkceVerifier::new(self.verifier.clone()).map_err(|_| LoginError::InvalidState)?;
        Ok(PkceChallenge::from_verifier(&verifier).as_str().to_string())
    }

    /// Compares `returned` with the stored state in constant time.
    #[must_use]
    pub fn state_matches(&self, returned: &str) -> bool {
        self.state.as_bytes().ct_eq(returned.as_bytes()).into()
    }
}

/// Signs and verifies state cookies.
pub struct StateCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec").finish_non_exhaustive()
    }
}

impl StateCodec {
    /// Creates a codec keyed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Serializes and signs `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn seal(&self, state: &AuthorizationRequestState) -> Result<String, LoginError> {
        encode(&Header::new(Algorithm::HS256), state, &self.encoding_key)
            .map_err(|e| LoginError::Internal(e.to_string()))
    }

    /// Verifies and deserializes a cookie value.
    ///
    /// # Errors
    ///
    /// [`LoginError::StateExpired`] past `exp`, [`LoginError::InvalidState`]
    /// for anything else wrong with the value.
    pub fn open(&self, value: &str) -> Result<AuthorizationRequestState, LoginError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        decode::<AuthorizationRequestState>(value, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => LoginError::StateExpired,
                _ => LoginError::InvalidState,
            })
    }
}
