//! PKCE (RFC 7636), S256 only.
//!
//! ```
//! use waypoint_auth::oauth::{PkceChallenge, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//! assert!(challenge.verify(&verifier).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

// =============================================================================
// Error Types
// =============================================================================

/// PKCE failures.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length outside 43..=128.
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains characters outside `[A-Za-z0-9-._~]`.
    #[error("Invalid verifier characters: must be URL-safe ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,

    /// Challenge is not 43 characters of base64url.
    #[error("Invalid challenge format: must be a base64url SHA-256 digest")]
    InvalidChallengeFormat,

    /// Only S256 is accepted.
    #[error("Unsupported challenge method: {0}. Only S256 is supported.")]
    UnsupportedMethod(String),

    /// Verifier does not hash to the challenge.
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

impl PkceError {
    /// OAuth 2.0 error code for this failure.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::VerificationFailed => "invalid_grant",
            _ => "invalid_request",
        }
    }
}

/// Checks the `code_challenge_method` parameter.
///
/// # Errors
///
/// `UnsupportedMethod` for anything but `S256` (including `plain`).
pub fn require_s256(method: &str) -> Result<(), PkceError> {
    if method == "S256" {
        Ok(())
    } else {
        Err(PkceError::UnsupportedMethod(method.to_string()))
    }
}

// =============================================================================
// Verifier
// =============================================================================

/// PKCE code verifier.
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Validates a verifier received from a client.
    ///
    /// # Errors
    ///
    /// Returns an error on bad length or characters.
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }
        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }
        Ok(Self(verifier))
    }

    /// 32 random bytes, base64url (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// The verifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Challenge
// =============================================================================

/// S256 code challenge: `BASE64URL(SHA256(verifier))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Derives the challenge for `verifier`.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let hash = Sha256::digest(verifier.0.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(hash))
    }

    /// Validates a challenge received from a client.
    ///
    /// # Errors
    ///
    /// `InvalidChallengeFormat` unless it decodes to 32 bytes.
    pub fn new(challenge: String) -> Result<Self, PkceError> {
        match URL_SAFE_NO_PAD.decode(&challenge) {
            Ok(bytes) if bytes.len() == 32 => Ok(Self(challenge)),
            _ => Err(PkceError::InvalidChallengeFormat),
        }
    }

    /// Checks `verifier` against this challenge in constant time.
    ///
    /// # Errors
    ///
    /// `VerificationFailed` on mismatch.
    pub fn verify(&self, verifier: &PkceVerifier) -> Result<(), PkceError> {
        let expected = Self::from_verifier(verifier);
        if bool::from(self.0.as_bytes().ct_eq(expected.0.as_bytes())) {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    /// The challenge string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
