//! Token validator.
//!
//! Resource servers verify bearer tokens against the issuer's JWKS
//! ([`jwks::JwksCache`]); the issuer verifies its own tokens against its key
//! ring. Either way the result is a [`ValidatedClaims`] carrying the
//! authority set the policy engine checks.

pub mod jwks;
pub mod validator;

pub use jwks::{JwksCache, JwksCacheConfig, JwksError};
pub use validator::{
    ACCEPTED_ALGORITHMS, KeySource, Rejection, TokenValidator, ValidatedClaims,
};
