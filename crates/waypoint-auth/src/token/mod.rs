//! Token issuer.
//!
//! - [`jwt`]: claim structs and signing key pairs
//! - [`keys`]: the rotating key ring published as JWKS
//! - [`claims`]: the claim customizer
//! - [`issuer`]: grant handling and the authorization state machine

pub mod claims;
pub mod issuer;
pub mod jwt;
pub mod keys;

pub use claims::{ExtraClaims, TokenType, customize};
pub use issuer::{Grant, IssuedTokens, OPENID_SCOPE, TokenIssuer};
pub use jwt::{
    AccessTokenClaims, IdTokenClaims, Jwk, Jwks, JwtError, SigningAlgorithm, SigningKeyPair,
};
pub use keys::KeyRing;
