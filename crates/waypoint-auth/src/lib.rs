//! # waypoint-auth
//!
//! The Waypoint trust chain: an OAuth 2.0 authorization server, resource
//! server enforcement, and token propagation for outbound calls.
//!
//! ## Modules
//!
//! - [`storage`] - registered clients, principals, authorizations, consents
//! - [`token`] - token issuance, signing keys and JWKS
//! - [`validation`] - bearer and ID token validation
//! - [`policy`] - per-endpoint authorization rules and security chains
//! - [`middleware`] - axum enforcement middleware and extractors
//! - [`client`] - client token manager and the authorized HTTP client
//! - [`login`] - browser login through the issuer (Authorization Code + PKCE)
//! - [`http`] - axum handlers for the issuer and login endpoints

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod keyed_lock;
pub mod login;
pub mod middleware;
pub mod oauth;
pub mod policy;
pub mod secret;
pub mod storage;
pub mod token;
pub mod types;
pub mod validation;

pub use client::{AuthorizedClient, ClientTokenError, ClientTokenManager, TokenEndpoint};
pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use http::{IssuerState, issuer_router, login_router};
pub use login::{LoginBridge, LoginError, LoginSession, SessionStore};
pub use middleware::{AuthContext, AuthState, Authenticated, MaybeAuthenticated, enforce};
pub use policy::{Decision, Mechanism, PolicyEngine, SecurityChain, SecurityChains};
pub use token::{KeyRing, TokenIssuer};
pub use types::{GrantType, Principal, RegisteredClient};
pub use validation::{KeySource, TokenValidator, ValidatedClaims};

/// Result type for authentication and authorization operations.
pub type AuthResult<T> = Result<T, AuthError>;
