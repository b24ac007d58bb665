//! OAuth 2.0 protocol types: token and authorization requests, client
//! authentication and PKCE.

pub mod authorize;
pub mod client_auth;
pub mod pkce;
pub mod token;

pub use authorize::{
    AuthorizationError, AuthorizationErrorCode, AuthorizationRequest, AuthorizeRejection,
    ValidatedAuthorizationRequest, success_redirect, validate_request,
};
pub use client_auth::{ClientCredentials, parse_basic_auth};
pub use pkce::{PkceChallenge, PkceError, PkceVerifier, require_s256};
pub use token::{TokenErrorResponse, TokenRequest, TokenResponse};
