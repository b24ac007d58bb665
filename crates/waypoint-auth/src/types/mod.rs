//! Domain types shared by the issuer, validator and client components.

pub mod authorization;
pub mod client;
pub mod principal;
pub mod scope;

pub use authorization::{
    Authorization, AuthorizationState, TokenKind, TokenSegment, generate_token, hash_token,
};
pub use client::{ClientValidationError, GrantType, RegisteredClient, TokenSettings};
pub use principal::{Principal, ROLE_PREFIX};
pub use scope::{join_scope, parse_scope};
