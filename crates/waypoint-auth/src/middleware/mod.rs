//! HTTP middleware for authentication and authorization.
//!
//! - [`auth::enforce`] selects the security chain, authenticates the caller
//!   and applies the chain's policy
//! - [`Authenticated`] hands the caller to handlers
//! - `IntoResponse` for [`AuthError`](crate::error::AuthError) renders OAuth
//!   error bodies with `WWW-Authenticate` challenges

pub mod auth;
pub mod error;
pub mod types;

pub use auth::{AuthState, Authenticated, MaybeAuthenticated, bearer_token, enforce};
pub use error::{REALM, www_authenticate};
pub use types::{AuthContext, Credential};
