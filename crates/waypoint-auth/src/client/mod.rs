//! Outbound token propagation.
//!
//! A service calling the next hop authenticates as its own OAuth client:
//! [`ClientTokenManager`] obtains client-credentials tokens from the issuer
//! and caches them, [`AuthorizedClient`] attaches them to outbound requests.

pub mod cache;
pub mod endpoint;
pub mod error;
pub mod interceptor;
pub mod manager;

pub use cache::{AuthorizedClientCache, AuthorizedClientEntry, CacheKey};
pub use endpoint::{
    HttpTokenEndpoint, IssuerTokenEndpoint, Registration, RoutingTokenEndpoint, TokenEndpoint,
};
pub use error::ClientTokenError;
pub use interceptor::AuthorizedClient;
pub use manager::{ClientTokenManager, RetryPolicy};
