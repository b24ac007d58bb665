//! HTTP endpoints.
//!
//! [`issuer_router`] serves the authorization server (`/oauth2/*` and
//! discovery). [`login_router`] serves the browser login bridge.
//! Both return routers with their state applied, ready to merge.

pub mod authorize;
pub mod discovery;
pub mod jwks;
pub mod login;
pub mod templates;
pub mod token;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::config::AuthConfig;
use crate::login::LoginBridge;
use crate::storage::{ClientStorage, ConsentStorage};
use crate::token::TokenIssuer;

pub use authorize::{PendingAuthorization, PendingAuthorizations};
pub use discovery::DiscoveryDocument;
pub use login::{AuthStatus, LoginQuery};

/// Shared state of the authorization server endpoints.
#[derive(Clone)]
pub struct IssuerState {
    /// Token issuer.
    pub issuer: Arc<TokenIssuer>,
    /// Registered clients.
    pub clients: Arc<dyn ClientStorage>,
    /// Approved scopes per client and principal.
    pub consents: Arc<dyn ConsentStorage>,
    /// Authorization requests waiting for login or consent.
    pub pending: Arc<PendingAuthorizations>,
    /// Configuration, for discovery.
    pub config: Arc<AuthConfig>,
}

impl IssuerState {
    /// Creates the state with an empty pending-authorization map.
    #[must_use]
    pub fn new(
        issuer: Arc<TokenIssuer>,
        clients: Arc<dyn ClientStorage>,
        consents: Arc<dyn ConsentStorage>,
        config: Arc<AuthConfig>,
    ) -> Self {
        Self {
            issuer,
            clients,
            consents,
            pending: Arc::new(PendingAuthorizations::default()),
            config,
        }
    }
}

/// Authorization server routes.
pub fn issuer_router(state: IssuerState) -> Router {
    Router::new()
        .route("/oauth2/token", post(token::token_handler))
        .route("/oauth2/jwks", get(jwks::jwks_handler))
        .route(
            "/oauth2/authorize",
            get(authorize::authorize_get).post(authorize::authorize_post),
        )
        .route(
            "/.well-known/openid-configuration",
            get(discovery::openid_configuration_handler),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(discovery::authorization_server_metadata_handler),
        )
        .with_state(state)
}

/// Browser login routes.
pub fn login_router(bridge: Arc<LoginBridge>) -> Router {
    Router::new()
        .route(
            "/oauth2/authorization/{registration_id}",
            get(login::login_handler),
        )
        .route(
            "/login/oauth2/code/{registration_id}",
            get(login::callback_handler),
        )
        .route("/api/auth/status", get(login::status_handler))
        .route("/api/auth/user", get(login::user_handler))
        .route("/logout", get(login::logout_handler).post(login::logout_handler))
        .with_state(bridge)
}
