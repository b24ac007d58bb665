//! JWKS endpoint.
//!
//! Publishes the public half of every key in the ring that has not been
//! pruned, so tokens signed by a retired key keep validating until they
//! expire.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::http::IssuerState;

/// `GET /oauth2/jwks`.
pub async fn jwks_handler(State(state): State<IssuerState>) -> impl IntoResponse {
    let jwks = state.issuer.jwks();
    tracing::trace!(keys = jwks.keys.len(), "Serving JWKS");
    (
        [(header::CACHE_CONTROL, "public, max-age=60")],
        Json(jwks),
    )
}
