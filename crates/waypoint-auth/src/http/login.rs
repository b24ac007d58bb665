//! Browser login routes backed by [`LoginBridge`].

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::login::{CallbackParams, LoginBridge, LoginSession};

/// Query of the login entry point.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginQuery {
    /// Local path to return to after login.
    pub return_to: Option<String>,
}

/// Body of `GET /api/auth/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    /// Whether the request carries a live session.
    pub authenticated: bool,
    /// Session username, when authenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Where to start a login, when anonymous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
}

fn current_session(bridge: &LoginBridge, jar: &CookieJar) -> Option<LoginSession> {
    jar.get(&bridge.config().session_cookie_name)
        .and_then(|cookie| bridge.session(cookie.value()))
}

/// `GET /oauth2/authorization/{registration_id}`: starts a login.
pub async fn login_handler(
    State(bridge): State<Arc<LoginBridge>>,
    Path(registration_id): Path<String>,
    Query(query): Query<LoginQuery>,
    jar: CookieJar,
) -> Response {
    if registration_id != bridge.registration_id() {
        return StatusCode::NOT_FOUND.into_response();
    }
    match bridge.begin(query.return_to.as_deref()) {
        Ok(redirect) => (
            jar.add(redirect.state_cookie),
            Redirect::to(&redirect.authorize_url),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /login/oauth2/code/{registration_id}`: finishes a login.
///
/// The state cookie is cleared whatever the outcome.
pub async fn callback_handler(
    State(bridge): State<Arc<LoginBridge>>,
    Path(registration_id): Path<String>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    if registration_id != bridge.registration_id() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let state_cookie = jar
        .get(&bridge.config().state_cookie_name)
        .map(|cookie| cookie.value().to_string());
    let jar = jar.add(bridge.state_cookie_removal());

    match bridge.complete(&params, state_cookie.as_deref()).await {
        Ok(login) => (
            jar.add(bridge.session_cookie(&login.session)),
            Redirect::to(&login.return_to),
        )
            .into_response(),
        Err(e) => (jar, e).into_response(),
    }
}

/// `GET /api/auth/status`.
pub async fn status_handler(
    State(bridge): State<Arc<LoginBridge>>,
    jar: CookieJar,
) -> Json<AuthStatus> {
    Json(match current_session(&bridge, &jar) {
        Some(session) => AuthStatus {
            authenticated: true,
            username: Some(session.username),
            login_url: None,
        },
        None => AuthStatus {
            authenticated: false,
            username: None,
            login_url: Some(bridge.config().login_path()),
        },
    })
}

/// `GET /api/auth/user`: `{username, email, name, roles}` or 401.
pub async fn user_handler(
    State(bridge): State<Arc<LoginBridge>>,
    jar: CookieJar,
) -> Result<Json<LoginSession>, AuthError> {
    current_session(&bridge, &jar)
        .map(Json)
        .ok_or_else(|| AuthError::unauthenticated("no login session"))
}

/// `GET /logout`: ends the session and clears its cookie.
pub async fn logout_handler(State(bridge): State<Arc<LoginBridge>>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(&bridge.config().session_cookie_name) {
        bridge.logout(cookie.value());
    }
    (
        jar.add(bridge.session_cookie_removal()),
        Redirect::to(&bridge.config().post_logout_redirect),
    )
        .into_response()
}
