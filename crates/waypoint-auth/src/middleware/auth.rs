//! Request authentication and policy enforcement.
//!
//! [`enforce`] runs in front of every route:
//!
//! 1. select the [`SecurityChain`](crate::policy::SecurityChain) for the path
//!    (no chain: 401)
//! 2. authenticate with the chain's mechanism; a credential that is
//!    presented but invalid is rejected, never downgraded to anonymous
//! 3. ask the chain's policy for a [`Decision`](crate::policy::Decision)
//! 4. on allow, insert the [`AuthContext`] into request extensions
//!
//! Handlers read the caller with the [`Authenticated`] extractor.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::{ACCEPT, AUTHORIZATION};
use axum::http::request::Parts;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;

use crate::AuthResult;
use crate::error::AuthError;
use crate::login::SessionStore;
use crate::middleware::types::AuthContext;
use crate::policy::{Decision, DenyReason, Mechanism, SecurityChains};
use crate::validation::TokenValidator;

/// State for [`enforce`].
#[derive(Clone)]
pub struct AuthState {
    /// Bearer token validator.
    pub validator: Arc<TokenValidator>,
    /// Security chains in evaluation order.
    pub chains: Arc<SecurityChains>,
    /// Login sessions, for `Session` chains.
    pub sessions: Option<Arc<SessionStore>>,
    /// Session cookie name.
    pub session_cookie_name: String,
    /// Where browsers without a session are sent.
    pub login_path: Option<String>,
}

impl AuthState {
    /// Creates a state without session support.
    #[must_use]
    pub fn new(validator: Arc<TokenValidator>, chains: Arc<SecurityChains>) -> Self {
        Self {
            validator,
            chains,
            sessions: None,
            session_cookie_name: String::new(),
            login_path: None,
        }
    }

    /// Enables `Session` chains.
    #[must_use]
    pub fn with_sessions(
        mut self,
        sessions: Arc<SessionStore>,
        cookie_name: impl Into<String>,
        login_path: impl Into<String>,
    ) -> Self {
        self.sessions = Some(sessions);
        self.session_cookie_name = cookie_name.into();
        self.login_path = Some(login_path.into());
        self
    }

    async fn authenticate(
        &self,
        mechanism: Mechanism,
        parts: &Parts,
    ) -> AuthResult<Option<AuthContext>> {
        match mechanism {
            Mechanism::None => Ok(None),
            Mechanism::Bearer => {
                let Some(token) = bearer_token(parts)? else {
                    return Ok(None);
                };
                let claims = self.validator.validate(token).await?;
                Ok(Some(AuthContext::from_claims(claims)))
            }
            Mechanism::Session => {
                let jar = CookieJar::from_headers(&parts.headers);
                let session = self.sessions.as_ref().and_then(|sessions| {
                    jar.get(&self.session_cookie_name)
                        .and_then(|cookie| sessions.get(cookie.value()))
                });
                Ok(session.map(AuthContext::from_session))
            }
        }
    }
}

/// Extracts the bearer token. `Ok(None)` when no `Authorization` header is
/// present.
///
/// # Errors
///
/// `InvalidToken` for a non-Bearer or empty header.
pub fn bearer_token(parts: &Parts) -> AuthResult<Option<&str>> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = header
        .to_str()
        .map_err(|_| AuthError::invalid_token("non-ASCII Authorization header"))?;
    match value.split_once(' ') {
        Some((scheme, token))
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
        {
            Ok(Some(token.trim()))
        }
        _ => Err(AuthError::invalid_token("Authorization header is not a bearer token")),
    }
}

/// Authentication and authorization middleware.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn enforce(State(state): State<AuthState>, req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().as_str().to_string();

    let Some(chain) = state.chains.select(&path) else {
        tracing::debug!(%method, %path, "No security chain matches");
        return AuthError::unauthenticated("no security chain").into_response();
    };

    let (mut parts, body) = req.into_parts();
    let context = match state.authenticate(chain.mechanism, &parts).await {
        Ok(context) => context,
        Err(err) => {
            tracing::debug!(chain = %chain.name, %method, %path, error = %err, "Authentication failed");
            return err.into_response();
        }
    };

    let decision = chain
        .policy
        .decide(&method, &path, context.as_ref().map(|c| &c.authorities));

    match decision.clone().into_result() {
        Ok(()) => {
            if let Some(context) = context {
                parts.extensions.insert(context);
            }
            next.run(Request::from_parts(parts, body)).await
        }
        Err(err) => {
            tracing::debug!(
                chain = %chain.name,
                %method,
                %path,
                rule = %decision.rule(),
                status = decision.status_code().as_u16(),
                "Request denied"
            );
            let unauthenticated = matches!(
                decision,
                Decision::Deny {
                    reason: DenyReason::Unauthenticated,
                    ..
                }
            );
            if unauthenticated
                && chain.mechanism == Mechanism::Session
                && wants_html(&parts)
                && let Some(login_path) = &state.login_path
            {
                return Redirect::to(login_path).into_response();
            }
            err.into_response()
        }
    }
}

fn wants_html(parts: &Parts) -> bool {
    parts
        .headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

/// Extractor for the caller authenticated by [`enforce`].
///
/// Rejects with 401 when the route was reached without a credential.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthContext);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AuthError::unauthenticated("no authenticated caller"))
    }
}

/// Like [`Authenticated`] but never rejects.
#[derive(Debug, Clone)]
pub struct MaybeAuthenticated(pub Option<AuthContext>);

impl<S> FromRequestParts<S> for MaybeAuthenticated
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<AuthContext>().cloned()))
    }
}
