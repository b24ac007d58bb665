//! OAuth 2.0 authorization endpoint with server-rendered login and consent.
//!
//! # Flow
//!
//! ```text
//! GET /oauth2/authorize?client_id=...&redirect_uri=...
//!     ├─► unknown client / bad redirect_uri → error page (no redirect)
//!     ├─► other invalid parameters → redirect with error
//!     └─► valid → park request, render login form
//!
//! POST /oauth2/authorize (form data)
//!     ├─► action=login
//!     │   ├─► bad credentials → login form with error
//!     │   ├─► consent required and not on file → consent form
//!     │   └─► otherwise → issue code, redirect
//!     ├─► action=authorize → save consent, issue code, redirect
//!     └─► action=deny → redirect with error=access_denied
//! ```

use std::time::{Duration, Instant};

use axum::Form;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use dashmap::DashMap;
use serde::Deserialize;

use crate::error::AuthError;
use crate::http::IssuerState;
use crate::http::templates::{render_consent_form, render_error_page, render_login_form};
use crate::oauth::authorize::{
    AuthorizationError, AuthorizationErrorCode, AuthorizationRequest, AuthorizeRejection,
    ValidatedAuthorizationRequest, success_redirect, validate_request,
};
use crate::types::{Principal, RegisteredClient, generate_token};

/// How long a parked authorization request waits for the user.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(600);

/// An authorization request waiting for login or consent.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// The validated request.
    pub request: ValidatedAuthorizationRequest,
    /// The requesting client.
    pub client: RegisteredClient,
    /// The authenticated principal, once the login form was accepted.
    pub principal: Option<Principal>,
    created_at: Instant,
}

impl PendingAuthorization {
    /// Parks `request` for `client`.
    #[must_use]
    pub fn new(request: ValidatedAuthorizationRequest, client: RegisteredClient) -> Self {
        Self {
            request,
            client,
            principal: None,
            created_at: Instant::now(),
        }
    }
}

/// Parked authorization requests keyed by an unguessable id carried in the
/// forms.
#[derive(Debug)]
pub struct PendingAuthorizations {
    entries: DashMap<String, PendingAuthorization>,
    ttl: Duration,
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_TTL)
    }
}

impl PendingAuthorizations {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Parks `pending` and returns its id.
    pub fn insert(&self, pending: PendingAuthorization) -> String {
        let id = generate_token();
        self.entries.insert(id.clone(), pending);
        id
    }

    /// The live entry for `id`. Expired entries are dropped.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<PendingAuthorization> {
        let entry = self.entries.get(id)?.clone();
        if entry.created_at.elapsed() > self.ttl {
            self.entries.remove(id);
            return None;
        }
        Some(entry)
    }

    /// Replaces the entry for `id`.
    pub fn update(&self, id: &str, pending: PendingAuthorization) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            *entry = pending;
        }
    }

    /// Removes and returns the entry for `id`.
    pub fn take(&self, id: &str) -> Option<PendingAuthorization> {
        self.entries
            .remove(id)
            .map(|(_, pending)| pending)
            .filter(|pending| pending.created_at.elapsed() <= self.ttl)
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, pending| pending.created_at.elapsed() <= self.ttl);
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Form data of `POST /oauth2/authorize`.
#[derive(Debug, Deserialize)]
pub struct AuthorizeFormData {
    /// "login", "authorize" or "deny".
    pub action: String,
    /// Pending authorization id from the hidden field.
    pub pending_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// `GET /oauth2/authorize`.
pub async fn authorize_get(
    State(state): State<IssuerState>,
    Query(params): Query<AuthorizationRequest>,
) -> Response {
    let Some(client_id) = params.client_id.as_deref().filter(|id| !id.is_empty()) else {
        return error_page(StatusCode::BAD_REQUEST, "invalid_request", "Missing client_id");
    };

    let client = match state.clients.find_by_client_id(client_id).await {
        Ok(Some(client)) => client,
        Ok(None) => {
            tracing::debug!(client_id, "Authorization request for unknown client");
            return error_page(
                StatusCode::BAD_REQUEST,
                "invalid_client",
                &format!("Unknown client: {client_id}"),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to look up client");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Failed to validate client",
            );
        }
    };

    let request = match validate_request(&params, &client) {
        Ok(request) => request,
        Err(AuthorizeRejection::Display { message }) => {
            return error_page(StatusCode::BAD_REQUEST, "invalid_request", &message);
        }
        Err(AuthorizeRejection::Redirect(error)) => return redirect_with_error(&error),
    };

    let client_name = client.client_name.clone();
    let pending_id = state.pending.insert(PendingAuthorization::new(request, client));
    Html(render_login_form(&client_name, &pending_id, None)).into_response()
}

/// `POST /oauth2/authorize`.
pub async fn authorize_post(
    State(state): State<IssuerState>,
    Form(form): Form<AuthorizeFormData>,
) -> Response {
    let Some(pending) = state.pending.get(&form.pending_id) else {
        return error_page(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Authorization request expired or not found",
        );
    };

    match form.action.as_str() {
        "login" => handle_login(&state, &form, pending).await,
        "authorize" => handle_authorize(&state, &form.pending_id, pending).await,
        "deny" => {
            state.pending.take(&form.pending_id);
            tracing::info!(client_id = %pending.client.client_id, "Authorization denied by user");
            redirect_with_error(&AuthorizationError {
                redirect_uri: pending.request.redirect_uri,
                error: AuthorizationErrorCode::AccessDenied,
                error_description: Some("The user denied the request".to_string()),
                state: pending.request.state,
            })
        }
        _ => error_page(StatusCode::BAD_REQUEST, "invalid_request", "Invalid action"),
    }
}

async fn handle_login(
    state: &IssuerState,
    form: &AuthorizeFormData,
    mut pending: PendingAuthorization,
) -> Response {
    let username = form.username.as_deref().unwrap_or_default();
    let password = form.password.as_deref().unwrap_or_default();
    let client_name = pending.client.client_name.clone();

    if username.is_empty() || password.is_empty() {
        return Html(render_login_form(
            &client_name,
            &form.pending_id,
            Some("Username and password are required"),
        ))
        .into_response();
    }

    let principal = match state.issuer.authenticate_principal(username, password).await {
        Ok(principal) => principal,
        Err(AuthError::InvalidGrant { .. }) => {
            return Html(render_login_form(
                &client_name,
                &form.pending_id,
                Some("Invalid username or password"),
            ))
            .into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "Principal authentication failed");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Authentication failed",
            );
        }
    };

    match needs_consent(state, &pending, &principal).await {
        Ok(true) => {
            let scopes: Vec<&str> = pending.request.scopes.iter().map(String::as_str).collect();
            let html = render_consent_form(
                &client_name,
                &pending.request.redirect_uri,
                &scopes,
                &form.pending_id,
            );
            pending.principal = Some(principal);
            state.pending.update(&form.pending_id, pending);
            Html(html).into_response()
        }
        Ok(false) => {
            state.pending.take(&form.pending_id);
            issue_code(state, &pending, &principal).await
        }
        Err(e) => {
            tracing::error!(error = %e, "Consent lookup failed");
            server_error_redirect(&pending)
        }
    }
}

async fn handle_authorize(
    state: &IssuerState,
    pending_id: &str,
    pending: PendingAuthorization,
) -> Response {
    let Some(principal) = pending.principal.clone() else {
        return Html(render_login_form(
            &pending.client.client_name,
            pending_id,
            Some("Please sign in first"),
        ))
        .into_response();
    };
    state.pending.take(pending_id);

    if let Err(e) = state
        .consents
        .save(&pending.client.id, &principal.username, &pending.request.scopes)
        .await
    {
        tracing::error!(error = %e, "Failed to save consent");
        return server_error_redirect(&pending);
    }
    issue_code(state, &pending, &principal).await
}

async fn needs_consent(
    state: &IssuerState,
    pending: &PendingAuthorization,
    principal: &Principal,
) -> crate::AuthResult<bool> {
    if !pending.client.require_consent {
        return Ok(false);
    }
    let consent = state
        .consents
        .find(&pending.client.id, &principal.username)
        .await?;
    Ok(!consent.is_some_and(|consent| consent.covers(&pending.request.scopes)))
}

async fn issue_code(
    state: &IssuerState,
    pending: &PendingAuthorization,
    principal: &Principal,
) -> Response {
    let code = match state
        .issuer
        .create_authorization_code(&pending.client, principal, &pending.request)
        .await
    {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Failed to issue authorization code");
            return server_error_redirect(pending);
        }
    };

    match success_redirect(
        &pending.request.redirect_uri,
        &code,
        pending.request.state.as_deref(),
    ) {
        Ok(url) => {
            tracing::info!(
                client_id = %pending.client.client_id,
                username = %principal.username,
                "Authorization code issued"
            );
            Redirect::to(&url).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Registered redirect_uri does not parse");
            error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Invalid redirect URI",
            )
        }
    }
}

fn server_error_redirect(pending: &PendingAuthorization) -> Response {
    redirect_with_error(&AuthorizationError {
        redirect_uri: pending.request.redirect_uri.clone(),
        error: AuthorizationErrorCode::ServerError,
        error_description: Some("The authorization server failed".to_string()),
        state: pending.request.state.clone(),
    })
}

fn redirect_with_error(error: &AuthorizationError) -> Response {
    match error.to_redirect_url() {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(_) => error_page(
            StatusCode::BAD_REQUEST,
            error.error.as_str(),
            error.error_description.as_deref().unwrap_or_default(),
        ),
    }
}

fn error_page(status: StatusCode, code: &str, description: &str) -> Response {
    (status, Html(render_error_page(code, description))).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;
    use url::Url;

    use super::*;
    use crate::config::AuthConfig;
    use crate::http::issuer_router;
    use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
    use crate::secret::hash_secret;
    use crate::storage::{
        ClientStorage, InMemoryAuthorizationStorage, InMemoryClientStorage,
        InMemoryConsentStorage, InMemoryPrincipalStorage, PrincipalStorage,
    };
    use crate::token::{KeyRing, SigningAlgorithm, TokenIssuer};
    use crate::types::{GrantType, parse_scope};

    const REDIRECT: &str = "http://localhost:8080/login/oauth2/code/web";

    async fn app(require_consent: bool) -> axum::Router {
        let clients = Arc::new(InMemoryClientStorage::new());
        let mut client = RegisteredClient::new("web-client", "Web");
        client.client_secret_hash = Some(hash_secret("web-secret").unwrap());
        client.grant_types.insert(GrantType::AuthorizationCode);
        client.redirect_uris.push(REDIRECT.to_string());
        client.scopes = parse_scope("openid profile backend.read");
        client.require_consent = require_consent;
        clients.save(client).await.unwrap();

        let principals = Arc::new(InMemoryPrincipalStorage::new());
        let mut alice = Principal::new("alice").with_authorities(["ROLE_USER"]);
        alice.password_hash = Some(hash_secret("password").unwrap());
        principals.save(alice).await.unwrap();

        let keys = Arc::new(
            KeyRing::generate(SigningAlgorithm::RS256, Duration::from_secs(3600)).unwrap(),
        );
        let config = AuthConfig::default();
        let issuer = Arc::new(TokenIssuer::new(
            config.issuer_url(),
            keys,
            clients.clone(),
            principals,
            Arc::new(InMemoryAuthorizationStorage::new()),
        ));
        issuer_router(IssuerState::new(
            issuer,
            clients,
            Arc::new(InMemoryConsentStorage::new()),
            Arc::new(config),
        ))
    }

    fn authorize_uri(redirect_uri: &str) -> String {
        let challenge = PkceChallenge::from_verifier(&PkceVerifier::generate());
        let mut url = Url::parse("http://localhost/oauth2/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", "web-client")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", "openid backend.read")
            .append_pair("state", "xyz")
            .append_pair("code_challenge", challenge.as_str())
            .append_pair("code_challenge_method", "S256");
        format!("{}?{}", url.path(), url.query().unwrap())
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn pending_id(html: &str) -> String {
        let marker = "name=\"pending_id\" value=\"";
        let start = html.find(marker).unwrap() + marker.len();
        let end = start + html[start..].find('"').unwrap();
        html[start..end].to_string()
    }

    fn post(form: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/oauth2/authorize")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap()
    }

    async fn start(app: &axum::Router) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(authorize_uri(REDIRECT))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        pending_id(&body_text(response).await)
    }

    fn location(response: &Response) -> Url {
        Url::parse(response.headers()[header::LOCATION].to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_unregistered_redirect_uri_is_not_redirected() {
        let response = app(false)
            .await
            .oneshot(
                Request::builder()
                    .uri(authorize_uri("http://evil.example/cb"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[tokio::test]
    async fn test_login_issues_code_with_state() {
        let app = app(false).await;
        let id = start(&app).await;

        let response = app
            .oneshot(post(&format!(
                "action=login&pending_id={id}&username=alice&password=password"
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = location(&response);
        assert!(location.as_str().starts_with(REDIRECT));
        let params: std::collections::HashMap<_, _> = location.query_pairs().into_owned().collect();
        assert_eq!(params["state"], "xyz");
        assert_eq!(params["code"].len(), 43);
    }

    #[tokio::test]
    async fn test_bad_password_rerenders_login() {
        let app = app(false).await;
        let id = start(&app).await;

        let response = app
            .oneshot(post(&format!(
                "action=login&pending_id={id}&username=alice&password=wrong"
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Invalid username or password"));
    }

    #[tokio::test]
    async fn test_consent_then_authorize() {
        let app = app(true).await;
        let id = start(&app).await;

        let response = app
            .clone()
            .oneshot(post(&format!(
                "action=login&pending_id={id}&username=alice&password=password"
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("value=\"authorize\""));

        let response = app
            .oneshot(post(&format!("action=authorize&pending_id={id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).query_pairs().any(|(k, _)| k == "code"));
    }

    #[tokio::test]
    async fn test_deny_redirects_access_denied() {
        let app = app(true).await;
        let id = start(&app).await;

        let response = app
            .clone()
            .oneshot(post(&format!("action=deny&pending_id={id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let params: std::collections::HashMap<_, _> =
            location(&response).query_pairs().into_owned().collect();
        assert_eq!(params["error"], "access_denied");
        assert_eq!(params["state"], "xyz");

        // the pending request is gone
        let response = app
            .oneshot(post(&format!("action=authorize&pending_id={id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_pending_entries_expire() {
        let pending = PendingAuthorizations::new(Duration::ZERO);
        let request = ValidatedAuthorizationRequest {
            client_id: "web-client".to_string(),
            redirect_uri: REDIRECT.to_string(),
            scopes: parse_scope("openid"),
            state: None,
            code_challenge: None,
            nonce: None,
        };
        let id = pending.insert(PendingAuthorization::new(
            request,
            RegisteredClient::new("web-client", "Web"),
        ));
        std::thread::sleep(Duration::from_millis(2));
        assert!(pending.get(&id).is_none());
        assert!(pending.is_empty());
    }
}
