//! OAuth 2.0 token endpoint.
//!
//! ```text
//! POST /oauth2/token
//! Content-Type: application/x-www-form-urlencoded
//! Authorization: Basic <base64(client_id:client_secret)>
//!
//! grant_type=client_credentials&scope=backend.read backend.write
//! ```
//!
//! Every response, success or error, carries `Cache-Control: no-store`.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, PRAGMA};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Form;

use crate::AuthResult;
use crate::error::AuthError;
use crate::http::IssuerState;
use crate::oauth::client_auth::ClientCredentials;
use crate::oauth::token::{TokenRequest, TokenResponse};

/// `POST /oauth2/token`.
pub async fn token_handler(
    State(state): State<IssuerState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let result = match form {
        Ok(Form(request)) => handle(&state, &headers, &request).await,
        Err(rejection) => Err(AuthError::invalid_request(rejection.body_text())),
    };

    let mut response = match result {
        Ok(tokens) => Json(tokens).into_response(),
        Err(err) => err.into_response(),
    };
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

async fn handle(
    state: &IssuerState,
    headers: &HeaderMap,
    request: &TokenRequest,
) -> AuthResult<TokenResponse> {
    let authorization = headers
        .get(AUTHORIZATION)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AuthError::invalid_client("Malformed Authorization header"))
        })
        .transpose()?;
    let credentials = ClientCredentials::resolve(
        authorization,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;

    tracing::debug!(
        client_id = %credentials.client_id,
        grant_type = %request.grant_type,
        "Processing token request"
    );

    state
        .issuer
        .handle_token_request(request, &credentials)
        .await
        .inspect_err(|err| {
            tracing::warn!(
                client_id = %credentials.client_id,
                grant_type = %request.grant_type,
                error = %err,
                "Token request failed"
            );
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tower::ServiceExt;

    use super::*;
    use crate::config::AuthConfig;
    use crate::http::issuer_router;
    use crate::oauth::token::TokenErrorResponse;
    use crate::secret::hash_secret;
    use crate::storage::{
        InMemoryAuthorizationStorage, InMemoryClientStorage, InMemoryConsentStorage,
        InMemoryPrincipalStorage,
    };
    use crate::token::{KeyRing, SigningAlgorithm, TokenIssuer};
    use crate::types::{GrantType, RegisteredClient, parse_scope};

    async fn app() -> axum::Router {
        let clients = Arc::new(InMemoryClientStorage::new());
        let mut client = RegisteredClient::new("test-client", "Test");
        client.client_secret_hash = Some(hash_secret("test-secret").unwrap());
        client.grant_types.insert(GrantType::ClientCredentials);
        client.scopes = parse_scope("backend.read backend.write");
        crate::storage::ClientStorage::save(clients.as_ref(), client)
            .await
            .unwrap();

        let config = AuthConfig::default();
        let keys = Arc::new(
            KeyRing::generate(SigningAlgorithm::RS256, Duration::from_secs(3600)).unwrap(),
        );
        let issuer = Arc::new(TokenIssuer::new(
            config.issuer_url(),
            keys,
            clients.clone(),
            Arc::new(InMemoryPrincipalStorage::new()),
            Arc::new(InMemoryAuthorizationStorage::new()),
        ));
        issuer_router(IssuerState::new(
            issuer,
            clients,
            Arc::new(InMemoryConsentStorage::new()),
            Arc::new(config),
        ))
    }

    fn token_request(basic: Option<(&str, &str)>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/oauth2/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some((id, secret)) = basic {
            builder = builder.header(
                AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(format!("{id}:{secret}"))),
            );
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_client_credentials_issues_jwt() {
        let response = app()
            .await
            .oneshot(token_request(
                Some(("test-client", "test-secret")),
                "grant_type=client_credentials&scope=backend.read%20backend.write",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");

        let body: TokenResponse = json(response).await;
        assert_eq!(body.access_token.split('.').count(), 3);
        assert_eq!(body.token_type, "Bearer");
        assert_eq!(body.scope, "backend.read backend.write");
        assert!(body.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_client_secret_post() {
        let response = app()
            .await
            .oneshot(token_request(
                None,
                "grant_type=client_credentials&client_id=test-client&client_secret=test-secret",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_secret_is_401_with_basic_challenge() {
        let response = app()
            .await
            .oneshot(token_request(
                Some(("test-client", "wrong")),
                "grant_type=client_credentials",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
        assert!(
            response.headers()[header::WWW_AUTHENTICATE]
                .to_str()
                .unwrap()
                .starts_with("Basic")
        );
        let body: TokenErrorResponse = json(response).await;
        assert_eq!(body.error, "invalid_client");
    }

    #[tokio::test]
    async fn test_disallowed_scope_is_400() {
        let response = app()
            .await
            .oneshot(token_request(
                Some(("test-client", "test-secret")),
                "grant_type=client_credentials&scope=admin",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: TokenErrorResponse = json(response).await;
        assert_eq!(body.error, "invalid_scope");
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let response = app()
            .await
            .oneshot(token_request(
                Some(("test-client", "test-secret")),
                "grant_type=urn:ietf:params:oauth:grant-type:device_code",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: TokenErrorResponse = json(response).await;
        assert_eq!(body.error, "unsupported_grant_type");
    }
}
