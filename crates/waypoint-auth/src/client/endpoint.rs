//! Client registrations and the issuer's token endpoint as seen by a client.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::error::ClientTokenError;
use crate::config::{LoginConfig, RegistrationConfig};
use crate::oauth::client_auth::ClientCredentials;
use crate::oauth::token::{TokenErrorResponse, TokenRequest, TokenResponse};
use crate::token::TokenIssuer;

/// One outbound client registration: who we are at the issuer and what we ask for.
#[derive(Clone)]
pub struct Registration {
    /// Registration id (local name of the hop).
    pub id: String,
    /// Client id at the issuer.
    pub client_id: String,
    /// Client secret at the issuer.
    pub client_secret: String,
    /// Token endpoint URL.
    pub token_uri: String,
    /// Scopes requested with client_credentials.
    pub scopes: Vec<String>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl Registration {
    /// Builds a registration from configuration. `default_token_uri` is used
    /// when the registration does not name its own endpoint.
    #[must_use]
    pub fn from_config(id: &str, config: &RegistrationConfig, default_token_uri: &str) -> Self {
        Self {
            id: id.to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_uri: config
                .token_uri
                .clone()
                .unwrap_or_else(|| default_token_uri.to_string()),
            scopes: config.scopes.clone(),
        }
    }

    /// The browser login client as a registration.
    #[must_use]
    pub fn from_login(config: &LoginConfig, default_token_uri: &str) -> Self {
        Self {
            id: config.registration_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_uri: config
                .token_uri
                .clone()
                .unwrap_or_else(|| default_token_uri.to_string()),
            scopes: config.scopes.clone(),
        }
    }

    /// Space-delimited scope, or `None` when no scopes are configured.
    #[must_use]
    pub fn scope(&self) -> Option<String> {
        (!self.scopes.is_empty()).then(|| self.scopes.join(" "))
    }
}

/// The issuer's token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Sends `request` authenticated as `registration`.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientTokenError`] describing the failure.
    async fn request_token(
        &self,
        registration: &Registration,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ClientTokenError>;
}

/// [`TokenEndpoint`] over HTTP with `client_secret_basic`.
#[derive(Debug, Clone, Default)]
pub struct HttpTokenEndpoint {
    http_client: reqwest::Client,
}

impl HttpTokenEndpoint {
    /// Creates an endpoint using `http_client`.
    #[must_use]
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn request_token(
        &self,
        registration: &Registration,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ClientTokenError> {
        tracing::debug!(
            registration_id = %registration.id,
            grant_type = %request.grant_type,
            token_uri = %registration.token_uri,
            "Requesting token"
        );

        let response = self
            .http_client
            .post(&registration.token_uri)
            .basic_auth(&registration.client_id, Some(&registration.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenResponse>()
                .await
                .map_err(|e| ClientTokenError::InvalidResponse(e.to_string()));
        }

        let code = status.as_u16();
        if status.is_server_error() {
            return Err(ClientTokenError::Server { status: code });
        }
        if code == 429 {
            return Err(ClientTokenError::RateLimited);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(oauth) => ClientTokenError::Rejected {
                status: code,
                error: oauth.error,
                description: oauth.error_description,
            },
            Err(_) => ClientTokenError::Rejected {
                status: code,
                error: format!("http_{code}"),
                description: None,
            },
        })
    }
}

/// [`TokenEndpoint`] calling an in-process [`TokenIssuer`].
///
/// Used when the issuer and its client run in the same process, which
/// skips the loopback HTTP round trip.
#[derive(Clone)]
pub struct IssuerTokenEndpoint {
    issuer: Arc<TokenIssuer>,
}

impl IssuerTokenEndpoint {
    /// Wraps `issuer`.
    #[must_use]
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl TokenEndpoint for IssuerTokenEndpoint {
    async fn request_token(
        &self,
        registration: &Registration,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ClientTokenError> {
        let credentials = ClientCredentials::new(
            registration.client_id.as_str(),
            registration.client_secret.as_str(),
        );
        self.issuer
            .handle_token_request(request, &credentials)
            .await
            .map_err(|err| ClientTokenError::Rejected {
                status: err.status_code().as_u16(),
                error: err.oauth_error_code().to_string(),
                description: Some(err.public_description()),
            })
    }
}

/// Serves registrations that point at this node's own token endpoint
/// in-process and sends everything else over HTTP.
#[derive(Clone)]
pub struct RoutingTokenEndpoint {
    local_token_uri: String,
    local: IssuerTokenEndpoint,
    remote: HttpTokenEndpoint,
}

impl RoutingTokenEndpoint {
    #[must_use]
    pub fn new(
        local_token_uri: impl Into<String>,
        local: IssuerTokenEndpoint,
        remote: HttpTokenEndpoint,
    ) -> Self {
        Self {
            local_token_uri: local_token_uri.into(),
            local,
            remote,
        }
    }

    fn is_local(&self, registration: &Registration) -> bool {
        registration.token_uri.trim_end_matches('/') == self.local_token_uri.trim_end_matches('/')
    }
}

#[async_trait]
impl TokenEndpoint for RoutingTokenEndpoint {
    async fn request_token(
        &self,
        registration: &Registration,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ClientTokenError> {
        if self.is_local(registration) {
            self.local.request_token(registration, request).await
        } else {
            self.remote.request_token(registration, request).await
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn registration(server: &MockServer) -> Registration {
        Registration {
            id: "bookings".to_string(),
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            token_uri: format!("{}/oauth2/token", server.uri()),
            scopes: vec!["backend.read".to_string(), "backend.write".to_string()],
        }
    }

    #[tokio::test]
    async fn test_sends_basic_auth_and_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            // base64("test-client:test-secret")
            .and(header(
                "authorization",
                "Basic dGVzdC1jbGllbnQ6dGVzdC1zZWNyZXQ=",
            ))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("scope=backend.read+backend.write"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a.b.c",
                "token_type": "Bearer",
                "expires_in": 300,
                "scope": "backend.read backend.write"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let registration = registration(&server);
        let response = HttpTokenEndpoint::default()
            .request_token(
                &registration,
                &TokenRequest::client_credentials(registration.scope()),
            )
            .await
            .unwrap();
        assert_eq!(response.access_token, "a.b.c");
        assert_eq!(response.expires_in, 300);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "Client authentication failed"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let endpoint = HttpTokenEndpoint::default();
        let registration = registration(&server);
        let request = TokenRequest::client_credentials(None);

        let err = endpoint.request_token(&registration, &request).await.unwrap_err();
        assert!(matches!(&err, ClientTokenError::Rejected { error, .. } if error == "invalid_client"));
        assert!(!err.is_transient());

        let err = endpoint.request_token(&registration, &request).await.unwrap_err();
        assert!(matches!(err, ClientTokenError::Server { status: 502 }));

        let err = endpoint.request_token(&registration, &request).await.unwrap_err();
        assert!(matches!(err, ClientTokenError::RateLimited));
    }

    #[tokio::test]
    async fn test_routing_serves_own_token_uri_in_process() {
        use std::time::Duration;

        use crate::secret::hash_secret;
        use crate::storage::{
            ClientStorage, InMemoryAuthorizationStorage, InMemoryClientStorage,
            InMemoryPrincipalStorage,
        };
        use crate::token::{KeyRing, SigningAlgorithm};
        use crate::types::{GrantType, RegisteredClient, parse_scope};

        let clients = Arc::new(InMemoryClientStorage::new());
        let mut client = RegisteredClient::new("test-client", "Test");
        client.client_secret_hash = Some(hash_secret("test-secret").unwrap());
        client.grant_types.insert(GrantType::ClientCredentials);
        client.scopes = parse_scope("backend.read backend.write");
        clients.save(client).await.unwrap();
        let keys = Arc::new(
            KeyRing::generate(SigningAlgorithm::RS256, Duration::from_secs(3600)).unwrap(),
        );
        let issuer = Arc::new(TokenIssuer::new(
            "http://localhost:9000",
            keys,
            clients,
            Arc::new(InMemoryPrincipalStorage::new()),
            Arc::new(InMemoryAuthorizationStorage::new()),
        ));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "remote.token.value",
                "token_type": "Bearer",
                "expires_in": 300
            })))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = RoutingTokenEndpoint::new(
            "http://localhost:9000/oauth2/token/",
            IssuerTokenEndpoint::new(issuer),
            HttpTokenEndpoint::default(),
        );
        let request = TokenRequest::client_credentials(None);

        let mut local = registration(&server);
        local.token_uri = "http://localhost:9000/oauth2/token".to_string();
        let response = endpoint.request_token(&local, &request).await.unwrap();
        assert_eq!(response.access_token.split('.').count(), 3);
        assert_ne!(response.access_token, "remote.token.value");

        let remote = registration(&server);
        let response = endpoint.request_token(&remote, &request).await.unwrap();
        assert_eq!(response.access_token, "remote.token.value");
    }
}
