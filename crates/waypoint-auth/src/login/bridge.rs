//! Authorization Code + PKCE login for browser sessions.
//!
//! ```text
//! GET /oauth2/authorization/{id}
//!     └─► begin(): state cookie + 302 to the issuer's authorize endpoint
//! GET /login/oauth2/code/{id}?code=..&state=..
//!     └─► complete(): verify cookie, compare state, exchange code,
//!         validate ID token, create session
//! GET /logout
//!     └─► logout(): drop session, evict the principal's cached tokens
//! ```

use std::sync::Arc;

use cookie::{Cookie, SameSite};
use serde::Deserialize;
use url::Url;

use crate::client::endpoint::{Registration, TokenEndpoint};
use crate::client::manager::ClientTokenManager;
use crate::config::{AuthConfig, LoginConfig};
use crate::login::LoginError;
use crate::login::session::{LoginSession, SessionStore};
use crate::login::state::{AuthorizationRequestState, StateCodec};
use crate::oauth::token::TokenRequest;
use crate::validation::TokenValidator;

/// Query parameters of the login callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,
    /// Echoed state.
    pub state: Option<String>,
    /// Error code when the issuer refused.
    pub error: Option<String>,
    /// Error description.
    pub error_description: Option<String>,
}

/// Result of [`LoginBridge::begin`].
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Issuer authorize URL to redirect the browser to.
    pub authorize_url: String,
    /// Signed state cookie to set.
    pub state_cookie: Cookie<'static>,
}

/// Result of [`LoginBridge::complete`].
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    /// The new session.
    pub session: LoginSession,
    /// Where to send the browser.
    pub return_to: String,
}

/// Drives the browser login flow against the issuer.
pub struct LoginBridge {
    config: LoginConfig,
    registration: Registration,
    authorization_uri: String,
    codec: StateCodec,
    endpoint: Arc<dyn TokenEndpoint>,
    validator: Arc<TokenValidator>,
    sessions: Arc<SessionStore>,
    clients: Option<Arc<ClientTokenManager>>,
}

impl std::fmt::Debug for LoginBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginBridge")
            .field("registration", &self.registration)
            .field("authorization_uri", &self.authorization_uri)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl LoginBridge {
    /// Creates a bridge from the `[auth.login]` section of `config`.
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        endpoint: Arc<dyn TokenEndpoint>,
        validator: Arc<TokenValidator>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let login = config.login.clone();
        let authorization_uri = login
            .authorization_uri
            .clone()
            .unwrap_or_else(|| config.authorization_endpoint());
        Self {
            registration: Registration::from_login(&login, &config.token_endpoint()),
            codec: StateCodec::new(login.state_signing_secret.as_bytes()),
            config: login,
            authorization_uri,
            endpoint,
            validator,
            sessions,
            clients: None,
        }
    }

    /// Caches the login client's tokens per principal in `clients`, and
    /// evicts them on logout.
    #[must_use]
    pub fn with_client_manager(mut self, clients: Arc<ClientTokenManager>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Login settings.
    #[must_use]
    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    /// Registration id the bridge serves.
    #[must_use]
    pub fn registration_id(&self) -> &str {
        &self.registration.id
    }

    /// Session store.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Starts a login. `return_to` must be a local path; anything else is
    /// replaced with the configured post-login location.
    ///
    /// # Errors
    ///
    /// Returns an error if the authorize URL is invalid or signing fails.
    pub fn begin(&self, return_to: Option<&str>) -> Result<LoginRedirect, LoginError> {
        let return_to = return_to.filter(|path| is_local_path(path)).map(str::to_string);
        let request = AuthorizationRequestState::generate(
            &self.config.redirect_uri,
            return_to,
            self.config.state_cookie_ttl,
        );

        let mut url = Url::parse(&self.authorization_uri)
            .map_err(|e| LoginError::Configuration(format!("authorization_uri: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.registration.client_id)
            .append_pair("redirect_uri", &request.redirect_uri)
            .append_pair("scope", &self.registration.scopes.join(" "))
            .append_pair("state", &request.state)
            .append_pair("code_challenge", &request.code_challenge()?)
            .append_pair("code_challenge_method", "S256")
            .append_pair("nonce", &request.nonce);

        let sealed = self.codec.seal(&request)?;
        tracing::debug!(registration_id = %self.registration.id, "Starting browser login");
        Ok(LoginRedirect {
            authorize_url: url.to_string(),
            state_cookie: self.state_cookie(sealed),
        })
    }

    /// Finishes a login from the callback parameters and the state cookie.
    ///
    /// # Errors
    ///
    /// See [`LoginError`]. Nothing is stored on failure.
    pub async fn complete(
        &self,
        params: &CallbackParams,
        state_cookie: Option<&str>,
    ) -> Result<CompletedLogin, LoginError> {
        let request = self.codec.open(state_cookie.ok_or(LoginError::MissingState)?)?;

        if let Some(error) = &params.error {
            return Err(LoginError::AuthorizationDenied {
                error: error.clone(),
                description: params.error_description.clone(),
            });
        }
        if !params
            .state
            .as_deref()
            .is_some_and(|returned| request.state_matches(returned))
        {
            return Err(LoginError::StateMismatch);
        }
        let code = params.code.as_deref().ok_or(LoginError::MissingCode)?;

        let response = self
            .endpoint
            .request_token(
                &self.registration,
                &TokenRequest::authorization_code(code, &request.redirect_uri, &request.verifier),
            )
            .await?;

        let id_token = response
            .id_token
            .clone()
            .ok_or_else(|| LoginError::InvalidIdToken("no id_token in response".to_string()))?;
        let claims = self
            .validator
            .validate_id_token(&id_token, &self.registration.client_id, Some(&request.nonce))
            .await
            .map_err(|e| LoginError::InvalidIdToken(e.to_string()))?;

        let session = LoginSession::from_id_token(&claims, id_token, self.config.session_ttl);
        self.sessions.insert(session.clone());
        if let Some(clients) = &self.clients {
            clients.store(&self.registration.id, Some(&session.username), &response);
        }

        tracing::info!(
            username = %session.username,
            registration_id = %self.registration.id,
            "Browser login completed"
        );
        Ok(CompletedLogin {
            session,
            return_to: request
                .return_to
                .unwrap_or_else(|| self.config.post_login_redirect.clone()),
        })
    }

    /// The live session with `session_id`.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<LoginSession> {
        self.sessions.get(session_id)
    }

    /// Ends a session and evicts the principal's cached client tokens.
    /// Downstream client-credentials tokens are not revoked.
    pub fn logout(&self, session_id: &str) -> Option<LoginSession> {
        let session = self.sessions.remove(session_id)?;
        if let Some(clients) = &self.clients {
            clients.evict_principal(&session.username);
        }
        tracing::info!(username = %session.username, "Logged out");
        Some(session)
    }

    /// State cookie holding `value`.
    #[must_use]
    pub fn state_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.config.state_cookie_name.clone(), value))
            .path(self.config.callback_path())
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.config.secure_cookies)
            .max_age(to_cookie_duration(self.config.state_cookie_ttl))
            .build()
    }

    /// Expired state cookie for removal.
    #[must_use]
    pub fn state_cookie_removal(&self) -> Cookie<'static> {
        Cookie::build((self.config.state_cookie_name.clone(), ""))
            .path(self.config.callback_path())
            .max_age(time::Duration::ZERO)
            .build()
    }

    /// Session cookie for `session`.
    #[must_use]
    pub fn session_cookie(&self, session: &LoginSession) -> Cookie<'static> {
        Cookie::build((self.config.session_cookie_name.clone(), session.id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.config.secure_cookies)
            .max_age(to_cookie_duration(self.config.session_ttl))
            .build()
    }

    /// Expired session cookie for removal.
    #[must_use]
    pub fn session_cookie_removal(&self) -> Cookie<'static> {
        Cookie::build((self.config.session_cookie_name.clone(), ""))
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

fn to_cookie_duration(duration: std::time::Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}
