//! Token issuance.
//!
//! [`TokenIssuer`] authenticates clients and resource owners, enforces grant
//! type and scope eligibility, drives the [`Authorization`] state machine and
//! signs tokens with the active key of the [`KeyRing`].
//!
//! Checks run in a fixed order so error codes are predictable:
//!
//! 1. client authentication (`invalid_client`)
//! 2. grant type allowed for the client (`unauthorized_client`)
//! 3. requested scope within the client's scopes (`invalid_scope`)
//! 4. grant-specific validation (`invalid_grant`)

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::keyed_lock::KeyedLocks;
use crate::oauth::client_auth::ClientCredentials;
use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
use crate::oauth::token::{TokenRequest, TokenResponse};
use crate::oauth::authorize::ValidatedAuthorizationRequest;
use crate::secret::verify_secret;
use crate::storage::{AuthorizationStorage, ClientStorage, PrincipalStorage};
use crate::token::claims::{TokenType, customize};
use crate::token::jwt::{AccessTokenClaims, IdTokenClaims, Jwks};
use crate::token::keys::KeyRing;
use crate::types::{
    Authorization, GrantType, Principal, RegisteredClient, TokenKind, TokenSegment,
    generate_token, hash_token, join_scope, parse_scope,
};

/// Scope that triggers ID token issuance.
pub const OPENID_SCOPE: &str = "openid";

// =============================================================================
// Grants
// =============================================================================

/// A parsed token request.
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    /// Service-to-service.
    ClientCredentials,
    /// Code exchange.
    AuthorizationCode {
        /// Raw authorization code.
        code: String,
        /// Redirect URI the code was bound to.
        redirect_uri: String,
        /// PKCE verifier.
        code_verifier: Option<String>,
    },
    /// Refresh.
    RefreshToken {
        /// Raw refresh token.
        refresh_token: String,
    },
    /// Resource owner password credentials.
    Password {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // raw codes, tokens and passwords stay out of logs
        write!(f, "Grant({})", self.grant_type())
    }
}

impl Grant {
    /// The grant type.
    #[must_use]
    pub fn grant_type(&self) -> GrantType {
        match self {
            Self::ClientCredentials => GrantType::ClientCredentials,
            Self::AuthorizationCode { .. } => GrantType::AuthorizationCode,
            Self::RefreshToken { .. } => GrantType::RefreshToken,
            Self::Password { .. } => GrantType::Password,
        }
    }

    /// Parses the grant out of a token request.
    ///
    /// # Errors
    ///
    /// `UnsupportedGrantType` for unknown grant types, `InvalidRequest` for
    /// missing parameters.
    pub fn from_request(request: &TokenRequest) -> AuthResult<Self> {
        if request.grant_type.is_empty() {
            return Err(AuthError::invalid_request("Missing grant_type parameter"));
        }
        let grant_type = GrantType::parse(&request.grant_type)
            .ok_or_else(|| AuthError::unsupported_grant_type(&request.grant_type))?;
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AuthError::invalid_request(format!("Missing {name} parameter")))
        };

        Ok(match grant_type {
            GrantType::ClientCredentials => Self::ClientCredentials,
            GrantType::AuthorizationCode => Self::AuthorizationCode {
                code: required(&request.code, "code")?,
                redirect_uri: required(&request.redirect_uri, "redirect_uri")?,
                code_verifier: request.code_verifier.clone(),
            },
            GrantType::RefreshToken => Self::RefreshToken {
                refresh_token: required(&request.refresh_token, "refresh_token")?,
            },
            GrantType::Password => Self::Password {
                username: required(&request.username, "username")?,
                password: required(&request.password, "password")?,
            },
        })
    }
}

/// Result of a successful issuance.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    /// Signed access token.
    pub access_token: String,
    /// Raw refresh token, if any.
    pub refresh_token: Option<String>,
    /// Signed ID token, if any.
    pub id_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Granted scopes.
    pub scope: BTreeSet<String>,
    /// Id of the authorization record.
    pub authorization_id: String,
}

impl std::fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("authorization_id", &self.authorization_id)
            .finish_non_exhaustive()
    }
}

impl From<IssuedTokens> for TokenResponse {
    fn from(tokens: IssuedTokens) -> Self {
        TokenResponse::new(tokens.access_token, tokens.expires_in, join_scope(&tokens.scope))
            .with_refresh_token(tokens.refresh_token)
            .with_id_token(tokens.id_token)
    }
}

// =============================================================================
// Issuer
// =============================================================================

/// Issues and signs tokens.
pub struct TokenIssuer {
    issuer: String,
    keys: Arc<KeyRing>,
    clients: Arc<dyn ClientStorage>,
    principals: Arc<dyn PrincipalStorage>,
    authorizations: Arc<dyn AuthorizationStorage>,
    grant_locks: KeyedLocks<String>,
}

impl TokenIssuer {
    /// Creates an issuer for `issuer` (the `iss` claim).
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        keys: Arc<KeyRing>,
        clients: Arc<dyn ClientStorage>,
        principals: Arc<dyn PrincipalStorage>,
        authorizations: Arc<dyn AuthorizationStorage>,
    ) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            keys,
            clients,
            principals,
            authorizations,
            grant_locks: KeyedLocks::new(),
        }
    }

    /// The `iss` value.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The signing key ring.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Public key set of every published key.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.keys.jwks()
    }

    /// Handles a token endpoint request.
    ///
    /// # Errors
    ///
    /// See [`Self::issue_token`].
    pub async fn handle_token_request(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> AuthResult<TokenResponse> {
        let grant = Grant::from_request(request)?;
        let tokens = self
            .issue_token(grant, credentials, request.scope.as_deref())
            .await?;
        Ok(tokens.into())
    }

    /// Issues tokens for `grant`.
    ///
    /// An empty or absent `requested_scope` means every scope the client (or,
    /// for refresh, the original grant) allows.
    ///
    /// # Errors
    ///
    /// `InvalidClient`, `UnauthorizedClient`, `InvalidScope`, `InvalidGrant`
    /// as described in the module docs; `Internal` if signing fails.
    pub async fn issue_token(
        &self,
        grant: Grant,
        credentials: &ClientCredentials,
        requested_scope: Option<&str>,
    ) -> AuthResult<IssuedTokens> {
        let grant_type = grant.grant_type();
        let client = self.authenticate_client(credentials, grant_type).await?;

        if !client.is_grant_type_allowed(grant_type) {
            tracing::debug!(client_id = %client.client_id, %grant_type, "Grant type not allowed");
            return Err(AuthError::unauthorized_client(format!(
                "Client is not allowed to use the {grant_type} grant"
            )));
        }

        let requested = parse_scope(requested_scope.unwrap_or_default());
        let disallowed = client.disallowed_scopes(&requested);
        if !disallowed.is_empty() {
            tracing::debug!(client_id = %client.client_id, ?disallowed, "Scope not allowed");
            return Err(AuthError::invalid_scope(format!(
                "Scope not allowed: {}",
                disallowed.join(" ")
            )));
        }

        let result = match grant {
            Grant::ClientCredentials => self.client_credentials(&client, requested).await,
            Grant::Password { username, password } => {
                self.password(&client, &username, &password, requested)
                    .await
            }
            Grant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                self.authorization_code(&client, &code, &redirect_uri, code_verifier)
                    .await
            }
            Grant::RefreshToken { refresh_token } => {
                self.refresh_token(&client, &refresh_token, requested).await
            }
        };

        match &result {
            Ok(tokens) => tracing::info!(
                client_id = %client.client_id,
                %grant_type,
                scope = %join_scope(&tokens.scope),
                authorization_id = %tokens.authorization_id,
                "Issued tokens"
            ),
            Err(e) => tracing::debug!(
                client_id = %client.client_id,
                %grant_type,
                error = %e,
                "Token request rejected"
            ),
        }
        result
    }

    // -------------------------------------------------------------------------
    // Authentication
    // -------------------------------------------------------------------------

    /// Authenticates a client.
    ///
    /// Public clients (no stored secret) may only use authorization_code and
    /// refresh_token, and must not present a secret.
    ///
    /// # Errors
    ///
    /// `InvalidClient` for unknown clients and bad secrets.
    pub async fn authenticate_client(
        &self,
        credentials: &ClientCredentials,
        grant_type: GrantType,
    ) -> AuthResult<RegisteredClient> {
        let client = self
            .clients
            .find_by_client_id(&credentials.client_id)
            .await?
            .ok_or_else(|| {
                tracing::debug!(client_id = %credentials.client_id, "Unknown client");
                AuthError::invalid_client("Client authentication failed")
            })?;

        match (&client.client_secret_hash, &credentials.client_secret) {
            (Some(hash), Some(secret)) => {
                let verified = verify_secret(secret, hash).map_err(|e| {
                    AuthError::internal(format!("Stored client secret hash is invalid: {e}"))
                })?;
                if !verified {
                    tracing::debug!(client_id = %client.client_id, "Bad client secret");
                    return Err(AuthError::invalid_client("Client authentication failed"));
                }
            }
            (None, None)
                if matches!(
                    grant_type,
                    GrantType::AuthorizationCode | GrantType::RefreshToken
                ) => {}
            _ => {
                tracing::debug!(client_id = %client.client_id, "Client authentication method mismatch");
                return Err(AuthError::invalid_client("Client authentication failed"));
            }
        }
        Ok(client)
    }

    /// Verifies resource owner credentials.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for unknown users, bad passwords and unusable accounts.
    pub async fn authenticate_principal(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<Principal> {
        let bad_credentials = || AuthError::invalid_grant("Bad resource owner credentials");
        let principal = self
            .principals
            .find_by_username(username)
            .await?
            .ok_or_else(bad_credentials)?;
        let Some(hash) = principal.password_hash.as_deref() else {
            return Err(bad_credentials());
        };
        let verified = verify_secret(password, hash)
            .map_err(|e| AuthError::internal(format!("Stored password hash is invalid: {e}")))?;
        if !verified {
            tracing::debug!(username, "Bad password");
            return Err(bad_credentials());
        }
        if !principal.is_usable() {
            tracing::debug!(username, "Principal disabled, locked or expired");
            return Err(AuthError::invalid_grant("Account is not usable"));
        }
        Ok(principal)
    }

    // -------------------------------------------------------------------------
    // Authorization codes
    // -------------------------------------------------------------------------

    /// Issues a single-use authorization code for an approved request.
    ///
    /// Returns the raw code; only its hash is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn create_authorization_code(
        &self,
        client: &RegisteredClient,
        principal: &Principal,
        request: &ValidatedAuthorizationRequest,
    ) -> AuthResult<String> {
        let now = OffsetDateTime::now_utc();
        let code = generate_token();
        let mut authorization = Authorization::new(
            &client.id,
            &principal.username,
            GrantType::AuthorizationCode,
            request.scopes.clone(),
        );
        authorization.issue_code(
            TokenSegment::new(
                hash_token(&code),
                now,
                client.token_settings.authorization_code_ttl,
                request.scopes.clone(),
            ),
            &request.redirect_uri,
            request.code_challenge.clone(),
            request.nonce.clone(),
        )?;
        tracing::debug!(
            client_id = %client.client_id,
            username = %principal.username,
            authorization_id = %authorization.id,
            "Issued authorization code"
        );
        self.authorizations.save(authorization).await?;
        Ok(code)
    }

    // -------------------------------------------------------------------------
    // Grant handlers
    // -------------------------------------------------------------------------

    async fn client_credentials(
        &self,
        client: &RegisteredClient,
        requested: BTreeSet<String>,
    ) -> AuthResult<IssuedTokens> {
        let granted = if requested.is_empty() {
            client.scopes.clone()
        } else {
            requested
        };
        let principal = Principal::service_account(&client.client_id, &granted);
        let mut authorization = Authorization::new(
            &client.id,
            &client.client_id,
            GrantType::ClientCredentials,
            granted.clone(),
        );

        let now = OffsetDateTime::now_utc();
        let (access_token, access_segment) =
            self.sign_access_token(client, &principal, &granted, now)?;
        authorization.issue_tokens(access_segment, None, None)?;
        let authorization_id = authorization.id.clone();
        self.authorizations.save(authorization).await?;

        Ok(IssuedTokens {
            access_token,
            refresh_token: None,
            id_token: None,
            expires_in: client.token_settings.access_token_ttl.as_secs(),
            scope: granted,
            authorization_id,
        })
    }

    async fn password(
        &self,
        client: &RegisteredClient,
        username: &str,
        password: &str,
        requested: BTreeSet<String>,
    ) -> AuthResult<IssuedTokens> {
        let principal = self.authenticate_principal(username, password).await?;
        let granted = if requested.is_empty() {
            client.scopes.clone()
        } else {
            requested
        };
        let mut authorization = Authorization::new(
            &client.id,
            &principal.username,
            GrantType::Password,
            granted.clone(),
        );

        let now = OffsetDateTime::now_utc();
        let (access_token, access_segment) =
            self.sign_access_token(client, &principal, &granted, now)?;
        let (refresh_token, refresh_segment) = self.new_refresh_token(client, &granted, now);
        let (id_token, id_segment) =
            self.sign_id_token(client, &principal, &granted, None, now)?;
        authorization.issue_tokens(access_segment, refresh_segment, id_segment)?;
        let authorization_id = authorization.id.clone();
        self.authorizations.save(authorization).await?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            id_token,
            expires_in: client.token_settings.access_token_ttl.as_secs(),
            scope: granted,
            authorization_id,
        })
    }

    async fn authorization_code(
        &self,
        client: &RegisteredClient,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<String>,
    ) -> AuthResult<IssuedTokens> {
        let code_hash = hash_token(code);
        let found = self
            .authorizations
            .find_by_token(&code_hash, TokenKind::AuthorizationCode)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid authorization code"))?;

        let _guard = self.grant_locks.lock(&found.id).await;
        // reload under the lock so concurrent exchanges see each other
        let mut authorization = self
            .authorizations
            .find_by_id(&found.id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid authorization code"))?;

        if authorization.registered_client_id != client.id {
            return Err(AuthError::invalid_grant(
                "Authorization code was issued to another client",
            ));
        }

        let consumed = authorization
            .authorization_code
            .as_ref()
            .is_none_or(|segment| segment.invalidated);
        if consumed {
            tracing::warn!(
                client_id = %client.client_id,
                authorization_id = %authorization.id,
                "Authorization code replay, invalidating authorization"
            );
            authorization.invalidate_all();
            self.authorizations.save(authorization).await?;
            return Err(AuthError::invalid_grant(
                "Authorization code has already been used",
            ));
        }

        if authorization.redirect_uri.as_deref() != Some(redirect_uri) {
            return Err(AuthError::invalid_grant(
                "Redirect URI does not match authorization request",
            ));
        }

        match (&authorization.code_challenge, code_verifier) {
            (Some(challenge), Some(verifier)) => {
                let verifier = PkceVerifier::new(verifier)
                    .map_err(|e| AuthError::invalid_grant(format!("Invalid code_verifier: {e}")))?;
                PkceChallenge::new(challenge.clone())
                    .and_then(|challenge| challenge.verify(&verifier))
                    .map_err(|_| AuthError::invalid_grant("PKCE verification failed"))?;
            }
            (Some(_), None) => {
                return Err(AuthError::invalid_grant("Missing code_verifier"));
            }
            (None, Some(_)) => {
                return Err(AuthError::invalid_grant(
                    "code_verifier sent but no challenge was registered",
                ));
            }
            (None, None) => {}
        }

        let now = OffsetDateTime::now_utc();
        authorization.consume_code(now)?;

        let principal = match self.usable_principal(&authorization.principal_name).await {
            Ok(principal) => principal,
            Err(e) => {
                self.authorizations.save(authorization).await?;
                return Err(e);
            }
        };
        let granted = authorization.scopes.clone();
        let (access_token, access_segment) =
            self.sign_access_token(client, &principal, &granted, now)?;
        let (refresh_token, refresh_segment) = self.new_refresh_token(client, &granted, now);
        let nonce = authorization.nonce.clone();
        let (id_token, id_segment) =
            self.sign_id_token(client, &principal, &granted, nonce, now)?;
        authorization.issue_tokens(access_segment, refresh_segment, id_segment)?;
        let authorization_id = authorization.id.clone();
        self.authorizations.save(authorization).await?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            id_token,
            expires_in: client.token_settings.access_token_ttl.as_secs(),
            scope: granted,
            authorization_id,
        })
    }

    async fn refresh_token(
        &self,
        client: &RegisteredClient,
        refresh_token: &str,
        requested: BTreeSet<String>,
    ) -> AuthResult<IssuedTokens> {
        let token_hash = hash_token(refresh_token);
        let found = self
            .authorizations
            .find_by_token(&token_hash, TokenKind::RefreshToken)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid refresh token"))?;

        let _guard = self.grant_locks.lock(&found.id).await;
        let mut authorization = self
            .authorizations
            .find_by_id(&found.id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid refresh token"))?;

        if authorization.registered_client_id != client.id {
            return Err(AuthError::invalid_grant(
                "Refresh token was issued to another client",
            ));
        }
        let now = OffsetDateTime::now_utc();
        // a rotated-out token still resolves through the history
        if authorization
            .refresh_token
            .as_ref()
            .is_none_or(|current| current.value != token_hash || !current.is_active(now))
        {
            return Err(AuthError::invalid_grant("Refresh token has been invalidated"));
        }

        let granted = if requested.is_empty() {
            authorization.scopes.clone()
        } else if requested.is_subset(&authorization.scopes) {
            requested
        } else {
            return Err(AuthError::invalid_scope(
                "Requested scope exceeds original grant",
            ));
        };

        let principal = self.usable_principal(&authorization.principal_name).await?;
        let (access_token, access_segment) =
            self.sign_access_token(client, &principal, &granted, now)?;

        let (new_refresh_token, rotated_segment) = if client.token_settings.reuse_refresh_tokens {
            (refresh_token.to_string(), None)
        } else {
            let (token, segment) = self.new_refresh_token(client, &authorization.scopes, now);
            match (token, segment) {
                (Some(token), Some(segment)) => (token, Some(segment)),
                _ => (refresh_token.to_string(), None),
            }
        };
        let (id_token, id_segment) =
            self.sign_id_token(client, &principal, &granted, None, now)?;

        authorization.refresh(access_segment, rotated_segment, id_segment, now)?;
        let authorization_id = authorization.id.clone();
        self.authorizations.save(authorization).await?;

        Ok(IssuedTokens {
            access_token,
            refresh_token: Some(new_refresh_token),
            id_token,
            expires_in: client.token_settings.access_token_ttl.as_secs(),
            scope: granted,
            authorization_id,
        })
    }

    // -------------------------------------------------------------------------
    // Token construction
    // -------------------------------------------------------------------------

    async fn usable_principal(&self, name: &str) -> AuthResult<Principal> {
        match self.principals.find_by_username(name).await? {
            Some(principal) if principal.is_usable() => Ok(principal),
            _ => Err(AuthError::invalid_grant("Account is not usable")),
        }
    }

    /// The principal as seen in tokens: its authorities plus granted scopes.
    fn token_subject(principal: &Principal, granted: &BTreeSet<String>) -> Principal {
        principal.clone().with_authorities(granted.iter().cloned())
    }

    fn sign_access_token(
        &self,
        client: &RegisteredClient,
        principal: &Principal,
        granted: &BTreeSet<String>,
        now: OffsetDateTime,
    ) -> AuthResult<(String, TokenSegment)> {
        let ttl = client.token_settings.access_token_ttl;
        let subject = Self::token_subject(principal, granted);
        let claims = AccessTokenClaims::builder(&self.issuer, &principal.username, &client.client_id)
            .audience(client.token_audience())
            .issued_at(now, lifetime_secs(ttl))
            .scope(join_scope(granted))
            .extra(customize(TokenType::AccessToken, &subject))
            .build();

        let key = self.keys.active();
        let token = key
            .sign(&claims)
            .map_err(|e| AuthError::internal(format!("Failed to sign access token: {e}")))?;
        let segment = TokenSegment::new(claims.jti, now, ttl, granted.clone())
            .with_metadata("kid", key.kid.clone());
        Ok((token, segment))
    }

    fn sign_id_token(
        &self,
        client: &RegisteredClient,
        principal: &Principal,
        granted: &BTreeSet<String>,
        nonce: Option<String>,
        now: OffsetDateTime,
    ) -> AuthResult<(Option<String>, Option<TokenSegment>)> {
        if !granted.contains(OPENID_SCOPE) {
            return Ok((None, None));
        }
        let ttl = client.token_settings.id_token_ttl;
        let subject = Self::token_subject(principal, granted);
        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: principal.username.clone(),
            aud: vec![client.client_id.clone()],
            exp: now.unix_timestamp().saturating_add(lifetime_secs(ttl)),
            iat: now.unix_timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            nonce,
            email: principal.email.clone(),
            name: principal.name.clone(),
            extra: customize(TokenType::IdToken, &subject),
        };

        let key = self.keys.active();
        let token = key
            .sign(&claims)
            .map_err(|e| AuthError::internal(format!("Failed to sign ID token: {e}")))?;
        let segment = TokenSegment::new(claims.jti, now, ttl, granted.clone())
            .with_metadata("kid", key.kid.clone());
        Ok((Some(token), Some(segment)))
    }

    fn new_refresh_token(
        &self,
        client: &RegisteredClient,
        scopes: &BTreeSet<String>,
        now: OffsetDateTime,
    ) -> (Option<String>, Option<TokenSegment>) {
        if !client.is_grant_type_allowed(GrantType::RefreshToken) {
            return (None, None);
        }
        let token = generate_token();
        let segment = TokenSegment::new(
            hash_token(&token),
            now,
            client.token_settings.refresh_token_ttl,
            scopes.clone(),
        );
        (Some(token), Some(segment))
    }
}

/// Lifetime in whole seconds, clamped to the claim range.
fn lifetime_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jsonwebtoken::{Validation, decode, decode_header};

    use super::*;
    use crate::secret::hash_secret;
    use crate::storage::{
        InMemoryAuthorizationStorage, InMemoryClientStorage, InMemoryPrincipalStorage,
    };
    use crate::token::jwt::SigningAlgorithm;
    use crate::types::AuthorizationState;

    const ISSUER: &str = "http://localhost:9000";
    const REDIRECT: &str = "http://localhost:8080/login/oauth2/code/web";

    struct Fixture {
        issuer: TokenIssuer,
        authorizations: Arc<InMemoryAuthorizationStorage>,
        principals: Arc<InMemoryPrincipalStorage>,
    }

    async fn fixture(reuse_refresh_tokens: bool) -> Fixture {
        let clients = Arc::new(InMemoryClientStorage::new());
        let principals = Arc::new(InMemoryPrincipalStorage::new());
        let authorizations = Arc::new(InMemoryAuthorizationStorage::new());

        let mut service = RegisteredClient::new("test-client", "Test");
        service.client_secret_hash = Some(hash_secret("test-secret").unwrap());
        service.grant_types.insert(GrantType::ClientCredentials);
        service.scopes = parse_scope("backend.read backend.write");
        service.audience = Some("booking-service".to_string());
        clients.save(service).await.unwrap();

        let mut web = RegisteredClient::new("web-client", "Web");
        web.client_secret_hash = Some(hash_secret("web-secret").unwrap());
        web.grant_types.extend([
            GrantType::AuthorizationCode,
            GrantType::RefreshToken,
            GrantType::Password,
        ]);
        web.scopes = parse_scope("openid profile backend.read");
        web.redirect_uris.push(REDIRECT.to_string());
        web.token_settings.reuse_refresh_tokens = reuse_refresh_tokens;
        clients.save(web).await.unwrap();

        let mut alice = Principal::new("alice").with_authorities(["ROLE_USER"]);
        alice.password_hash = Some(hash_secret("password").unwrap());
        alice.email = Some("alice@example.com".to_string());
        principals.save(alice).await.unwrap();

        let keys = Arc::new(
            KeyRing::generate(SigningAlgorithm::RS256, Duration::from_secs(3600)).unwrap(),
        );
        Fixture {
            issuer: TokenIssuer::new(
                ISSUER,
                keys,
                clients,
                principals.clone(),
                authorizations.clone(),
            ),
            authorizations,
            principals,
        }
    }

    fn payload(issuer: &TokenIssuer, token: &str) -> serde_json::Value {
        let header = decode_header(token).unwrap();
        let (key, algorithm) = issuer
            .keys()
            .decoding_key(header.kid.as_deref().unwrap())
            .unwrap();
        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        decode::<serde_json::Value>(token, &key, &validation)
            .unwrap()
            .claims
    }

    fn test_client() -> ClientCredentials {
        ClientCredentials::new("test-client", "test-secret")
    }

    fn web() -> ClientCredentials {
        ClientCredentials::new("web-client", "web-secret")
    }

    async fn code_for(f: &Fixture, challenge: Option<String>) -> String {
        let client = f
            .issuer
            .clients
            .find_by_client_id("web-client")
            .await
            .unwrap()
            .unwrap();
        let principal = f.principals.find_by_username("alice").await.unwrap().unwrap();
        let request = ValidatedAuthorizationRequest {
            client_id: "web-client".to_string(),
            redirect_uri: REDIRECT.to_string(),
            scopes: parse_scope("openid backend.read"),
            state: Some("s".to_string()),
            code_challenge: challenge,
            nonce: Some("n-1".to_string()),
        };
        f.issuer
            .create_authorization_code(&client, &principal, &request)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_client_credentials_token_shape() {
        let f = fixture(true).await;
        let tokens = f
            .issuer
            .issue_token(
                Grant::ClientCredentials,
                &test_client(),
                Some("backend.read backend.write"),
            )
            .await
            .unwrap();

        assert_eq!(tokens.access_token.split('.').count(), 3);
        assert!(tokens.refresh_token.is_none());
        let claims = payload(&f.issuer, &tokens.access_token);
        assert_eq!(claims["iss"], ISSUER);
        assert_eq!(claims["sub"], "test-client");
        assert_eq!(claims["aud"], serde_json::json!(["booking-service"]));
        assert_eq!(claims["scope"], "backend.read backend.write");
        assert!(claims["exp"].as_i64().unwrap() > claims["iat"].as_i64().unwrap());
        assert!(claims.get("roles").is_none());
    }

    #[tokio::test]
    async fn test_oversized_lifetime_saturates() {
        let f = fixture(true).await;
        let mut client = f
            .issuer
            .clients
            .find_by_client_id("test-client")
            .await
            .unwrap()
            .unwrap();
        client.token_settings.access_token_ttl = Duration::from_secs(u64::MAX);
        f.issuer.clients.save(client).await.unwrap();

        let tokens = f
            .issuer
            .issue_token(Grant::ClientCredentials, &test_client(), None)
            .await
            .unwrap();
        let claims = payload(&f.issuer, &tokens.access_token);
        assert_eq!(claims["exp"].as_i64(), Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_client_credentials_narrowing_and_default() {
        let f = fixture(true).await;
        let narrowed = f
            .issuer
            .issue_token(Grant::ClientCredentials, &test_client(), Some("backend.read"))
            .await
            .unwrap();
        assert_eq!(narrowed.scope, parse_scope("backend.read"));

        let all = f
            .issuer
            .issue_token(Grant::ClientCredentials, &test_client(), None)
            .await
            .unwrap();
        assert_eq!(all.scope, parse_scope("backend.read backend.write"));
    }

    #[tokio::test]
    async fn test_error_taxonomy() {
        let f = fixture(true).await;

        let err = f
            .issuer
            .issue_token(
                Grant::ClientCredentials,
                &ClientCredentials::new("test-client", "wrong"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient { .. }));

        let err = f
            .issuer
            .issue_token(
                Grant::ClientCredentials,
                &ClientCredentials::new("nobody", "x"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient { .. }));

        let err = f
            .issuer
            .issue_token(Grant::ClientCredentials, &web(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnauthorizedClient { .. }));

        let err = f
            .issuer
            .issue_token(Grant::ClientCredentials, &test_client(), Some("admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidScope { .. }));

        let err = f
            .issuer
            .issue_token(
                Grant::Password {
                    username: "alice".to_string(),
                    password: "nope".to_string(),
                },
                &web(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_password_grant_claims() {
        let f = fixture(true).await;
        let tokens = f
            .issuer
            .issue_token(
                Grant::Password {
                    username: "alice".to_string(),
                    password: "password".to_string(),
                },
                &web(),
                Some("openid backend.read"),
            )
            .await
            .unwrap();

        let access = payload(&f.issuer, &tokens.access_token);
        assert_eq!(access["sub"], "alice");
        assert_eq!(access["roles"], serde_json::json!(["ROLE_USER"]));
        assert_eq!(
            access["authorities"],
            serde_json::json!(["ROLE_USER", "backend.read", "openid"])
        );
        assert!(access.get("preferred_username").is_none());

        let id = payload(&f.issuer, tokens.id_token.as_deref().unwrap());
        assert_eq!(id["preferred_username"], "alice");
        assert_eq!(id["aud"], serde_json::json!(["web-client"]));
        assert_eq!(id["email"], "alice@example.com");
        assert!(tokens.refresh_token.is_some());
    }

    #[tokio::test]
    async fn test_disabled_principal_rejected() {
        let f = fixture(true).await;
        f.principals.set_enabled("alice", false).await.unwrap();
        let err = f
            .issuer
            .issue_token(
                Grant::Password {
                    username: "alice".to_string(),
                    password: "password".to_string(),
                },
                &web(),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_code_exchange_with_pkce_and_replay() {
        let f = fixture(true).await;
        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier).as_str().to_string();
        let code = code_for(&f, Some(challenge)).await;

        let grant = Grant::AuthorizationCode {
            code: code.clone(),
            redirect_uri: REDIRECT.to_string(),
            code_verifier: Some(verifier.as_str().to_string()),
        };
        let tokens = f.issuer.issue_token(grant.clone(), &web(), None).await.unwrap();
        let id = payload(&f.issuer, tokens.id_token.as_deref().unwrap());
        assert_eq!(id["nonce"], "n-1");

        let err = f.issuer.issue_token(grant, &web(), None).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");

        // the replay invalidated the whole authorization
        let record = f
            .authorizations
            .find_by_id(&tokens.authorization_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.recorded_state(), AuthorizationState::Expired);
        let refresh = Grant::RefreshToken {
            refresh_token: tokens.refresh_token.unwrap(),
        };
        assert!(f.issuer.issue_token(refresh, &web(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_verifier_and_redirect() {
        let f = fixture(true).await;
        let challenge = PkceChallenge::from_verifier(&PkceVerifier::generate())
            .as_str()
            .to_string();
        let code = code_for(&f, Some(challenge)).await;

        let err = f
            .issuer
            .issue_token(
                Grant::AuthorizationCode {
                    code: code.clone(),
                    redirect_uri: REDIRECT.to_string(),
                    code_verifier: Some(PkceVerifier::generate().as_str().to_string()),
                },
                &web(),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");

        let err = f
            .issuer
            .issue_token(
                Grant::AuthorizationCode {
                    code,
                    redirect_uri: "http://localhost:8080/other".to_string(),
                    code_verifier: None,
                },
                &web(),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    async fn password_tokens(f: &Fixture) -> IssuedTokens {
        f.issuer
            .issue_token(
                Grant::Password {
                    username: "alice".to_string(),
                    password: "password".to_string(),
                },
                &web(),
                Some("backend.read"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_refresh_with_reuse() {
        let f = fixture(true).await;
        let first = password_tokens(&f).await;
        let refresh_token = first.refresh_token.clone().unwrap();

        let second = f
            .issuer
            .issue_token(
                Grant::RefreshToken {
                    refresh_token: refresh_token.clone(),
                },
                &web(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(second.refresh_token.as_deref(), Some(refresh_token.as_str()));

        // the old token keeps working under reuse
        assert!(
            f.issuer
                .issue_token(Grant::RefreshToken { refresh_token }, &web(), None)
                .await
                .is_ok()
        );

        let record = f
            .authorizations
            .find_by_id(&first.authorization_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.recorded_state(), AuthorizationState::Refreshed);
        assert_eq!(record.history.len(), 2);
        assert!(record.history.iter().all(|(_, segment)| segment.invalidated));
    }

    #[tokio::test]
    async fn test_refresh_with_rotation() {
        let f = fixture(false).await;
        let first = password_tokens(&f).await;
        let original = first.refresh_token.clone().unwrap();

        let second = f
            .issuer
            .issue_token(
                Grant::RefreshToken {
                    refresh_token: original.clone(),
                },
                &web(),
                None,
            )
            .await
            .unwrap();
        let rotated = second.refresh_token.unwrap();
        assert_ne!(rotated, original);

        let err = f
            .issuer
            .issue_token(
                Grant::RefreshToken {
                    refresh_token: original,
                },
                &web(),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");

        assert!(
            f.issuer
                .issue_token(Grant::RefreshToken { refresh_token: rotated }, &web(), None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_refresh_cannot_widen_scope() {
        let f = fixture(true).await;
        let tokens = password_tokens(&f).await;
        let err = f
            .issuer
            .issue_token(
                Grant::RefreshToken {
                    refresh_token: tokens.refresh_token.unwrap(),
                },
                &web(),
                Some("backend.read openid"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidScope { .. }));
    }

    #[test]
    fn test_grant_from_request() {
        let request = TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: Some("c".to_string()),
            ..TokenRequest::default()
        };
        let err = Grant::from_request(&request).unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_request");

        let request = TokenRequest {
            grant_type: "implicit".to_string(),
            ..TokenRequest::default()
        };
        let err = Grant::from_request(&request).unwrap_err();
        assert_eq!(err.oauth_error_code(), "unsupported_grant_type");
    }
}
