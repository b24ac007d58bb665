//! Issued-authorization records and their state machine.
//!
//! One [`Authorization`] exists per issued grant. It moves through
//!
//! ```text
//! REQUESTED -> CODE_ISSUED (interactive only) -> TOKEN_ISSUED -> [REFRESHED]* -> EXPIRED
//! ```
//!
//! Codes and refresh tokens are stored as SHA-256 digests; access and ID
//! tokens are stored by `jti`. Superseded segments stay on the record,
//! invalidated, for audit.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::types::client::GrantType;

/// Lifecycle state of an authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationState {
    /// Created, nothing issued yet.
    Requested,
    /// Authorization code issued, awaiting exchange.
    CodeIssued,
    /// Tokens issued.
    TokenIssued,
    /// Tokens re-issued from a refresh token.
    Refreshed,
    /// Every segment has expired or been invalidated.
    Expired,
}

/// Kind of token segment, used for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Authorization code (stored hashed).
    AuthorizationCode,
    /// Access token (stored by `jti`).
    AccessToken,
    /// Refresh token (stored hashed).
    RefreshToken,
    /// ID token (stored by `jti`).
    IdToken,
}

/// One issued token within an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSegment {
    /// Digest or `jti`, never a raw secret.
    pub value: String,
    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    /// Expiry time.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Scopes bound to this segment.
    pub scopes: BTreeSet<String>,
    /// Set once the segment is consumed or superseded.
    pub invalidated: bool,
    /// Free-form metadata (e.g. `kid`).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TokenSegment {
    /// Creates a segment valid for `ttl` from `issued_at`.
    #[must_use]
    pub fn new(
        value: impl Into<String>,
        issued_at: OffsetDateTime,
        ttl: Duration,
        scopes: BTreeSet<String>,
    ) -> Self {
        Self {
            value: value.into(),
            issued_at,
            expires_at: issued_at
                .saturating_add(time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX)),
            scopes,
            invalidated: false,
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns `true` if past `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if neither expired nor invalidated.
    #[must_use]
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        !self.invalidated && !self.is_expired(now)
    }

    /// Seconds until expiry, floored at zero.
    #[must_use]
    pub fn expires_in(&self, now: OffsetDateTime) -> u64 {
        (self.expires_at - now).whole_seconds().max(0) as u64
    }
}

/// An issued grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// Record id.
    pub id: String,
    /// Internal id of the registered client.
    pub registered_client_id: String,
    /// Username of the principal, or the client id for service accounts.
    pub principal_name: String,
    /// Grant that created the record.
    pub grant_type: GrantType,
    /// Granted scopes.
    pub scopes: BTreeSet<String>,
    state: AuthorizationState,
    /// Pending or consumed authorization code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<TokenSegment>,
    /// The single live access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<TokenSegment>,
    /// Current refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<TokenSegment>,
    /// Latest ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<TokenSegment>,
    /// Superseded segments kept for audit.
    #[serde(default)]
    pub history: Vec<(TokenKind, TokenSegment)>,
    /// Redirect URI bound to the code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    /// S256 PKCE challenge bound to the code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    /// OpenID Connect nonce bound to the code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Authorization {
    /// Creates a record in the `REQUESTED` state.
    #[must_use]
    pub fn new(
        registered_client_id: impl Into<String>,
        principal_name: impl Into<String>,
        grant_type: GrantType,
        scopes: BTreeSet<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            registered_client_id: registered_client_id.into(),
            principal_name: principal_name.into(),
            grant_type,
            scopes,
            state: AuthorizationState::Requested,
            authorization_code: None,
            access_token: None,
            refresh_token: None,
            id_token: None,
            history: Vec::new(),
            redirect_uri: None,
            code_challenge: None,
            nonce: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Stored state, ignoring expiry. See [`Self::state_at`].
    #[must_use]
    pub fn recorded_state(&self) -> AuthorizationState {
        self.state
    }

    /// Effective state at `now`: `EXPIRED` once nothing is live any more.
    #[must_use]
    pub fn state_at(&self, now: OffsetDateTime) -> AuthorizationState {
        let live = |segment: &Option<TokenSegment>| {
            segment.as_ref().is_some_and(|s| s.is_active(now))
        };
        match self.state {
            AuthorizationState::Requested => AuthorizationState::Requested,
            AuthorizationState::Expired => AuthorizationState::Expired,
            AuthorizationState::CodeIssued if !live(&self.authorization_code) => {
                AuthorizationState::Expired
            }
            AuthorizationState::TokenIssued | AuthorizationState::Refreshed
                if !live(&self.access_token) && !live(&self.refresh_token) =>
            {
                AuthorizationState::Expired
            }
            state => state,
        }
    }

    /// `REQUESTED -> CODE_ISSUED`.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` if the record is not an authorization_code grant in `REQUESTED`.
    pub fn issue_code(
        &mut self,
        code: TokenSegment,
        redirect_uri: impl Into<String>,
        code_challenge: Option<String>,
        nonce: Option<String>,
    ) -> AuthResult<()> {
        if self.grant_type != GrantType::AuthorizationCode
            || self.state != AuthorizationState::Requested
        {
            return Err(self.illegal_transition("issue code"));
        }
        self.authorization_code = Some(code);
        self.redirect_uri = Some(redirect_uri.into());
        self.code_challenge = code_challenge;
        self.nonce = nonce;
        self.state = AuthorizationState::CodeIssued;
        Ok(())
    }

    /// Marks the authorization code as used.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` if the code is missing, expired or already consumed.
    pub fn consume_code(&mut self, now: OffsetDateTime) -> AuthResult<()> {
        if self.state != AuthorizationState::CodeIssued {
            return Err(self.illegal_transition("consume code"));
        }
        let code = self
            .authorization_code
            .as_mut()
            .ok_or_else(|| AuthError::invalid_grant("Authorization code not found"))?;
        if code.invalidated {
            return Err(AuthError::invalid_grant(
                "Authorization code has already been used",
            ));
        }
        if code.is_expired(now) {
            return Err(AuthError::invalid_grant("Authorization code has expired"));
        }
        code.invalidated = true;
        Ok(())
    }

    /// `REQUESTED | CODE_ISSUED (consumed) -> TOKEN_ISSUED`.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` on any other source state or when an interactive grant
    /// still holds an unconsumed code.
    pub fn issue_tokens(
        &mut self,
        access_token: TokenSegment,
        refresh_token: Option<TokenSegment>,
        id_token: Option<TokenSegment>,
    ) -> AuthResult<()> {
        let allowed = match self.state {
            AuthorizationState::Requested => self.grant_type != GrantType::AuthorizationCode,
            AuthorizationState::CodeIssued => self
                .authorization_code
                .as_ref()
                .is_some_and(|code| code.invalidated),
            _ => false,
        };
        if !allowed {
            return Err(self.illegal_transition("issue tokens"));
        }
        self.access_token = Some(access_token);
        self.refresh_token = refresh_token;
        self.id_token = id_token;
        self.state = AuthorizationState::TokenIssued;
        Ok(())
    }

    /// `TOKEN_ISSUED | REFRESHED -> REFRESHED`.
    ///
    /// The prior access token is invalidated. When `rotated_refresh_token`
    /// is `Some`, the old refresh token is invalidated and replaced;
    /// otherwise it stays valid (reuse).
    ///
    /// # Errors
    ///
    /// `InvalidGrant` if the record holds no active refresh token.
    pub fn refresh(
        &mut self,
        access_token: TokenSegment,
        rotated_refresh_token: Option<TokenSegment>,
        id_token: Option<TokenSegment>,
        now: OffsetDateTime,
    ) -> AuthResult<()> {
        if !matches!(
            self.state,
            AuthorizationState::TokenIssued | AuthorizationState::Refreshed
        ) {
            return Err(self.illegal_transition("refresh"));
        }
        if !self
            .refresh_token
            .as_ref()
            .is_some_and(|token| token.is_active(now))
        {
            return Err(AuthError::invalid_grant(
                "Refresh token is expired or invalidated",
            ));
        }

        if let Some(mut previous) = self.access_token.replace(access_token) {
            previous.invalidated = true;
            self.history.push((TokenKind::AccessToken, previous));
        }
        if let Some(rotated) = rotated_refresh_token
            && let Some(mut previous) = self.refresh_token.replace(rotated)
        {
            previous.invalidated = true;
            self.history.push((TokenKind::RefreshToken, previous));
        }
        if let Some(id_token) = id_token
            && let Some(previous) = self.id_token.replace(id_token)
        {
            self.history.push((TokenKind::IdToken, previous));
        }
        self.state = AuthorizationState::Refreshed;
        Ok(())
    }

    /// Invalidates every segment, e.g. after authorization code replay.
    pub fn invalidate_all(&mut self) {
        for segment in [
            &mut self.authorization_code,
            &mut self.access_token,
            &mut self.refresh_token,
            &mut self.id_token,
        ]
        .into_iter()
        .flatten()
        {
            segment.invalidated = true;
        }
        self.state = AuthorizationState::Expired;
    }

    /// Returns the live segment of `kind` matching `value`, if any.
    #[must_use]
    pub fn segment(&self, kind: TokenKind) -> Option<&TokenSegment> {
        match kind {
            TokenKind::AuthorizationCode => self.authorization_code.as_ref(),
            TokenKind::AccessToken => self.access_token.as_ref(),
            TokenKind::RefreshToken => self.refresh_token.as_ref(),
            TokenKind::IdToken => self.id_token.as_ref(),
        }
    }

    fn illegal_transition(&self, action: &str) -> AuthError {
        tracing::debug!(
            authorization_id = %self.id,
            state = ?self.state,
            grant_type = %self.grant_type,
            action,
            "Illegal authorization state transition"
        );
        AuthError::invalid_grant(format!("Cannot {action} in current authorization state"))
    }
}

/// Hashes a code or refresh token for storage and lookup.
#[must_use]
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates a 256-bit random token, base64url encoded (43 characters).
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes() -> BTreeSet<String> {
        crate::types::parse_scope("openid backend.read")
    }

    fn segment(ttl_secs: u64) -> TokenSegment {
        TokenSegment::new(
            generate_token(),
            OffsetDateTime::now_utc(),
            Duration::from_secs(ttl_secs),
            scopes(),
        )
    }

    fn code_authorization() -> Authorization {
        let mut auth = Authorization::new("c-1", "alice", GrantType::AuthorizationCode, scopes());
        auth.issue_code(segment(300), "http://localhost/cb", None, None)
            .unwrap();
        auth
    }

    #[test]
    fn test_interactive_lifecycle() {
        let now = OffsetDateTime::now_utc();
        let mut auth = code_authorization();
        assert_eq!(auth.state_at(now), AuthorizationState::CodeIssued);

        // tokens cannot be issued before the code is consumed
        assert!(auth.issue_tokens(segment(300), None, None).is_err());

        auth.consume_code(now).unwrap();
        auth.issue_tokens(segment(300), Some(segment(3600)), None)
            .unwrap();
        assert_eq!(auth.state_at(now), AuthorizationState::TokenIssued);

        auth.refresh(segment(300), None, None, now).unwrap();
        assert_eq!(auth.state_at(now), AuthorizationState::Refreshed);
        auth.refresh(segment(300), None, None, now).unwrap();
        assert_eq!(auth.recorded_state(), AuthorizationState::Refreshed);
    }

    #[test]
    fn test_code_is_single_use() {
        let now = OffsetDateTime::now_utc();
        let mut auth = code_authorization();
        auth.consume_code(now).unwrap();
        let err = auth.consume_code(now).unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[test]
    fn test_expired_code_rejected() {
        let mut auth = code_authorization();
        let later = OffsetDateTime::now_utc() + time::Duration::minutes(10);
        assert!(auth.consume_code(later).is_err());
        assert_eq!(auth.state_at(later), AuthorizationState::Expired);
    }

    #[test]
    fn test_client_credentials_skips_code() {
        let mut auth = Authorization::new(
            "c-1",
            "test-client",
            GrantType::ClientCredentials,
            scopes(),
        );
        assert!(
            auth.issue_code(segment(300), "http://x/cb", None, None)
                .is_err()
        );
        auth.issue_tokens(segment(300), None, None).unwrap();
        assert_eq!(auth.recorded_state(), AuthorizationState::TokenIssued);
        // no refresh token, so refresh is refused
        assert!(
            auth.refresh(segment(300), None, None, OffsetDateTime::now_utc())
                .is_err()
        );
    }

    #[test]
    fn test_refresh_keeps_one_active_access_token() {
        let now = OffsetDateTime::now_utc();
        let mut auth = Authorization::new("c-1", "alice", GrantType::Password, scopes());
        let first = segment(300);
        auth.issue_tokens(first.clone(), Some(segment(3600)), None)
            .unwrap();

        auth.refresh(segment(300), None, None, now).unwrap();
        let (kind, superseded) = &auth.history[0];
        assert_eq!(*kind, TokenKind::AccessToken);
        assert_eq!(superseded.value, first.value);
        assert!(superseded.invalidated);
        assert!(auth.access_token.as_ref().unwrap().is_active(now));
    }

    #[test]
    fn test_rotation_invalidates_previous_refresh_token() {
        let now = OffsetDateTime::now_utc();
        let mut auth = Authorization::new("c-1", "alice", GrantType::Password, scopes());
        let original = segment(3600);
        auth.issue_tokens(segment(300), Some(original.clone()), None)
            .unwrap();

        let rotated = segment(3600);
        auth.refresh(segment(300), Some(rotated.clone()), None, now)
            .unwrap();
        assert_eq!(auth.refresh_token.as_ref().unwrap().value, rotated.value);
        assert!(
            auth.history
                .iter()
                .any(|(kind, s)| *kind == TokenKind::RefreshToken
                    && s.value == original.value
                    && s.invalidated)
        );
    }

    #[test]
    fn test_invalidate_all_expires_record() {
        let mut auth = code_authorization();
        auth.invalidate_all();
        assert_eq!(
            auth.state_at(OffsetDateTime::now_utc()),
            AuthorizationState::Expired
        );
        assert!(auth.authorization_code.unwrap().invalidated);
    }

    #[test]
    fn test_hash_token_is_stable_hex() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("abc"));
        assert_ne!(hash, hash_token("abd"));
        assert_eq!(generate_token().len(), 43);
    }
}
