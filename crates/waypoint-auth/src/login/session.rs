//! Browser sessions created by the login bridge.

use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;

use crate::token::IdTokenClaims;
use crate::types::generate_token;

/// An authenticated browser session.
#[derive(Clone, Serialize)]
pub struct LoginSession {
    /// Session id (cookie value).
    #[serde(skip)]
    pub id: String,
    /// Principal name.
    pub username: String,
    /// Email from the ID token.
    pub email: Option<String>,
    /// Display name from the ID token.
    pub name: Option<String>,
    /// Roles from the ID token.
    pub roles: Vec<String>,
    /// The ID token the session was created from.
    #[serde(skip)]
    pub id_token: String,
    /// Creation time.
    #[serde(skip)]
    pub created_at: OffsetDateTime,
    /// Expiry.
    #[serde(skip)]
    pub expires_at: OffsetDateTime,
}

impl std::fmt::Debug for LoginSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginSession")
            .field("username", &self.username)
            .field("roles", &self.roles)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl LoginSession {
    /// Builds a session for the subject of `claims`.
    #[must_use]
    pub fn from_id_token(claims: &IdTokenClaims, id_token: String, ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        let username = claims
            .extra
            .preferred_username
            .clone()
            .unwrap_or_else(|| claims.sub.clone());
        Self {
            id: generate_token(),
            username,
            email: claims.email.clone(),
            name: claims.name.clone(),
            roles: claims.extra.roles.iter().cloned().collect(),
            id_token,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns `true` once the session has expired.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, LoginSession>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `session`.
    pub fn insert(&self, session: LoginSession) {
        self.sessions.insert(session.id.clone(), session);
    }

    /// The live session with `id`. Expired sessions are dropped on access.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<LoginSession> {
        let now = OffsetDateTime::now_utc();
        let session = self.sessions.get(id).map(|s| s.value().clone())?;
        if session.is_expired(now) {
            self.sessions.remove(id);
            return None;
        }
        Some(session)
    }

    /// Removes the session with `id`.
    pub fn remove(&self, id: &str) -> Option<LoginSession> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Drops expired sessions. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        before.saturating_sub(self.sessions.len())
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
