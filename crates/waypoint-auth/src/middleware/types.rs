//! Authenticated request context.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::login::LoginSession;
use crate::validation::ValidatedClaims;

/// Where the caller's identity came from.
#[derive(Debug, Clone)]
pub enum Credential {
    /// A validated bearer token.
    Bearer(Arc<ValidatedClaims>),
    /// A login session cookie.
    Session(Arc<LoginSession>),
}

/// The authenticated caller, inserted into request extensions by
/// [`enforce`](super::auth::enforce).
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Principal or service-account name.
    pub subject: String,
    /// Authorities the policy engine checked.
    pub authorities: BTreeSet<String>,
    /// The credential.
    pub credential: Credential,
}

impl AuthContext {
    /// Context for a validated bearer token.
    #[must_use]
    pub fn from_claims(claims: ValidatedClaims) -> Self {
        Self {
            subject: claims.subject.clone(),
            authorities: claims.authorities.clone(),
            credential: Credential::Bearer(Arc::new(claims)),
        }
    }

    /// Context for a login session. Roles are the authorities.
    #[must_use]
    pub fn from_session(session: LoginSession) -> Self {
        Self {
            subject: session.username.clone(),
            authorities: session.roles.iter().cloned().collect(),
            credential: Credential::Session(Arc::new(session)),
        }
    }

    /// Client id of a bearer token.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        match &self.credential {
            Credential::Bearer(claims) => claims.client_id.as_deref(),
            Credential::Session(_) => None,
        }
    }

    /// The session, for session-authenticated requests.
    #[must_use]
    pub fn session(&self) -> Option<&LoginSession> {
        match &self.credential {
            Credential::Session(session) => Some(session),
            Credential::Bearer(_) => None,
        }
    }
}
