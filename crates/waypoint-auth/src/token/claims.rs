//! Claim customization.
//!
//! [`customize`] is a pure function of the token type and the principal. It
//! projects authorities into the `roles` and `authorities` claims; ID tokens
//! also get `preferred_username`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::Principal;

/// Which token the claims are for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// OAuth 2.0 access token.
    AccessToken,
    /// OpenID Connect ID token.
    IdToken,
}

/// Claims added on top of the registered ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraClaims {
    /// Authorities carrying the `ROLE_` prefix, prefix kept.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,

    /// Every granted authority, including raw scopes.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub authorities: BTreeSet<String>,

    /// Login name, ID tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

/// Builds the extra claims for `token_type`.
#[must_use]
pub fn customize(token_type: TokenType, principal: &Principal) -> ExtraClaims {
    ExtraClaims {
        roles: principal.roles().cloned().collect(),
        authorities: principal.authorities.clone(),
        preferred_username: match token_type {
            TokenType::IdToken => Some(principal.username.clone()),
            TokenType::AccessToken => None,
        },
    }
}
