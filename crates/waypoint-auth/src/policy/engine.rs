//! Policy evaluation.
//!
//! The engine holds an ordered rule table. Rules are evaluated top to bottom
//! and the first whose method and path match decides; unmatched requests
//! require authentication.
//!
//! [`Decision`] keeps 401 and 403 apart: a missing or rejected credential is
//! [`DenyReason::Unauthenticated`] unless the rule permits everyone, and an
//! authenticated caller lacking every listed authority is
//! [`DenyReason::InsufficientAuthority`].

use std::collections::BTreeSet;
use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;
use crate::policy::PolicyError;
use crate::policy::matcher::{MethodMatcher, PathPattern};

// =============================================================================
// Rule table
// =============================================================================

/// What a matched request must present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// No credential needed.
    PermitAll,
    /// Any valid credential.
    Authenticated,
    /// A valid credential holding at least one of these authorities.
    AnyOf(Vec<String>),
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermitAll => f.write_str("permit all"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::AnyOf(authorities) => write!(f, "any of {{{}}}", authorities.join(", ")),
        }
    }
}

/// One row of the policy table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Methods the rule applies to; empty means any.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Path glob.
    pub path: String,

    /// Requirement for matching requests.
    pub require: Requirement,
}

impl PolicyRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(methods: &[&str], path: &str, require: Requirement) -> Self {
        Self {
            methods: methods.iter().map(ToString::to_string).collect(),
            path: path.to_string(),
            require,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    methods: MethodMatcher,
    path: PathPattern,
}

// =============================================================================
// Decision
// =============================================================================

/// The rule that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedRule {
    /// Index into the rule table.
    Rule(usize),
    /// No rule matched; the default requirement applied.
    Default,
}

impl fmt::Display for MatchedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(index) => write!(f, "rule #{index}"),
            Self::Default => f.write_str("default"),
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No valid credential. Surfaces as 401.
    Unauthenticated,
    /// Valid credential without a required authority. Surfaces as 403.
    InsufficientAuthority,
}

/// Outcome of [`PolicyEngine::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through.
    Allow {
        /// Deciding rule.
        rule: MatchedRule,
    },
    /// Reject the request.
    Deny {
        /// Reason.
        reason: DenyReason,
        /// Deciding rule.
        rule: MatchedRule,
    },
}

impl Decision {
    /// Returns `true` for [`Decision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// The deciding rule.
    #[must_use]
    pub fn rule(&self) -> MatchedRule {
        match self {
            Self::Allow { rule } | Self::Deny { rule, .. } => *rule,
        }
    }

    /// HTTP status: 200 for allow, 401 or 403 for deny.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Allow { .. } => StatusCode::OK,
            Self::Deny {
                reason: DenyReason::Unauthenticated,
                ..
            } => StatusCode::UNAUTHORIZED,
            Self::Deny {
                reason: DenyReason::InsufficientAuthority,
                ..
            } => StatusCode::FORBIDDEN,
        }
    }

    /// Converts a deny into the matching [`AuthError`].
    ///
    /// # Errors
    ///
    /// `Unauthenticated` or `InsufficientAuthority`.
    pub fn into_result(self) -> AuthResult<()> {
        match self {
            Self::Allow { .. } => Ok(()),
            Self::Deny {
                reason: DenyReason::Unauthenticated,
                rule,
            } => Err(AuthError::unauthenticated(format!("denied by {rule}"))),
            Self::Deny {
                reason: DenyReason::InsufficientAuthority,
                rule,
            } => Err(AuthError::insufficient_authority(format!("denied by {rule}"))),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Ordered, first-match policy table.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: Vec<PolicyRule>,
    compiled: Vec<CompiledRule>,
    default: Requirement,
}

impl PolicyEngine {
    /// Compiles `rules`. Unmatched requests require authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if a path pattern is invalid.
    pub fn new(rules: Vec<PolicyRule>) -> Result<Self, PolicyError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    methods: MethodMatcher::new(&rule.methods),
                    path: PathPattern::new(&rule.path)?,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(Self {
            rules,
            compiled,
            default: Requirement::Authenticated,
        })
    }

    /// An engine that permits every request.
    #[must_use]
    pub fn permit_all() -> Self {
        Self {
            rules: Vec::new(),
            compiled: Vec::new(),
            default: Requirement::PermitAll,
        }
    }

    /// The rule table, in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// First rule matching `method` and `path`.
    #[must_use]
    pub fn find(&self, method: &str, path: &str) -> (MatchedRule, &Requirement) {
        self.compiled
            .iter()
            .position(|rule| rule.methods.matches(method) && rule.path.matches(path))
            .map_or((MatchedRule::Default, &self.default), |index| {
                (MatchedRule::Rule(index), &self.rules[index].require)
            })
    }

    /// Decides a request. `authorities` is `None` when no valid credential
    /// was presented.
    #[must_use]
    pub fn decide(
        &self,
        method: &str,
        path: &str,
        authorities: Option<&BTreeSet<String>>,
    ) -> Decision {
        let (rule, requirement) = self.find(method, path);
        let deny = |reason| Decision::Deny { reason, rule };

        let decision = match (requirement, authorities) {
            (Requirement::PermitAll, _) => Decision::Allow { rule },
            (_, None) => deny(DenyReason::Unauthenticated),
            (Requirement::Authenticated, Some(_)) => Decision::Allow { rule },
            (Requirement::AnyOf(required), Some(held)) => {
                if required.iter().any(|authority| held.contains(authority)) {
                    Decision::Allow { rule }
                } else {
                    deny(DenyReason::InsufficientAuthority)
                }
            }
        };

        tracing::trace!(method, path, %rule, allowed = decision.is_allowed(), "Policy decision");
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::types::parse_scope;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default().rules).unwrap()
    }

    #[test]
    fn test_default_table() {
        let engine = engine();
        let read = parse_scope("backend.read");
        let write = parse_scope("backend.write");
        let admin = parse_scope("ROLE_ADMIN");

        assert!(engine.decide("GET", "/health", None).is_allowed());
        assert!(engine.decide("GET", "/health/ready", None).is_allowed());

        assert_eq!(
            engine.decide("GET", "/customers", None),
            Decision::Deny {
                reason: DenyReason::Unauthenticated,
                rule: MatchedRule::Rule(1)
            }
        );
        assert!(engine.decide("GET", "/customers/1", Some(&read)).is_allowed());

        assert_eq!(
            engine.decide("DELETE", "/bookings/9", Some(&read)),
            Decision::Deny {
                reason: DenyReason::InsufficientAuthority,
                rule: MatchedRule::Rule(2)
            }
        );
        assert!(engine.decide("DELETE", "/bookings/9", Some(&write)).is_allowed());

        // non-GET customers traffic falls through to the admin rule
        assert_eq!(
            engine.decide("POST", "/customers", Some(&read)).rule(),
            MatchedRule::Rule(3)
        );
        assert!(engine.decide("POST", "/customers", Some(&admin)).is_allowed());
    }

    #[test]
    fn test_unmatched_requires_authentication() {
        let engine = engine();
        let decision = engine.decide("GET", "/bookings/9", None);
        assert_eq!(decision.rule(), MatchedRule::Default);
        assert_eq!(decision.status_code(), StatusCode::UNAUTHORIZED);

        let anyone = BTreeSet::new();
        assert!(engine.decide("GET", "/bookings/9", Some(&anyone)).is_allowed());
    }

    #[test]
    fn test_401_vs_403_for_every_requirement() {
        let rules = vec![
            PolicyRule::new(&[], "/open/**", Requirement::PermitAll),
            PolicyRule::new(&[], "/auth/**", Requirement::Authenticated),
            PolicyRule::new(
                &[],
                "/scoped/**",
                Requirement::AnyOf(vec!["a".to_string(), "b".to_string()]),
            ),
        ];
        let engine = PolicyEngine::new(rules).unwrap();
        let none = BTreeSet::new();
        let b = parse_scope("b");

        for path in ["/open", "/auth", "/scoped", "/other"] {
            let anonymous = engine.decide("GET", path, None);
            if path == "/open" {
                assert!(anonymous.is_allowed());
            } else {
                assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED, "{path}");
            }
        }
        assert_eq!(
            engine.decide("GET", "/scoped", Some(&none)).status_code(),
            StatusCode::FORBIDDEN
        );
        assert!(engine.decide("GET", "/scoped", Some(&b)).is_allowed());
        assert!(engine.decide("GET", "/auth", Some(&none)).is_allowed());
    }

    #[test]
    fn test_decide_is_deterministic() {
        let engine = engine();
        let read = parse_scope("backend.read");
        for _ in 0..10 {
            assert_eq!(
                engine.decide("PUT", "/bookings/1", Some(&read)),
                engine.decide("PUT", "/bookings/1", Some(&read))
            );
        }
    }

    #[test]
    fn test_into_result_maps_errors() {
        let engine = engine();
        let err = engine.decide("GET", "/customers", None).into_result().unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated { .. }));
        let err = engine
            .decide("DELETE", "/bookings/1", Some(&BTreeSet::new()))
            .into_result()
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_rules_deserialize_from_toml_shape() {
        let json = serde_json::json!([
            {"methods": ["GET"], "path": "/health/**", "require": "permit_all"},
            {"path": "/admin/**", "require": {"any_of": ["ROLE_ADMIN"]}}
        ]);
        let rules: Vec<PolicyRule> = serde_json::from_value(json).unwrap();
        assert_eq!(rules[0].require, Requirement::PermitAll);
        assert!(rules[1].methods.is_empty());
        assert_eq!(
            rules[1].require,
            Requirement::AnyOf(vec!["ROLE_ADMIN".to_string()])
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let rules = vec![PolicyRule::new(&[], "relative", Requirement::PermitAll)];
        assert!(PolicyEngine::new(rules).is_err());
    }
}
