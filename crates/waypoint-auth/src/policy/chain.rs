//! Security chains.
//!
//! An explicit ordered list of `(name, path matcher, mechanism, policy)`
//! definitions. The first chain whose matcher accepts the request path
//! handles the request; a path no chain accepts is rejected with 401.

use std::sync::Arc;

use crate::policy::PolicyError;
use crate::policy::engine::PolicyEngine;
use crate::policy::matcher::PathPattern;

/// How a chain authenticates requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// No credential is read (public issuer endpoints).
    None,
    /// `Authorization: Bearer` JWT (resource API).
    Bearer,
    /// Login session cookie (browser edge API).
    Session,
}

/// One chain definition.
#[derive(Debug, Clone)]
pub struct SecurityChain {
    /// Name, for logs.
    pub name: String,
    /// Paths this chain handles.
    pub matcher: PathPattern,
    /// Authentication mechanism.
    pub mechanism: Mechanism,
    /// Authorization policy.
    pub policy: Arc<PolicyEngine>,
}

impl SecurityChain {
    /// Creates a chain for paths matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is invalid.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        mechanism: Mechanism,
        policy: Arc<PolicyEngine>,
    ) -> Result<Self, PolicyError> {
        Ok(Self {
            name: name.into(),
            matcher: PathPattern::new(pattern)?,
            mechanism,
            policy,
        })
    }
}

/// Ordered chain list.
#[derive(Debug, Clone, Default)]
pub struct SecurityChains {
    chains: Vec<SecurityChain>,
}

impl SecurityChains {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chain. Earlier chains take precedence.
    #[must_use]
    pub fn with(mut self, chain: SecurityChain) -> Self {
        self.chains.push(chain);
        self
    }

    /// First chain accepting `path`.
    #[must_use]
    pub fn select(&self, path: &str) -> Option<&SecurityChain> {
        self.chains.iter().find(|chain| chain.matcher.matches(path))
    }

    /// Chains in evaluation order.
    #[must_use]
    pub fn chains(&self) -> &[SecurityChain] {
        &self.chains
    }
}
