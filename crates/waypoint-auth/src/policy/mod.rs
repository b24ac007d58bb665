//! Authorization policy engine.
//!
//! [`PolicyEngine`] maps `(method, path, authorities)` to a [`Decision`];
//! [`SecurityChains`] picks which authentication mechanism and engine apply
//! to a path.

pub mod chain;
pub mod engine;
pub mod matcher;

pub use chain::{Mechanism, SecurityChain, SecurityChains};
pub use engine::{Decision, DenyReason, MatchedRule, PolicyEngine, PolicyRule, Requirement};
pub use matcher::{MethodMatcher, PathPattern};

/// Errors building a policy table.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PolicyError {
    /// A path pattern could not be compiled.
    #[error("Invalid path pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The pattern.
        pattern: String,
        /// What is wrong with it.
        message: String,
    },
}
