//! Credential store.
//!
//! Storage traits for registered clients, principals, issued authorizations
//! and consents. Pure data access: eligibility and policy checks live in
//! the issuer. [`memory`] provides the in-process backend used by the
//! server and by tests.

pub mod authorization;
pub mod client;
pub mod consent;
pub mod memory;
pub mod principal;

pub use authorization::AuthorizationStorage;
pub use client::ClientStorage;
pub use consent::{Consent, ConsentStorage};
pub use memory::{
    InMemoryAuthorizationStorage, InMemoryClientStorage, InMemoryConsentStorage,
    InMemoryPrincipalStorage,
};
pub use principal::PrincipalStorage;
