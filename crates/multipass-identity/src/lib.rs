//! Multipass Identity - multi-backend login dispatch and identity resolution
//!
//! This crate provides the [`Multipass`] registry and pluggable backend
//! adapters for:
//! - Static in-configuration tables (development/testing)
//! - Shibboleth-style federated SSO
//! - Generic OIDC (optional)
//! - LDAP / Active Directory (optional)
//!
//! # Architecture
//!
//! The system is built around two core traits from `multipass-core`:
//! - `AuthProvider`: verifies credentials and produces a raw auth result
//! - `IdentityProvider`: resolves auth results and searches identities and
//!   groups
//!
//! Each backend implements these traits, and the [`Multipass`] registry
//! manages the named instances, routing logins, searches and group lookups
//! to the right one and normalizing the results.

pub mod providers;
pub mod registry;

#[cfg(test)]
mod tests;

// Re-export provider implementations
pub use providers::memory::{StaticAuthProvider, StaticGroup, StaticIdentityProvider};
pub use providers::shibboleth::{ShibbolethAuthProvider, ShibbolethIdentityProvider};

#[cfg(feature = "oidc")]
pub use providers::oidc::{OidcAuthProvider, OidcIdentityProvider};

#[cfg(feature = "ldap")]
pub use providers::ldap::{LdapAuthProvider, LdapIdentityProvider};

// Re-export core types
pub use multipass_core::*;

// Re-export the registry and the built-in backend table
pub use providers::default_backends;
pub use registry::{Multipass, MultipassSettings};
