//! Error types for the Multipass core

use std::fmt;
use thiserror::Error;

/// Which of the two provider kinds a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Auth,
    Identity,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::Identity => write!(f, "identity"),
        }
    }
}

/// Optional provider capabilities. Callers must check the corresponding
/// `supports_*` flag before invoking the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Search,
    Groups,
    MemberList,
    Refresh,
    IdentityLookup,
    LoginInitiation,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => write!(f, "identity search"),
            Self::Groups => write!(f, "groups"),
            Self::MemberList => write!(f, "member enumeration"),
            Self::Refresh => write!(f, "identity refresh"),
            Self::IdentityLookup => write!(f, "identity lookup"),
            Self::LoginInitiation => write!(f, "login initiation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MultipassError {
    /// Bad or missing options, a duplicate provider name, or an unknown
    /// backend type. Fatal at startup, never recovered.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// An operation named a provider that is not in the registry.
    #[error("Unknown {kind} provider: {name}")]
    UnknownProvider { kind: ProviderKind, name: String },

    /// An adapter could not reach its backend.
    #[error("Backend unavailable for provider {provider}: {message}")]
    BackendUnavailable { provider: String, message: String },

    /// More than one identity provider claimed the same successful login
    /// while the single-match policy was in effect.
    #[error("Ambiguous identity: claimed by providers {providers:?}")]
    AmbiguousIdentity { providers: Vec<String> },

    /// A capability was invoked on a provider that does not implement it.
    #[error("Provider {provider} does not support {capability}")]
    UnsupportedCapability {
        provider: String,
        capability: Capability,
    },

    #[error("Identity retrieval failed: {message}")]
    IdentityRetrieval { message: String },

    #[error("Group retrieval failed: {message}")]
    GroupRetrieval { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MultipassError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unknown_provider(kind: ProviderKind, name: impl Into<String>) -> Self {
        Self::UnknownProvider {
            kind,
            name: name.into(),
        }
    }

    pub fn backend_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(provider: impl Into<String>, capability: Capability) -> Self {
        Self::UnsupportedCapability {
            provider: provider.into(),
            capability,
        }
    }

    pub fn identity_retrieval(message: impl Into<String>) -> Self {
        Self::IdentityRetrieval {
            message: message.into(),
        }
    }

    pub fn group_retrieval(message: impl Into<String>) -> Self {
        Self::GroupRetrieval {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MultipassError>;
