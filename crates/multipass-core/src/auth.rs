//! Authentication inputs and outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::identity::{convert_attributes, IdentityInfo};

/// Login input shapes. The registry passes these through to the auth
/// provider without inspecting them; each backend documents which shapes it
/// accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoginRequest {
    /// An inline form submission, e.g. username/password fields.
    Form { fields: HashMap<String, String> },
    /// Parameters received on a redirect callback from an external service.
    Callback { params: HashMap<String, String> },
    /// A bearer token presented directly.
    Token { token: String },
}

impl LoginRequest {
    pub fn form(fields: HashMap<String, String>) -> Self {
        Self::Form { fields }
    }

    pub fn callback(params: HashMap<String, String>) -> Self {
        Self::Callback { params }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self::Token {
            token: token.into(),
        }
    }
}

/// How a provider expects the login flow to start, so the hosting
/// application can render the right UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStyle {
    /// The application renders a local login form and posts it back.
    Form,
    /// The user agent is redirected to an external service.
    Redirect,
}

/// Data from a successful authentication.
///
/// The payload is opaque to the registry; it must allow a linked identity
/// provider to uniquely identify the principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    provider: String,
    data: HashMap<String, Value>,
}

impl AuthInfo {
    pub fn new(provider: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self {
            provider: provider.into(),
            data,
        }
    }

    /// Name of the auth provider that produced this data.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Returns a copy with keys renamed according to `mapping`
    /// (target key → source key). Unmapped keys are kept as-is.
    pub fn map(&self, mapping: &HashMap<String, String>) -> Self {
        Self {
            provider: self.provider.clone(),
            data: convert_attributes(&self.data, mapping, None),
        }
    }
}

/// Kind of authentication failure, so the application can show
/// "wrong password" and "service down" differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureKind {
    /// The backend rejected the supplied credentials.
    Rejected,
    /// The backend was misconfigured or could not be reached.
    Unavailable,
}

/// Outcome of an auth provider attempt.
///
/// Expected failure modes (bad credentials, unreachable backend) are data,
/// not errors; only programmer errors surface as `MultipassError`.
#[derive(Debug, Clone)]
pub enum AuthenticationResult {
    Success(AuthInfo),
    Failure {
        reason: String,
        kind: AuthFailureKind,
    },
}

impl AuthenticationResult {
    pub fn success(info: AuthInfo) -> Self {
        Self::Success(info)
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
            kind: AuthFailureKind::Rejected,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
            kind: AuthFailureKind::Unavailable,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Final outcome of a login attempt dispatched through the registry.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Credentials verified and an identity record was resolved.
    IdentityFound {
        auth: AuthInfo,
        identity: IdentityInfo,
    },
    /// Credentials verified but no identity provider knew the principal.
    /// Distinct from `AuthFailed`.
    IdentityNotFound { auth: AuthInfo },
    /// The auth provider rejected the attempt.
    AuthFailed {
        reason: String,
        kind: AuthFailureKind,
    },
}

impl LoginOutcome {
    pub fn identity(&self) -> Option<&IdentityInfo> {
        match self {
            Self::IdentityFound { identity, .. } => Some(identity),
            _ => None,
        }
    }
}
