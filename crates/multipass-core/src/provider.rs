//! Provider contracts, configuration entities, and the backend lookup table

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{AuthInfo, AuthenticationResult, LoginRequest, LoginStyle};
use crate::error::{Capability, MultipassError, Result};
use crate::groups::GroupResolution;
use crate::identity::{Group, IdentityInfo, SearchCriteria};

/// Opaque backend options, interpreted by the adapter.
pub type ProviderOptions = HashMap<String, Value>;

/// Configuration of one named auth provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthProviderConfig {
    /// Unique name, immutable for the registry's lifetime.
    pub name: String,
    /// Backend type, resolved through the [`BackendRegistry`].
    pub backend: String,
    /// Human-readable title shown to users; defaults to the name.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub options: ProviderOptions,
    /// Paired identity provider, tried first when resolving a login.
    #[serde(default)]
    pub identity_provider: Option<String>,
}

impl AuthProviderConfig {
    pub fn new(name: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            title: None,
            options: ProviderOptions::new(),
            identity_provider: None,
        }
    }
}

/// Configuration of one named identity provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    /// Unique name, immutable for the registry's lifetime.
    pub name: String,
    /// Backend type, resolved through the [`BackendRegistry`].
    pub backend: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub options: ProviderOptions,
    /// How group membership is determined for identities of this provider.
    #[serde(default)]
    pub group_resolution: GroupResolution,
    /// Application attribute key → backend key remapping, applied to search
    /// criteria before they reach the backend.
    #[serde(default)]
    pub mapping: HashMap<String, String>,
}

impl IdentityProviderConfig {
    pub fn new(name: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            title: None,
            options: ProviderOptions::new(),
            group_resolution: GroupResolution::default(),
            mapping: HashMap::new(),
        }
    }
}

/// Verifies credentials for one configured backend instance.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Backend type identifier, e.g. `"static"` or `"ldap"`.
    fn backend(&self) -> &str;

    fn title(&self) -> &str;

    /// How the surrounding application should start the login flow.
    fn login_style(&self) -> LoginStyle;

    /// Name of the paired identity provider, if one is configured.
    fn paired_identity_provider(&self) -> Option<&str> {
        None
    }

    /// Verifies a login attempt. Expected failures (bad credentials,
    /// unreachable backend) become a failure-tagged result; only
    /// programmer errors surface as `Err`.
    async fn process_login(&self, request: &LoginRequest) -> Result<AuthenticationResult>;

    /// Target URL to start a redirect-style login. Fails with
    /// `UnsupportedCapability` for form-style providers.
    async fn initiate_login(&self, state: &str) -> Result<String> {
        let _ = state;
        Err(MultipassError::unsupported(
            self.name(),
            Capability::LoginInitiation,
        ))
    }
}

/// Resolves and searches identities for one configured backend instance.
///
/// Optional operations are discoverable through the `supports_*` flags;
/// invoking an unsupported operation fails with `UnsupportedCapability`,
/// never a silent no-op.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Backend type identifier, e.g. `"static"` or `"ldap"`.
    fn backend(&self) -> &str;

    fn title(&self) -> &str;

    /// The configured group resolution strategy for this provider.
    fn group_resolution(&self) -> &GroupResolution;

    fn supports_search(&self) -> bool {
        false
    }

    fn supports_groups(&self) -> bool {
        false
    }

    fn supports_refresh(&self) -> bool {
        false
    }

    /// If identities can be fetched by identifier alone.
    fn supports_identity_lookup(&self) -> bool {
        false
    }

    /// Resolves authentication data into an identity, or `None` if this
    /// provider has no record of the principal.
    async fn get_identity_from_auth(&self, auth: &AuthInfo) -> Result<Option<IdentityInfo>>;

    /// Fetches an identity by its provider-scoped identifier.
    async fn get_identity(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        let _ = identifier;
        Err(MultipassError::unsupported(
            self.name(),
            Capability::IdentityLookup,
        ))
    }

    /// Re-fetches identity information for a previously resolved identity,
    /// using provider-specific refresh data.
    async fn refresh_identity(
        &self,
        identifier: &str,
        refresh_data: &HashMap<String, Value>,
    ) -> Result<Option<IdentityInfo>> {
        let _ = (identifier, refresh_data);
        Err(MultipassError::unsupported(self.name(), Capability::Refresh))
    }

    /// Identities matching the given criteria. The returned sequence is
    /// finite and re-queried on every call.
    async fn search_identities(
        &self,
        criteria: &SearchCriteria,
        exact: bool,
    ) -> Result<Vec<IdentityInfo>> {
        let _ = (criteria, exact);
        Err(MultipassError::unsupported(self.name(), Capability::Search))
    }

    /// Groups the given identifier belongs to, queried from the backend.
    async fn get_identity_groups(&self, identifier: &str) -> Result<Vec<Arc<dyn Group>>> {
        let _ = identifier;
        Err(MultipassError::unsupported(self.name(), Capability::Groups))
    }

    /// A specific group by name, or `None` if the backend has no such group.
    async fn get_group(&self, name: &str) -> Result<Option<Arc<dyn Group>>> {
        let _ = name;
        Err(MultipassError::unsupported(self.name(), Capability::Groups))
    }

    /// Groups whose name matches the given one.
    async fn search_groups(&self, name: &str, exact: bool) -> Result<Vec<Arc<dyn Group>>> {
        let _ = (name, exact);
        Err(MultipassError::unsupported(self.name(), Capability::Groups))
    }

    /// Maps application-side criteria keys to backend keys. The default
    /// implementation returns the criteria unchanged.
    fn map_search_criteria(&self, criteria: &SearchCriteria) -> SearchCriteria {
        criteria.clone()
    }
}

/// Builds auth provider instances for one backend type.
#[async_trait]
pub trait AuthProviderFactory: Send + Sync {
    /// Backend type identifier used in configuration.
    fn backend(&self) -> &'static str;

    /// If more than one instance of this backend may be configured.
    fn multi_instance(&self) -> bool {
        true
    }

    /// Creates a ready-to-use instance. Fails fast with a configuration
    /// error if required options are missing or invalid.
    async fn create(&self, config: &AuthProviderConfig) -> Result<Arc<dyn AuthProvider>>;
}

/// Builds identity provider instances for one backend type.
#[async_trait]
pub trait IdentityProviderFactory: Send + Sync {
    fn backend(&self) -> &'static str;

    fn multi_instance(&self) -> bool {
        true
    }

    async fn create(&self, config: &IdentityProviderConfig) -> Result<Arc<dyn IdentityProvider>>;
}

/// Backend type → factory lookup table.
///
/// The core only depends on this interface; how it is populated (a static
/// table, discovered plugins, a configuration-driven map) is a deployment
/// concern. Registering a backend type again replaces the previous factory,
/// so deployments can override built-in backends.
#[derive(Default)]
pub struct BackendRegistry {
    auth: HashMap<String, Arc<dyn AuthProviderFactory>>,
    identity: HashMap<String, Arc<dyn IdentityProviderFactory>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_auth_backend(&mut self, factory: Arc<dyn AuthProviderFactory>) {
        self.auth.insert(factory.backend().to_string(), factory);
    }

    pub fn register_identity_backend(&mut self, factory: Arc<dyn IdentityProviderFactory>) {
        self.identity.insert(factory.backend().to_string(), factory);
    }

    pub fn resolve_auth_backend(&self, backend: &str) -> Result<Arc<dyn AuthProviderFactory>> {
        self.auth.get(backend).cloned().ok_or_else(|| {
            MultipassError::configuration(format!("Unknown auth backend type: {backend}"))
        })
    }

    pub fn resolve_identity_backend(
        &self,
        backend: &str,
    ) -> Result<Arc<dyn IdentityProviderFactory>> {
        self.identity.get(backend).cloned().ok_or_else(|| {
            MultipassError::configuration(format!("Unknown identity backend type: {backend}"))
        })
    }

    pub fn auth_backend_types(&self) -> Vec<&str> {
        self.auth.keys().map(String::as_str).collect()
    }

    pub fn identity_backend_types(&self) -> Vec<&str> {
        self.identity.keys().map(String::as_str).collect()
    }
}
