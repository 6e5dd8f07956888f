//! Provider registry - the Multipass orchestration core
//!
//! The registry holds the configured auth and identity provider instances,
//! dispatches login attempts and identity lookups to them, and normalizes
//! the results across heterogeneous backends.
//!
//! Identity resolution without an explicit pairing follows a deliberate
//! precedence rule: the first *registered* identity provider of the same
//! backend type that returns a match wins. Registration order is the
//! deterministic tiebreak and callers may rely on it. The
//! `require_single_match` policy turns multiple claimants into an
//! `AmbiguousIdentity` error instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use multipass_core::{
    groups, AuthInfo, AuthProvider, AuthProviderConfig, AuthenticationResult, BackendRegistry,
    Capability, Group, IdentityInfo, IdentityProvider, IdentityProviderConfig, IdentityRef,
    LoginOutcome, LoginRequest, LoginStyle, MultipassError, ProviderKind, Result, SearchCriteria,
};

/// Startup configuration consumed by [`Multipass::from_config`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultipassSettings {
    #[serde(default)]
    pub auth_providers: Vec<AuthProviderConfig>,
    #[serde(default)]
    pub identity_providers: Vec<IdentityProviderConfig>,
    /// Fail with `AmbiguousIdentity` when more than one identity provider
    /// claims a successful login, instead of first-match-wins.
    #[serde(default)]
    pub require_single_match: bool,
}

/// Registry of configured provider instances.
///
/// Built once at startup, immutable thereafter; reconfiguration requires a
/// restart. Provider instances are shared read-only, so concurrent
/// operations across callers are safe. No per-call state outlives a call.
pub struct Multipass {
    auth_providers: RwLock<HashMap<String, Arc<dyn AuthProvider>>>,
    identity_providers: RwLock<HashMap<String, Arc<dyn IdentityProvider>>>,
    /// Identity provider names in registration order.
    identity_order: RwLock<Vec<String>>,
    require_single_match: bool,
}

impl std::fmt::Debug for Multipass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multipass")
            .field("require_single_match", &self.require_single_match)
            .finish_non_exhaustive()
    }
}

impl Multipass {
    pub fn new() -> Self {
        Self {
            auth_providers: RwLock::new(HashMap::new()),
            identity_providers: RwLock::new(HashMap::new()),
            identity_order: RwLock::new(Vec::new()),
            require_single_match: false,
        }
    }

    /// A registry that fails with `AmbiguousIdentity` when more than one
    /// identity provider claims the same successful login.
    pub fn requiring_single_match() -> Self {
        Self {
            require_single_match: true,
            ..Self::new()
        }
    }

    /// Builds a registry from configuration, resolving each backend type
    /// through `backends`. Identity providers are created first so that
    /// auth pairing links can be validated before the registry is handed
    /// out. Fails with a configuration error on the first invalid entry.
    #[instrument(skip_all)]
    pub async fn from_config(
        settings: &MultipassSettings,
        backends: &BackendRegistry,
    ) -> Result<Self> {
        let registry = Self {
            require_single_match: settings.require_single_match,
            ..Self::new()
        };

        let mut single_instance_types = HashSet::new();
        for config in &settings.identity_providers {
            let factory = backends.resolve_identity_backend(&config.backend)?;
            if !factory.multi_instance() && !single_instance_types.insert(&config.backend) {
                return Err(MultipassError::configuration(format!(
                    "Backend does not support multiple instances: {}",
                    config.backend
                )));
            }
            let provider = factory.create(config).await?;
            registry.register_identity_provider(provider).await?;
        }

        let mut single_instance_types = HashSet::new();
        for config in &settings.auth_providers {
            let factory = backends.resolve_auth_backend(&config.backend)?;
            if !factory.multi_instance() && !single_instance_types.insert(&config.backend) {
                return Err(MultipassError::configuration(format!(
                    "Backend does not support multiple instances: {}",
                    config.backend
                )));
            }
            let provider = factory.create(config).await?;
            registry.register_auth_provider(provider).await?;
        }

        registry.validate_links().await?;
        Ok(registry)
    }

    /// Registers an auth provider. Fails with a configuration error on a
    /// duplicate name and leaves the registry unchanged.
    pub async fn register_auth_provider(&self, provider: Arc<dyn AuthProvider>) -> Result<()> {
        let mut providers = self.auth_providers.write().await;
        if providers.contains_key(provider.name()) {
            return Err(MultipassError::configuration(format!(
                "Duplicate auth provider name: {}",
                provider.name()
            )));
        }
        info!(
            "Registering auth provider: {} ({})",
            provider.name(),
            provider.backend()
        );
        providers.insert(provider.name().to_string(), provider);
        Ok(())
    }

    /// Registers an identity provider. Fails with a configuration error on
    /// a duplicate name and leaves the registry unchanged.
    pub async fn register_identity_provider(
        &self,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<()> {
        let mut providers = self.identity_providers.write().await;
        if providers.contains_key(provider.name()) {
            return Err(MultipassError::configuration(format!(
                "Duplicate identity provider name: {}",
                provider.name()
            )));
        }
        info!(
            "Registering identity provider: {} ({})",
            provider.name(),
            provider.backend()
        );
        self.identity_order
            .write()
            .await
            .push(provider.name().to_string());
        providers.insert(provider.name().to_string(), provider);
        Ok(())
    }

    /// Checks that every declared auth pairing targets a registered
    /// identity provider.
    async fn validate_links(&self) -> Result<()> {
        let auth = self.auth_providers.read().await;
        let identity = self.identity_providers.read().await;
        for provider in auth.values() {
            if let Some(link) = provider.paired_identity_provider() {
                if !identity.contains_key(link) {
                    return Err(MultipassError::configuration(format!(
                        "Auth provider {} is paired with unknown identity provider {}",
                        provider.name(),
                        link
                    )));
                }
            }
        }
        Ok(())
    }

    pub async fn auth_provider(&self, name: &str) -> Result<Arc<dyn AuthProvider>> {
        self.auth_providers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| MultipassError::unknown_provider(ProviderKind::Auth, name))
    }

    pub async fn identity_provider(&self, name: &str) -> Result<Arc<dyn IdentityProvider>> {
        self.identity_providers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| MultipassError::unknown_provider(ProviderKind::Identity, name))
    }

    pub async fn auth_provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.auth_providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Identity provider names in registration order.
    pub async fn identity_provider_names(&self) -> Vec<String> {
        self.identity_order.read().await.clone()
    }

    /// How the named auth provider expects the login flow to start.
    pub async fn login_style(&self, name: &str) -> Result<LoginStyle> {
        Ok(self.auth_provider(name).await?.login_style())
    }

    /// Target URL for starting a redirect-style login with the named
    /// provider.
    pub async fn initiate_login(&self, name: &str, state: &str) -> Result<String> {
        self.auth_provider(name).await?.initiate_login(state).await
    }

    /// Dispatches a login attempt to the named auth provider and, on
    /// success, resolves the result into a normalized identity.
    ///
    /// An unknown provider name fails before any backend is contacted. An
    /// auth failure is surfaced unchanged without attempting identity
    /// resolution. On success, resolution tries the paired identity
    /// provider if one is declared, otherwise each registered identity
    /// provider of the same backend type in registration order; the first
    /// non-empty match wins.
    #[instrument(skip(self, request))]
    pub async fn handle_login(
        &self,
        provider_name: &str,
        request: &LoginRequest,
    ) -> Result<LoginOutcome> {
        let provider = self.auth_provider(provider_name).await?;
        match provider.process_login(request).await? {
            AuthenticationResult::Failure { reason, kind } => {
                debug!("Authentication failed for {}: {}", provider_name, reason);
                Ok(LoginOutcome::AuthFailed { reason, kind })
            }
            AuthenticationResult::Success(auth) => self.resolve_identity(&provider, auth).await,
        }
    }

    async fn resolve_identity(
        &self,
        provider: &Arc<dyn AuthProvider>,
        auth: AuthInfo,
    ) -> Result<LoginOutcome> {
        if let Some(link) = provider.paired_identity_provider() {
            let identity_provider = self.identity_provider(link).await?;
            return match identity_provider.get_identity_from_auth(&auth).await? {
                Some(identity) => Ok(LoginOutcome::IdentityFound { auth, identity }),
                None => Ok(LoginOutcome::IdentityNotFound { auth }),
            };
        }

        let candidates: Vec<Arc<dyn IdentityProvider>> = {
            let order = self.identity_order.read().await;
            let providers = self.identity_providers.read().await;
            order
                .iter()
                .filter_map(|name| providers.get(name).cloned())
                .filter(|candidate| candidate.backend() == provider.backend())
                .collect()
        };

        let mut matches: Vec<IdentityInfo> = Vec::new();
        for candidate in candidates {
            if let Some(identity) = candidate.get_identity_from_auth(&auth).await? {
                if !self.require_single_match {
                    return Ok(LoginOutcome::IdentityFound { auth, identity });
                }
                matches.push(identity);
            }
        }

        if matches.len() > 1 {
            return Err(MultipassError::AmbiguousIdentity {
                providers: matches
                    .iter()
                    .map(|identity| identity.provider().to_string())
                    .collect(),
            });
        }
        match matches.into_iter().next() {
            Some(identity) => Ok(LoginOutcome::IdentityFound { auth, identity }),
            None => Ok(LoginOutcome::IdentityNotFound { auth }),
        }
    }

    /// Searches identities in one provider, or across every search-capable
    /// provider when no name is given.
    ///
    /// The fan-out concatenates results in registration order, without
    /// deduplication, and stops once `limit` is reached. An unreachable
    /// backend is logged and contributes nothing to the fan-out; a
    /// named-provider search propagates the error instead.
    #[instrument(skip(self, criteria))]
    pub async fn search_identities(
        &self,
        provider: Option<&str>,
        criteria: &SearchCriteria,
        exact: bool,
        limit: Option<usize>,
    ) -> Result<Vec<IdentityInfo>> {
        if let Some(name) = provider {
            let provider = self.identity_provider(name).await?;
            if !provider.supports_search() {
                return Err(MultipassError::unsupported(name, Capability::Search));
            }
            let mut results = provider
                .search_identities(&provider.map_search_criteria(criteria), exact)
                .await?;
            if let Some(limit) = limit {
                results.truncate(limit);
            }
            return Ok(results);
        }

        let mut results = Vec::new();
        for provider in self.ordered_identity_providers().await {
            if !provider.supports_search() {
                continue;
            }
            if limit.is_some_and(|limit| results.len() >= limit) {
                break;
            }
            match provider
                .search_identities(&provider.map_search_criteria(criteria), exact)
                .await
            {
                Ok(found) => results.extend(found),
                Err(MultipassError::BackendUnavailable { provider, message }) => {
                    warn!(
                        "Skipping unavailable backend {} during search: {}",
                        provider, message
                    );
                }
                Err(err) => return Err(err),
            }
        }
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// Searches groups by name across group-capable providers, optionally
    /// restricted to the given provider names.
    pub async fn search_groups(
        &self,
        name: &str,
        providers: Option<&[&str]>,
        exact: bool,
    ) -> Result<Vec<Arc<dyn Group>>> {
        let mut results = Vec::new();
        for provider in self.ordered_identity_providers().await {
            if providers.is_some_and(|filter| !filter.contains(&provider.name())) {
                continue;
            }
            if !provider.supports_groups() {
                continue;
            }
            results.extend(provider.search_groups(name, exact).await?);
        }
        Ok(results)
    }

    /// Returns a specific group from the named provider.
    pub async fn get_group(
        &self,
        provider_name: &str,
        group_name: &str,
    ) -> Result<Option<Arc<dyn Group>>> {
        let provider = self.identity_provider(provider_name).await?;
        if !provider.supports_groups() {
            return Err(MultipassError::unsupported(
                provider_name,
                Capability::Groups,
            ));
        }
        provider.get_group(group_name).await
    }

    /// Groups of a resolved identity, via the owning provider's configured
    /// group-resolution strategy.
    pub async fn get_identity_groups(&self, identity: &IdentityInfo) -> Result<Vec<Arc<dyn Group>>> {
        let provider = self.identity_provider(identity.provider()).await?;
        groups::groups_of(&provider, identity).await
    }

    /// Membership test via the owning provider's strategy. With the
    /// attribute strategy and a full `IdentityInfo`, no backend call is
    /// made.
    pub async fn is_member(&self, identity: &IdentityRef, group_name: &str) -> Result<bool> {
        let provider = self.identity_provider(identity.provider()).await?;
        groups::is_member(&provider, identity, group_name).await
    }

    /// Re-fetches identity information for a previously resolved identity.
    pub async fn refresh_identity(
        &self,
        provider_name: &str,
        identifier: &str,
        refresh_data: &HashMap<String, Value>,
    ) -> Result<Option<IdentityInfo>> {
        let provider = self.identity_provider(provider_name).await?;
        if !provider.supports_refresh() {
            return Err(MultipassError::unsupported(
                provider_name,
                Capability::Refresh,
            ));
        }
        provider.refresh_identity(identifier, refresh_data).await
    }

    async fn ordered_identity_providers(&self) -> Vec<Arc<dyn IdentityProvider>> {
        let order = self.identity_order.read().await;
        let providers = self.identity_providers.read().await;
        order
            .iter()
            .filter_map(|name| providers.get(name).cloned())
            .collect()
    }
}

impl Default for Multipass {
    fn default() -> Self {
        Self::new()
    }
}
