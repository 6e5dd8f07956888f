//! Federated single-sign-on backend
//!
//! Trusts authentication performed by a fronting SSO module (Shibboleth
//! style): the validated assertion attributes arrive with the redirect
//! callback, prefixed so they cannot be confused with ordinary request
//! data. No assertion parsing or signature validation happens here; that
//! is the fronting module's job.
//!
//! The backend type name is `shibboleth`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use multipass_core::{
    convert_attributes, remap_keys, AuthInfo, AuthProvider, AuthProviderConfig,
    AuthProviderFactory, AuthenticationResult, GroupResolution, IdentityInfo, IdentityProvider,
    IdentityProviderConfig, IdentityProviderFactory, LoginRequest, LoginStyle, MultipassError,
    Result, SearchCriteria,
};

use super::parse_options;

pub const SHIBBOLETH_BACKEND: &str = "shibboleth";

fn default_attrs_prefix() -> String {
    "ADFS_".to_string()
}

fn default_identifier_field() -> String {
    "ADFS_LOGIN".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct ShibbolethAuthOptions {
    /// Callback parameters starting with this prefix are taken as
    /// assertion attributes; everything else is dropped.
    #[serde(default = "default_attrs_prefix")]
    attrs_prefix: String,
    /// Where the fronting SSO module accepts login requests.
    callback_uri: String,
}

/// Collects assertion attributes handed over by a fronting SSO module.
#[derive(Debug)]
pub struct ShibbolethAuthProvider {
    name: String,
    title: String,
    identity_provider: Option<String>,
    options: ShibbolethAuthOptions,
}

impl ShibbolethAuthProvider {
    pub fn from_config(config: &AuthProviderConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            title: config.title.clone().unwrap_or_else(|| config.name.clone()),
            identity_provider: config.identity_provider.clone(),
            options: parse_options(&config.name, &config.options)?,
        })
    }
}

#[async_trait]
impl AuthProvider for ShibbolethAuthProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        SHIBBOLETH_BACKEND
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn login_style(&self) -> LoginStyle {
        LoginStyle::Redirect
    }

    fn paired_identity_provider(&self) -> Option<&str> {
        self.identity_provider.as_deref()
    }

    async fn initiate_login(&self, _state: &str) -> Result<String> {
        // The SSO module protecting the callback URI starts the actual flow.
        Ok(self.options.callback_uri.clone())
    }

    async fn process_login(&self, request: &LoginRequest) -> Result<AuthenticationResult> {
        let LoginRequest::Callback { params } = request else {
            return Err(MultipassError::internal(
                "Shibboleth authentication expects a redirect callback",
            ));
        };
        let attributes: HashMap<String, Value> = params
            .iter()
            .filter(|(key, _)| key.starts_with(&self.options.attrs_prefix))
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        if attributes.is_empty() {
            return Ok(AuthenticationResult::rejected("No valid assertion data received"));
        }
        debug!("Received {} assertion attributes", attributes.len());
        Ok(AuthenticationResult::success(AuthInfo::new(
            &self.name,
            attributes,
        )))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ShibbolethIdentityOptions {
    /// Assertion attribute holding the unique identifier.
    #[serde(default = "default_identifier_field")]
    identifier_field: String,
}

impl Default for ShibbolethIdentityOptions {
    fn default() -> Self {
        Self {
            identifier_field: default_identifier_field(),
        }
    }
}

/// Maps assertion attributes into the normalized identity model.
pub struct ShibbolethIdentityProvider {
    name: String,
    title: String,
    group_resolution: GroupResolution,
    mapping: HashMap<String, String>,
    options: ShibbolethIdentityOptions,
}

impl ShibbolethIdentityProvider {
    pub fn from_config(config: &IdentityProviderConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            title: config.title.clone().unwrap_or_else(|| config.name.clone()),
            group_resolution: config.group_resolution.clone(),
            mapping: config.mapping.clone(),
            options: parse_options(&config.name, &config.options)?,
        })
    }
}

#[async_trait]
impl IdentityProvider for ShibbolethIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        SHIBBOLETH_BACKEND
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn group_resolution(&self) -> &GroupResolution {
        &self.group_resolution
    }

    async fn get_identity_from_auth(&self, auth: &AuthInfo) -> Result<Option<IdentityInfo>> {
        let Some(identifier) = auth.get_str(&self.options.identifier_field) else {
            return Err(MultipassError::identity_retrieval(
                "Identifier missing in SSO assertion",
            ));
        };
        let data = convert_attributes(auth.data(), &self.mapping, None);
        Ok(Some(IdentityInfo::new(&self.name, identifier, data)))
    }

    fn map_search_criteria(&self, criteria: &SearchCriteria) -> SearchCriteria {
        remap_keys(criteria, &self.mapping)
    }
}

pub struct ShibbolethAuthFactory;

#[async_trait]
impl AuthProviderFactory for ShibbolethAuthFactory {
    fn backend(&self) -> &'static str {
        SHIBBOLETH_BACKEND
    }

    async fn create(&self, config: &AuthProviderConfig) -> Result<Arc<dyn AuthProvider>> {
        Ok(Arc::new(ShibbolethAuthProvider::from_config(config)?))
    }
}

pub struct ShibbolethIdentityFactory;

#[async_trait]
impl IdentityProviderFactory for ShibbolethIdentityFactory {
    fn backend(&self) -> &'static str {
        SHIBBOLETH_BACKEND
    }

    async fn create(&self, config: &IdentityProviderConfig) -> Result<Arc<dyn IdentityProvider>> {
        Ok(Arc::new(ShibbolethIdentityProvider::from_config(config)?))
    }
}
