//! Static in-configuration backend
//!
//! Authenticates against a username/password table and resolves identities
//! and groups from tables defined directly in the provider options. Meant
//! for development and tests; never use it in a production system.
//!
//! The backend type name is `static`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use multipass_core::{
    remap_keys, AuthInfo, AuthProvider, AuthProviderConfig, AuthProviderFactory,
    AuthenticationResult, Group, GroupResolution, IdentityInfo, IdentityProvider,
    IdentityProviderConfig, IdentityProviderFactory, LoginRequest, LoginStyle, MultipassError,
    Result, SearchCriteria,
};

use super::parse_options;

pub const STATIC_BACKEND: &str = "static";

fn default_identifier_field() -> String {
    "username".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StaticAuthOptions {
    /// username → password
    #[serde(default)]
    users: HashMap<String, String>,
}

/// Authenticates against a static username/password table.
pub struct StaticAuthProvider {
    name: String,
    title: String,
    identity_provider: Option<String>,
    options: StaticAuthOptions,
}

impl StaticAuthProvider {
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
impl AuthProvider for StaticAuthProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        STATIC_BACKEND
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn login_style(&self) -> LoginStyle {
        LoginStyle::Form
    }

    fn paired_identity_provider(&self) -> Option<&str> {
        self.identity_provider.as_deref()
    }

    async fn process_login(&self, request: &LoginRequest) -> Result<AuthenticationResult> {
        let LoginRequest::Form { fields } = request else {
            return Err(MultipassError::internal(
                "Static authentication expects a form submission",
            ));
        };
        let (Some(username), Some(password)) = (fields.get("username"), fields.get("password"))
        else {
            return Ok(AuthenticationResult::rejected("Missing username or password"));
        };
        match self.options.users.get(username) {
            None => Ok(AuthenticationResult::rejected("No such user")),
            Some(expected) if expected != password => {
                Ok(AuthenticationResult::rejected("Invalid password"))
            }
            Some(_) => {
                debug!("Static login for {}", username);
                Ok(AuthenticationResult::success(AuthInfo::new(
                    &self.name,
                    HashMap::from([("username".to_string(), Value::String(username.clone()))]),
                )))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StaticIdentityOptions {
    /// identifier → attribute map
    #[serde(default)]
    identities: HashMap<String, HashMap<String, Value>>,
    /// group name → member identifiers
    #[serde(default)]
    groups: HashMap<String, Vec<String>>,
    /// Auth data key holding the identifier.
    #[serde(default = "default_identifier_field")]
    identifier_field: String,
}

impl Default for StaticIdentityOptions {
    fn default() -> Self {
        Self {
            identities: HashMap::new(),
            groups: HashMap::new(),
            identifier_field: default_identifier_field(),
        }
    }
}

/// Resolves identities and groups from static in-configuration tables.
pub struct StaticIdentityProvider {
    name: String,
    title: String,
    group_resolution: GroupResolution,
    mapping: HashMap<String, String>,
    options: StaticIdentityOptions,
}

impl StaticIdentityProvider {
    pub fn from_config(config: &IdentityProviderConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            title: config.title.clone().unwrap_or_else(|| config.name.clone()),
            group_resolution: config.group_resolution.clone(),
            mapping: config.mapping.clone(),
            options: parse_options(&config.name, &config.options)?,
        })
    }

    fn lookup(&self, identifier: &str) -> Option<IdentityInfo> {
        self.options
            .identities
            .get(identifier)
            .map(|attributes| IdentityInfo::new(&self.name, identifier, attributes.clone()))
    }

    fn group(&self, name: &str) -> Option<Arc<dyn Group>> {
        self.options.groups.get(name).map(|members| {
            Arc::new(StaticGroup {
                provider: self.name.clone(),
                name: name.to_string(),
                members: members.clone(),
            }) as Arc<dyn Group>
        })
    }
}

fn attribute_matches(value: Option<&Value>, expected: &Value, exact: bool) -> bool {
    let Some(value) = value else {
        return false;
    };
    if exact {
        return value == expected;
    }
    match (value.as_str(), expected.as_str()) {
        (Some(haystack), Some(needle)) => {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }
        _ => value == expected,
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        STATIC_BACKEND
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn group_resolution(&self) -> &GroupResolution {
        &self.group_resolution
    }

    fn supports_search(&self) -> bool {
        true
    }

    fn supports_groups(&self) -> bool {
        true
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn supports_identity_lookup(&self) -> bool {
        true
    }

    async fn get_identity_from_auth(&self, auth: &AuthInfo) -> Result<Option<IdentityInfo>> {
        let Some(identifier) = auth.get_str(&self.options.identifier_field) else {
            return Err(MultipassError::identity_retrieval(format!(
                "Auth data is missing the {} field",
                self.options.identifier_field
            )));
        };
        Ok(self.lookup(identifier))
    }

    async fn get_identity(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        Ok(self.lookup(identifier))
    }

    async fn refresh_identity(
        &self,
        identifier: &str,
        _refresh_data: &HashMap<String, Value>,
    ) -> Result<Option<IdentityInfo>> {
        Ok(self.lookup(identifier))
    }

    async fn search_identities(
        &self,
        criteria: &SearchCriteria,
        exact: bool,
    ) -> Result<Vec<IdentityInfo>> {
        let mut results: Vec<IdentityInfo> = self
            .options
            .identities
            .iter()
            .filter(|(_, attributes)| {
                criteria
                    .iter()
                    .all(|(key, expected)| attribute_matches(attributes.get(key), expected, exact))
            })
            .map(|(identifier, attributes)| {
                IdentityInfo::new(&self.name, identifier, attributes.clone())
            })
            .collect();
        results.sort_by(|a, b| a.identifier().cmp(b.identifier()));
        Ok(results)
    }

    async fn get_identity_groups(&self, identifier: &str) -> Result<Vec<Arc<dyn Group>>> {
        let mut names: Vec<&String> = self
            .options
            .groups
            .iter()
            .filter(|(_, members)| members.iter().any(|member| member == identifier))
            .map(|(name, _)| name)
            .collect();
        names.sort();
        Ok(names.into_iter().filter_map(|name| self.group(name)).collect())
    }

    async fn get_group(&self, name: &str) -> Result<Option<Arc<dyn Group>>> {
        Ok(self.group(name))
    }

    async fn search_groups(&self, name: &str, exact: bool) -> Result<Vec<Arc<dyn Group>>> {
        let needle = name.to_lowercase();
        let mut names: Vec<&String> = self
            .options
            .groups
            .keys()
            .filter(|candidate| {
                if exact {
                    candidate.as_str() == name
                } else {
                    candidate.to_lowercase().contains(&needle)
                }
            })
            .collect();
        names.sort();
        Ok(names.into_iter().filter_map(|name| self.group(name)).collect())
    }

    fn map_search_criteria(&self, criteria: &SearchCriteria) -> SearchCriteria {
        remap_keys(criteria, &self.mapping)
    }
}

/// A group backed by a static member list.
#[derive(Debug)]
pub struct StaticGroup {
    provider: String,
    name: String,
    members: Vec<String>,
}

#[async_trait]
impl Group for StaticGroup {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_member_list(&self) -> bool {
        true
    }

    async fn get_members(&self) -> Result<Vec<String>> {
        Ok(self.members.clone())
    }

    async fn has_member(&self, identifier: &str) -> Result<bool> {
        Ok(self.members.iter().any(|member| member == identifier))
    }
}

pub struct StaticAuthFactory;

#[async_trait]
impl AuthProviderFactory for StaticAuthFactory {
    fn backend(&self) -> &'static str {
        STATIC_BACKEND
    }

    async fn create(&self, config: &AuthProviderConfig) -> Result<Arc<dyn AuthProvider>> {
        Ok(Arc::new(StaticAuthProvider::from_config(config)?))
    }
}

pub struct StaticIdentityFactory;

#[async_trait]
impl IdentityProviderFactory for StaticIdentityFactory {
    fn backend(&self) -> &'static str {
        STATIC_BACKEND
    }

    async fn create(&self, config: &IdentityProviderConfig) -> Result<Arc<dyn IdentityProvider>> {
        Ok(Arc::new(StaticIdentityProvider::from_config(config)?))
    }
}
