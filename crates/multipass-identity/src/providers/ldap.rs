//! LDAP / Active Directory backend
//!
//! Authenticates with a service bind, a user search and a bind as the found
//! user; resolves and searches identities through configurable attribute
//! mappings; answers group membership via the directory's member-of
//! attribute, including member enumeration.
//!
//! Requires the `ldap` feature. The backend type name is `ldap`.

use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use multipass_core::{
    attrs, remap_keys, AuthInfo, AuthProvider, AuthProviderConfig, AuthProviderFactory,
    AuthenticationResult, Group, GroupResolution, IdentityInfo, IdentityProvider,
    IdentityProviderConfig, IdentityProviderFactory, LoginRequest, LoginStyle, MultipassError,
    Result, SearchCriteria,
};

use super::parse_options;

pub const LDAP_BACKEND: &str = "ldap";

fn default_username_attr() -> String {
    "sAMAccountName".to_string()
}
fn default_email_attr() -> String {
    "mail".to_string()
}
fn default_display_name_attr() -> String {
    "displayName".to_string()
}
fn default_first_name_attr() -> String {
    "givenName".to_string()
}
fn default_last_name_attr() -> String {
    "sn".to_string()
}
fn default_phone_attr() -> String {
    "telephoneNumber".to_string()
}
fn default_affiliation_attr() -> String {
    "company".to_string()
}
fn default_member_of_attr() -> String {
    "memberOf".to_string()
}
fn default_group_name_attr() -> String {
    "cn".to_string()
}
fn default_user_filter() -> String {
    "(objectClass=person)".to_string()
}
fn default_group_filter() -> String {
    "(objectClass=group)".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct LdapAttributeMappings {
    #[serde(default = "default_username_attr")]
    username: String,
    #[serde(default = "default_email_attr")]
    email: String,
    #[serde(default = "default_display_name_attr")]
    display_name: String,
    #[serde(default = "default_first_name_attr")]
    first_name: String,
    #[serde(default = "default_last_name_attr")]
    last_name: String,
    #[serde(default = "default_phone_attr")]
    phone: String,
    #[serde(default = "default_affiliation_attr")]
    affiliation: String,
    #[serde(default = "default_member_of_attr")]
    member_of: String,
    #[serde(default = "default_group_name_attr")]
    group_name: String,
}

impl Default for LdapAttributeMappings {
    fn default() -> Self {
        Self {
            username: default_username_attr(),
            email: default_email_attr(),
            display_name: default_display_name_attr(),
            first_name: default_first_name_attr(),
            last_name: default_last_name_attr(),
            phone: default_phone_attr(),
            affiliation: default_affiliation_attr(),
            member_of: default_member_of_attr(),
            group_name: default_group_name_attr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LdapOptions {
    /// Server URL, e.g. `ldaps://ldap.example.com:636`.
    server_url: String,
    bind_dn: String,
    bind_password: String,
    user_base_dn: String,
    #[serde(default = "default_user_filter")]
    user_filter: String,
    /// Base DN for group lookups; groups are unsupported without it.
    #[serde(default)]
    group_base_dn: Option<String>,
    #[serde(default = "default_group_filter")]
    group_filter: String,
    #[serde(default)]
    attribute_mappings: LdapAttributeMappings,
    #[serde(default)]
    start_tls: bool,
}

/// Connection and mapping plumbing shared by the auth provider, the
/// identity provider and group objects of one configured directory.
struct LdapBackend {
    provider: String,
    options: LdapOptions,
}

impl LdapBackend {
    async fn connect(&self) -> Result<Ldap> {
        let settings = LdapConnSettings::new().set_starttls(self.options.start_tls);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.options.server_url)
            .await
            .map_err(|err| {
                MultipassError::backend_unavailable(
                    &self.provider,
                    format!("LDAP connection failed: {err}"),
                )
            })?;
        ldap3::drive!(conn);

        ldap.simple_bind(&self.options.bind_dn, &self.options.bind_password)
            .await
            .map_err(|err| {
                MultipassError::backend_unavailable(
                    &self.provider,
                    format!("LDAP bind failed: {err}"),
                )
            })?
            .success()
            .map_err(|err| {
                MultipassError::backend_unavailable(
                    &self.provider,
                    format!("LDAP service bind rejected: {err}"),
                )
            })?;
        Ok(ldap)
    }

    async fn search(&self, ldap: &mut Ldap, base: &str, filter: &str) -> Result<Vec<SearchEntry>> {
        let (rs, _result) = ldap
            .search(base, Scope::Subtree, filter, vec!["*"])
            .await
            .map_err(|err| {
                MultipassError::backend_unavailable(
                    &self.provider,
                    format!("LDAP search failed: {err}"),
                )
            })?
            .success()
            .map_err(|err| {
                MultipassError::backend_unavailable(
                    &self.provider,
                    format!("LDAP search failed: {err}"),
                )
            })?;
        Ok(rs.into_iter().map(SearchEntry::construct).collect())
    }

    fn user_filter_with(&self, extra: &str) -> String {
        format!("(&{}{})", self.options.user_filter, extra)
    }

    async fn find_user(&self, ldap: &mut Ldap, identifier: &str) -> Result<Option<SearchEntry>> {
        let filter = self.user_filter_with(&format!(
            "({}={})",
            self.options.attribute_mappings.username,
            ldap_escape(identifier)
        ));
        Ok(self
            .search(ldap, &self.options.user_base_dn, &filter)
            .await?
            .into_iter()
            .next())
    }

    fn entry_to_identity(&self, entry: &SearchEntry) -> Option<IdentityInfo> {
        let mappings = &self.options.attribute_mappings;
        let get = |attr: &str| entry.attrs.get(attr).and_then(|values| values.first());

        let identifier = get(&mappings.username)?.clone();
        let mut data = HashMap::new();
        for (key, attr) in [
            (attrs::EMAIL, &mappings.email),
            (attrs::DISPLAY_NAME, &mappings.display_name),
            (attrs::FIRST_NAME, &mappings.first_name),
            (attrs::LAST_NAME, &mappings.last_name),
            (attrs::PHONE, &mappings.phone),
            (attrs::AFFILIATION, &mappings.affiliation),
        ] {
            if let Some(value) = get(attr) {
                data.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        if let Some(groups) = entry.attrs.get(&mappings.member_of) {
            data.insert(
                attrs::GROUPS.to_string(),
                Value::Array(
                    groups
                        .iter()
                        .map(|dn| Value::String(dn.clone()))
                        .collect(),
                ),
            );
        }
        data.insert("dn".to_string(), Value::String(entry.dn.clone()));
        Some(IdentityInfo::new(&self.provider, identifier, data))
    }
}

/// Authenticates by binding to the directory as the user.
pub struct LdapAuthProvider {
    name: String,
    title: String,
    identity_provider: Option<String>,
    backend: Arc<LdapBackend>,
}

impl LdapAuthProvider {
    pub fn from_config(config: &AuthProviderConfig) -> Result<Self> {
        let options: LdapOptions = parse_options(&config.name, &config.options)?;
        Ok(Self {
            name: config.name.clone(),
            title: config.title.clone().unwrap_or_else(|| config.name.clone()),
            identity_provider: config.identity_provider.clone(),
            backend: Arc::new(LdapBackend {
                provider: config.name.clone(),
                options,
            }),
        })
    }

    async fn bind_as_user(&self, dn: &str, password: &str) -> Result<AuthenticationResult> {
        let settings =
            LdapConnSettings::new().set_starttls(self.backend.options.start_tls);
        let (conn, mut ldap) =
            match LdapConnAsync::with_settings(settings, &self.backend.options.server_url).await {
                Ok(connected) => connected,
                Err(err) => {
                    return Ok(AuthenticationResult::unavailable(format!(
                        "LDAP connection failed: {err}"
                    )));
                }
            };
        ldap3::drive!(conn);

        let outcome = match ldap.simple_bind(dn, password).await {
            Err(err) => AuthenticationResult::unavailable(format!("LDAP bind failed: {err}")),
            Ok(result) => match result.success() {
                Ok(_) => AuthenticationResult::success(AuthInfo::new(
                    &self.name,
                    HashMap::from([("dn".to_string(), Value::String(dn.to_string()))]),
                )),
                Err(_) => AuthenticationResult::rejected("Invalid credentials"),
            },
        };
        ldap.unbind().await.ok();
        Ok(outcome)
    }
}

#[async_trait]
impl AuthProvider for LdapAuthProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        LDAP_BACKEND
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

    #[instrument(skip(self, request), fields(provider = %self.name))]
    async fn process_login(&self, request: &LoginRequest) -> Result<AuthenticationResult> {
        let LoginRequest::Form { fields } = request else {
            return Err(MultipassError::internal(
                "LDAP authentication expects a form submission",
            ));
        };
        let (Some(username), Some(password)) = (fields.get("username"), fields.get("password"))
        else {
            return Ok(AuthenticationResult::rejected("Missing username or password"));
        };
        // An empty password would turn the user bind into an anonymous bind.
        if password.is_empty() {
            return Ok(AuthenticationResult::rejected("Empty password"));
        }

        let mut ldap = match self.backend.connect().await {
            Ok(ldap) => ldap,
            Err(MultipassError::BackendUnavailable { message, .. }) => {
                return Ok(AuthenticationResult::unavailable(message));
            }
            Err(err) => return Err(err),
        };

        let entry = self.backend.find_user(&mut ldap, username).await;
        ldap.unbind().await.ok();
        let entry = match entry {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(AuthenticationResult::rejected("No such user")),
            Err(MultipassError::BackendUnavailable { message, .. }) => {
                return Ok(AuthenticationResult::unavailable(message));
            }
            Err(err) => return Err(err),
        };

        debug!("Binding as {}", entry.dn);
        match self.bind_as_user(&entry.dn, password).await? {
            AuthenticationResult::Success(_) => {
                let identifier = entry
                    .attrs
                    .get(&self.backend.options.attribute_mappings.username)
                    .and_then(|values| values.first())
                    .cloned()
                    .unwrap_or_else(|| username.clone());
                Ok(AuthenticationResult::success(AuthInfo::new(
                    &self.name,
                    HashMap::from([
                        ("identifier".to_string(), Value::String(identifier)),
                        ("dn".to_string(), Value::String(entry.dn.clone())),
                    ]),
                )))
            }
            failure => Ok(failure),
        }
    }
}

/// Resolves and searches directory identities and groups.
pub struct LdapIdentityProvider {
    name: String,
    title: String,
    group_resolution: GroupResolution,
    mapping: HashMap<String, String>,
    backend: Arc<LdapBackend>,
}

impl LdapIdentityProvider {
    pub fn from_config(config: &IdentityProviderConfig) -> Result<Self> {
        let options: LdapOptions = parse_options(&config.name, &config.options)?;
        Ok(Self {
            name: config.name.clone(),
            title: config.title.clone().unwrap_or_else(|| config.name.clone()),
            group_resolution: config.group_resolution.clone(),
            mapping: config.mapping.clone(),
            backend: Arc::new(LdapBackend {
                provider: config.name.clone(),
                options,
            }),
        })
    }

    async fn find_group(&self, name: &str, exact: bool) -> Result<Vec<Arc<dyn Group>>> {
        let Some(group_base) = self.backend.options.group_base_dn.as_deref() else {
            return Ok(Vec::new());
        };
        let name_attr = &self.backend.options.attribute_mappings.group_name;
        let escaped = ldap_escape(name);
        let filter = if exact {
            format!(
                "(&{}({}={}))",
                self.backend.options.group_filter, name_attr, escaped
            )
        } else {
            format!(
                "(&{}({}=*{}*))",
                self.backend.options.group_filter, name_attr, escaped
            )
        };

        let mut ldap = self.backend.connect().await?;
        let entries = self.backend.search(&mut ldap, group_base, &filter).await;
        ldap.unbind().await.ok();

        Ok(entries?
            .into_iter()
            .filter_map(|entry| {
                let group_name = entry
                    .attrs
                    .get(name_attr)
                    .and_then(|values| values.first())?
                    .clone();
                Some(Arc::new(LdapGroup {
                    backend: self.backend.clone(),
                    name: group_name,
                    dn: entry.dn,
                }) as Arc<dyn Group>)
            })
            .collect())
    }
}

#[async_trait]
impl IdentityProvider for LdapIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        LDAP_BACKEND
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
        self.backend.options.group_base_dn.is_some()
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn supports_identity_lookup(&self) -> bool {
        true
    }

    async fn get_identity_from_auth(&self, auth: &AuthInfo) -> Result<Option<IdentityInfo>> {
        let Some(identifier) = auth.get_str("identifier") else {
            return Err(MultipassError::identity_retrieval(
                "Auth data is missing the identifier field",
            ));
        };
        self.get_identity(identifier).await
    }

    async fn get_identity(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        let mut ldap = self.backend.connect().await?;
        let entry = self.backend.find_user(&mut ldap, identifier).await;
        ldap.unbind().await.ok();
        Ok(entry?.and_then(|entry| self.backend.entry_to_identity(&entry)))
    }

    async fn refresh_identity(
        &self,
        identifier: &str,
        _refresh_data: &HashMap<String, Value>,
    ) -> Result<Option<IdentityInfo>> {
        self.get_identity(identifier).await
    }

    #[instrument(skip(self, criteria), fields(provider = %self.name))]
    async fn search_identities(
        &self,
        criteria: &SearchCriteria,
        exact: bool,
    ) -> Result<Vec<IdentityInfo>> {
        let mut clauses = String::new();
        for (key, value) in criteria {
            let value = match value.as_str() {
                Some(value) => value.to_string(),
                None => value.to_string(),
            };
            let escaped = ldap_escape(value.as_str()).into_owned();
            if exact {
                clauses.push_str(&format!("({}={})", key, escaped));
            } else {
                clauses.push_str(&format!("({}=*{}*)", key, escaped));
            }
        }
        let filter = self.backend.user_filter_with(&clauses);

        let mut ldap = self.backend.connect().await?;
        let entries = self
            .backend
            .search(&mut ldap, &self.backend.options.user_base_dn, &filter)
            .await;
        ldap.unbind().await.ok();

        Ok(entries?
            .iter()
            .filter_map(|entry| self.backend.entry_to_identity(entry))
            .collect())
    }

    async fn get_identity_groups(&self, identifier: &str) -> Result<Vec<Arc<dyn Group>>> {
        let mut ldap = self.backend.connect().await?;
        let entry = self.backend.find_user(&mut ldap, identifier).await;
        ldap.unbind().await.ok();
        let Some(entry) = entry? else {
            return Ok(Vec::new());
        };

        let member_of = &self.backend.options.attribute_mappings.member_of;
        Ok(entry
            .attrs
            .get(member_of)
            .map(|dns| {
                dns.iter()
                    .map(|dn| {
                        Arc::new(LdapGroup {
                            backend: self.backend.clone(),
                            name: group_name_from_dn(dn),
                            dn: dn.clone(),
                        }) as Arc<dyn Group>
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_group(&self, name: &str) -> Result<Option<Arc<dyn Group>>> {
        Ok(self.find_group(name, true).await?.into_iter().next())
    }

    async fn search_groups(&self, name: &str, exact: bool) -> Result<Vec<Arc<dyn Group>>> {
        self.find_group(name, exact).await
    }

    fn map_search_criteria(&self, criteria: &SearchCriteria) -> SearchCriteria {
        remap_keys(criteria, &self.mapping)
    }
}

/// First RDN value of a group DN, e.g. `cn=Admins,ou=...` → `Admins`.
fn group_name_from_dn(dn: &str) -> String {
    dn.split(',')
        .next()
        .and_then(|rdn| rdn.split_once('='))
        .map(|(_, value)| value.to_string())
        .unwrap_or_else(|| dn.to_string())
}

/// A directory group; membership is answered through the member-of
/// attribute of user entries.
pub struct LdapGroup {
    backend: Arc<LdapBackend>,
    name: String,
    dn: String,
}

impl std::fmt::Debug for LdapGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapGroup")
            .field("provider", &self.backend.provider)
            .field("name", &self.name)
            .field("dn", &self.dn)
            .finish()
    }
}

#[async_trait]
impl Group for LdapGroup {
    fn provider_name(&self) -> &str {
        &self.backend.provider
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_member_list(&self) -> bool {
        true
    }

    async fn get_members(&self) -> Result<Vec<String>> {
        let filter = self.backend.user_filter_with(&format!(
            "({}={})",
            self.backend.options.attribute_mappings.member_of,
            ldap_escape(self.dn.as_str())
        ));
        let mut ldap = self.backend.connect().await?;
        let entries = self
            .backend
            .search(&mut ldap, &self.backend.options.user_base_dn, &filter)
            .await;
        ldap.unbind().await.ok();

        let username_attr = &self.backend.options.attribute_mappings.username;
        Ok(entries?
            .iter()
            .filter_map(|entry| entry.attrs.get(username_attr)?.first().cloned())
            .collect())
    }

    async fn has_member(&self, identifier: &str) -> Result<bool> {
        let filter = self.backend.user_filter_with(&format!(
            "({}={})({}={})",
            self.backend.options.attribute_mappings.username,
            ldap_escape(identifier),
            self.backend.options.attribute_mappings.member_of,
            ldap_escape(self.dn.as_str())
        ));
        let mut ldap = self.backend.connect().await?;
        let entries = self
            .backend
            .search(&mut ldap, &self.backend.options.user_base_dn, &filter)
            .await;
        ldap.unbind().await.ok();
        Ok(!entries?.is_empty())
    }
}

pub struct LdapAuthFactory;

#[async_trait]
impl AuthProviderFactory for LdapAuthFactory {
    fn backend(&self) -> &'static str {
        LDAP_BACKEND
    }

    async fn create(&self, config: &AuthProviderConfig) -> Result<Arc<dyn AuthProvider>> {
        Ok(Arc::new(LdapAuthProvider::from_config(config)?))
    }
}

pub struct LdapIdentityFactory;

#[async_trait]
impl IdentityProviderFactory for LdapIdentityFactory {
    fn backend(&self) -> &'static str {
        LDAP_BACKEND
    }

    async fn create(&self, config: &IdentityProviderConfig) -> Result<Arc<dyn IdentityProvider>> {
        Ok(Arc::new(LdapIdentityProvider::from_config(config)?))
    }
}
