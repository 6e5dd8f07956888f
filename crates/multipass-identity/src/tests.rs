//! Unit tests for multipass-identity

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use multipass_core::{
    AuthFailureKind, AuthInfo, AuthProvider, AuthProviderConfig, AuthenticationResult, Capability,
    GroupResolution, IdentityInfo, IdentityProvider, IdentityProviderConfig,
    IdentityProviderFactory, IdentityRef, LoginOutcome, LoginRequest, LoginStyle, MultipassError,
    ProviderKind, ProviderOptions, Result, SearchCriteria,
};

use crate::providers::default_backends;
use crate::providers::memory::{StaticAuthProvider, StaticIdentityProvider};
use crate::registry::{Multipass, MultipassSettings};

// =============================================================================
// Test Fixtures
// =============================================================================

fn options(value: Value) -> ProviderOptions {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => panic!("options fixture must be an object"),
    }
}

fn form(fields: &[(&str, &str)]) -> LoginRequest {
    LoginRequest::form(
        fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
    )
}

fn static_auth_config(name: &str, paired: Option<&str>) -> AuthProviderConfig {
    let mut config = AuthProviderConfig::new(name, "static");
    config.identity_provider = paired.map(String::from);
    config.options = options(json!({
        "users": {"alice": "correcthorse", "bob": "hunter2"},
    }));
    config
}

fn static_identity_config(name: &str) -> IdentityProviderConfig {
    let mut config = IdentityProviderConfig::new(name, "static");
    config.options = options(json!({
        "identities": {
            "alice": {
                "email": "a@x.org",
                "display_name": "Alice",
                "groups": ["admins", "staff"],
            },
            "bob": {"email": "bob@x.org", "display_name": "Bob"},
        },
        "groups": {
            "admins": ["alice"],
            "staff": ["alice", "bob"],
        },
    }));
    config
}

fn static_auth(name: &str, paired: Option<&str>) -> Arc<StaticAuthProvider> {
    Arc::new(StaticAuthProvider::from_config(&static_auth_config(name, paired)).unwrap())
}

fn static_identity(name: &str) -> Arc<StaticIdentityProvider> {
    Arc::new(StaticIdentityProvider::from_config(&static_identity_config(name)).unwrap())
}

/// Auth provider returning a pre-scripted result and counting invocations.
struct ScriptedAuth {
    name: String,
    backend: String,
    paired: Option<String>,
    result: AuthenticationResult,
    calls: AtomicUsize,
}

impl ScriptedAuth {
    fn success(name: &str, backend: &str, identifier: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            backend: backend.to_string(),
            paired: None,
            result: AuthenticationResult::success(AuthInfo::new(
                name,
                HashMap::from([("username".to_string(), json!(identifier))]),
            )),
            calls: AtomicUsize::new(0),
        })
    }

    fn rejected(name: &str, backend: &str, reason: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            backend: backend.to_string(),
            paired: None,
            result: AuthenticationResult::rejected(reason),
            calls: AtomicUsize::new(0),
        })
    }

    fn with_pairing(mut self: Arc<Self>, paired: &str) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().paired = Some(paired.to_string());
        self
    }
}

#[async_trait]
impl AuthProvider for ScriptedAuth {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        &self.backend
    }

    fn title(&self) -> &str {
        &self.name
    }

    fn login_style(&self) -> LoginStyle {
        LoginStyle::Form
    }

    fn paired_identity_provider(&self) -> Option<&str> {
        self.paired.as_deref()
    }

    async fn process_login(&self, _request: &LoginRequest) -> Result<AuthenticationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

/// Identity provider returning a pre-scripted identity and counting every
/// backend-touching call.
struct ScriptedIdentity {
    name: String,
    backend: String,
    resolution: GroupResolution,
    identity: Option<IdentityInfo>,
    groups_supported: bool,
    calls: AtomicUsize,
}

impl ScriptedIdentity {
    fn new(name: &str, backend: &str, identity: Option<IdentityInfo>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            backend: backend.to_string(),
            resolution: GroupResolution::ProviderQuery,
            identity,
            groups_supported: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn with_attribute_groups(name: &str, backend: &str, identity: Option<IdentityInfo>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            backend: backend.to_string(),
            resolution: GroupResolution::identity_attribute(),
            identity,
            groups_supported: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn backend_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ScriptedIdentity {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        &self.backend
    }

    fn title(&self) -> &str {
        &self.name
    }

    fn group_resolution(&self) -> &GroupResolution {
        &self.resolution
    }

    fn supports_groups(&self) -> bool {
        self.groups_supported
    }

    fn supports_identity_lookup(&self) -> bool {
        true
    }

    async fn get_identity_from_auth(&self, _auth: &AuthInfo) -> Result<Option<IdentityInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.identity.clone())
    }

    async fn get_identity(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .identity
            .clone()
            .filter(|identity| identity.identifier() == identifier))
    }
}

/// Search-capable identity provider whose backend is unreachable.
struct UnreachableSearch {
    name: String,
    resolution: GroupResolution,
}

impl UnreachableSearch {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            resolution: GroupResolution::ProviderQuery,
        })
    }
}

#[async_trait]
impl IdentityProvider for UnreachableSearch {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        "static"
    }

    fn title(&self) -> &str {
        &self.name
    }

    fn group_resolution(&self) -> &GroupResolution {
        &self.resolution
    }

    fn supports_search(&self) -> bool {
        true
    }

    async fn get_identity_from_auth(&self, _auth: &AuthInfo) -> Result<Option<IdentityInfo>> {
        Ok(None)
    }

    async fn search_identities(
        &self,
        _criteria: &SearchCriteria,
        _exact: bool,
    ) -> Result<Vec<IdentityInfo>> {
        Err(MultipassError::backend_unavailable(
            &self.name,
            "directory offline",
        ))
    }
}

// =============================================================================
// Registration Tests
// =============================================================================

mod registration_tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_auth_name_rejected() {
        let registry = Multipass::new();
        registry
            .register_auth_provider(static_auth("corp", None))
            .await
            .unwrap();
        let err = registry
            .register_auth_provider(static_auth("corp", None))
            .await
            .unwrap_err();
        assert!(matches!(err, MultipassError::Configuration { .. }));
        // the registry is unchanged
        assert_eq!(registry.auth_provider_names().await, vec!["corp"]);
    }

    #[tokio::test]
    async fn test_duplicate_identity_name_rejected() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(static_identity("dir"))
            .await
            .unwrap();
        let err = registry
            .register_identity_provider(static_identity("dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, MultipassError::Configuration { .. }));
        assert_eq!(registry.identity_provider_names().await, vec!["dir"]);
    }

    #[tokio::test]
    async fn test_auth_and_identity_namespaces_are_disjoint() {
        let registry = Multipass::new();
        registry
            .register_auth_provider(static_auth("corp", None))
            .await
            .unwrap();
        // the same name is fine for the other kind
        registry
            .register_identity_provider(static_identity("corp"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_style_lookup() {
        let registry = Multipass::new();
        registry
            .register_auth_provider(static_auth("corp", None))
            .await
            .unwrap();
        assert_eq!(
            registry.login_style("corp").await.unwrap(),
            LoginStyle::Form
        );
        assert!(matches!(
            registry.login_style("nope").await.unwrap_err(),
            MultipassError::UnknownProvider {
                kind: ProviderKind::Auth,
                ..
            }
        ));
    }
}

// =============================================================================
// Login Dispatch Tests
// =============================================================================

mod login_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_provider_fails_before_any_backend() {
        let registry = Multipass::new();
        let auth = ScriptedAuth::success("real", "scripted", "alice");
        registry.register_auth_provider(auth.clone()).await.unwrap();

        let err = registry
            .handle_login("missing", &form(&[]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MultipassError::UnknownProvider {
                kind: ProviderKind::Auth,
                ..
            }
        ));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_skips_identity_resolution() {
        let registry = Multipass::new();
        let auth = ScriptedAuth::rejected("corp", "scripted", "Invalid password");
        let identity = ScriptedIdentity::new("dir", "scripted", None);
        registry.register_auth_provider(auth).await.unwrap();
        registry
            .register_identity_provider(identity.clone())
            .await
            .unwrap();

        let outcome = registry.handle_login("corp", &form(&[])).await.unwrap();
        match outcome {
            LoginOutcome::AuthFailed { reason, kind } => {
                assert_eq!(reason, "Invalid password");
                assert_eq!(kind, AuthFailureKind::Rejected);
            }
            other => panic!("expected AuthFailed, got {other:?}"),
        }
        assert_eq!(identity.backend_calls(), 0);
    }

    #[tokio::test]
    async fn test_paired_login_resolves_identity() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(static_identity("ldap1"))
            .await
            .unwrap();
        registry
            .register_auth_provider(static_auth("ldap1", Some("ldap1")))
            .await
            .unwrap();

        let outcome = registry
            .handle_login("ldap1", &form(&[("username", "alice"), ("password", "correcthorse")]))
            .await
            .unwrap();
        let identity = outcome.identity().expect("identity should be resolved");
        assert_eq!(identity.provider(), "ldap1");
        assert_eq!(identity.identifier(), "alice");
        assert_eq!(identity.get_str("email"), Some("a@x.org"));
    }

    #[tokio::test]
    async fn test_paired_login_without_identity_record() {
        // valid credentials but no identity record: a distinct outcome, not
        // an error and not an auth failure
        let registry = Multipass::new();
        let auth = ScriptedAuth::success("ldap1", "scripted", "alice").with_pairing("ldap1");
        let identity = ScriptedIdentity::new("ldap1", "scripted", None);
        registry.register_identity_provider(identity).await.unwrap();
        registry.register_auth_provider(auth).await.unwrap();

        let outcome = registry.handle_login("ldap1", &form(&[])).await.unwrap();
        assert!(matches!(outcome, LoginOutcome::IdentityNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unpaired_login_first_registered_provider_wins() {
        let registry = Multipass::new();
        let first = ScriptedIdentity::new(
            "first",
            "scripted",
            Some(IdentityInfo::new("first", "alice", HashMap::new())),
        );
        let second = ScriptedIdentity::new(
            "second",
            "scripted",
            Some(IdentityInfo::new("second", "alice", HashMap::new())),
        );
        registry.register_identity_provider(first).await.unwrap();
        registry
            .register_identity_provider(second.clone())
            .await
            .unwrap();
        registry
            .register_auth_provider(ScriptedAuth::success("corp", "scripted", "alice"))
            .await
            .unwrap();

        let outcome = registry.handle_login("corp", &form(&[])).await.unwrap();
        assert_eq!(outcome.identity().unwrap().provider(), "first");
        // resolution stopped at the first match
        assert_eq!(second.backend_calls(), 0);
    }

    #[tokio::test]
    async fn test_unpaired_login_skips_other_backend_types() {
        let registry = Multipass::new();
        let other = ScriptedIdentity::new(
            "other",
            "different-backend",
            Some(IdentityInfo::new("other", "alice", HashMap::new())),
        );
        registry
            .register_identity_provider(other.clone())
            .await
            .unwrap();
        registry
            .register_auth_provider(ScriptedAuth::success("corp", "scripted", "alice"))
            .await
            .unwrap();

        let outcome = registry.handle_login("corp", &form(&[])).await.unwrap();
        assert!(matches!(outcome, LoginOutcome::IdentityNotFound { .. }));
        assert_eq!(other.backend_calls(), 0);
    }

    #[tokio::test]
    async fn test_single_match_policy_rejects_multiple_claimants() {
        let registry = Multipass::requiring_single_match();
        for name in ["first", "second"] {
            registry
                .register_identity_provider(ScriptedIdentity::new(
                    name,
                    "scripted",
                    Some(IdentityInfo::new(name, "alice", HashMap::new())),
                ))
                .await
                .unwrap();
        }
        registry
            .register_auth_provider(ScriptedAuth::success("corp", "scripted", "alice"))
            .await
            .unwrap();

        let err = registry.handle_login("corp", &form(&[])).await.unwrap_err();
        match err {
            MultipassError::AmbiguousIdentity { providers } => {
                assert_eq!(providers, vec!["first", "second"]);
            }
            other => panic!("expected AmbiguousIdentity, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_single_match_policy_accepts_sole_claimant() {
        let registry = Multipass::requiring_single_match();
        registry
            .register_identity_provider(ScriptedIdentity::new("only", "scripted", None))
            .await
            .unwrap();
        registry
            .register_identity_provider(ScriptedIdentity::new(
                "match",
                "scripted",
                Some(IdentityInfo::new("match", "alice", HashMap::new())),
            ))
            .await
            .unwrap();
        registry
            .register_auth_provider(ScriptedAuth::success("corp", "scripted", "alice"))
            .await
            .unwrap();

        let outcome = registry.handle_login("corp", &form(&[])).await.unwrap();
        assert_eq!(outcome.identity().unwrap().provider(), "match");
    }

    #[tokio::test]
    async fn test_static_login_failure_kinds() {
        let registry = Multipass::new();
        registry
            .register_auth_provider(static_auth("corp", None))
            .await
            .unwrap();

        let outcome = registry
            .handle_login("corp", &form(&[("username", "alice"), ("password", "wrong")]))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            LoginOutcome::AuthFailed {
                kind: AuthFailureKind::Rejected,
                ..
            }
        ));
    }
}

// =============================================================================
// Search Tests
// =============================================================================

mod search_tests {
    use super::*;

    fn email_criteria(email: &str) -> SearchCriteria {
        HashMap::from([("email".to_string(), json!(email))])
    }

    async fn staff_and_guest_registry() -> Multipass {
        let registry = Multipass::new();
        registry
            .register_identity_provider(static_identity("staff_dir"))
            .await
            .unwrap();

        let mut guest = IdentityProviderConfig::new("guest_dir", "static");
        guest.options = options(json!({
            "identities": {
                "visitor-7": {"email": "a@x.org", "display_name": "Visiting Alice"},
            },
        }));
        registry
            .register_identity_provider(Arc::new(
                StaticIdentityProvider::from_config(&guest).unwrap(),
            ))
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_fanout_concatenates_in_registration_order() {
        let registry = staff_and_guest_registry().await;
        let results = registry
            .search_identities(None, &email_criteria("a@x.org"), true, Some(10))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].provider(), "staff_dir");
        assert_eq!(results[0].identifier(), "alice");
        assert_eq!(results[1].provider(), "guest_dir");
        assert_eq!(results[1].identifier(), "visitor-7");
    }

    #[tokio::test]
    async fn test_fanout_respects_limit() {
        let registry = staff_and_guest_registry().await;
        let results = registry
            .search_identities(None, &email_criteria("a@x.org"), true, Some(1))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].provider(), "staff_dir");
    }

    #[tokio::test]
    async fn test_named_search_only_queries_that_provider() {
        let registry = staff_and_guest_registry().await;
        let results = registry
            .search_identities(Some("guest_dir"), &email_criteria("a@x.org"), true, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].provider(), "guest_dir");
    }

    #[tokio::test]
    async fn test_named_search_unknown_provider() {
        let registry = staff_and_guest_registry().await;
        let err = registry
            .search_identities(Some("nope"), &email_criteria("a@x.org"), true, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MultipassError::UnknownProvider {
                kind: ProviderKind::Identity,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_named_search_unsupported_capability() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(ScriptedIdentity::new("no-search", "scripted", None))
            .await
            .unwrap();
        let err = registry
            .search_identities(Some("no-search"), &email_criteria("a@x.org"), true, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MultipassError::UnsupportedCapability {
                capability: Capability::Search,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fanout_skips_unreachable_backend() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(UnreachableSearch::new("broken_dir"))
            .await
            .unwrap();
        registry
            .register_identity_provider(static_identity("staff_dir"))
            .await
            .unwrap();

        let results = registry
            .search_identities(None, &email_criteria("a@x.org"), true, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].provider(), "staff_dir");
    }

    #[tokio::test]
    async fn test_named_search_propagates_unreachable_backend() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(UnreachableSearch::new("broken_dir"))
            .await
            .unwrap();
        let err = registry
            .search_identities(Some("broken_dir"), &email_criteria("a@x.org"), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MultipassError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_search_criteria_mapping() {
        let registry = Multipass::new();
        let mut config = IdentityProviderConfig::new("dir", "static");
        config.mapping = HashMap::from([("email".to_string(), "mail".to_string())]);
        config.options = options(json!({
            "identities": {
                "alice": {"mail": "a@x.org"},
            },
        }));
        registry
            .register_identity_provider(Arc::new(
                StaticIdentityProvider::from_config(&config).unwrap(),
            ))
            .await
            .unwrap();

        let results = registry
            .search_identities(Some("dir"), &email_criteria("a@x.org"), true, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].identifier(), "alice");
    }

    #[tokio::test]
    async fn test_substring_search() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(static_identity("dir"))
            .await
            .unwrap();
        let criteria = HashMap::from([("display_name".to_string(), json!("ali"))]);
        let results = registry
            .search_identities(Some("dir"), &criteria, false, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].identifier(), "alice");
    }
}

// =============================================================================
// Group Resolution Tests
// =============================================================================

mod group_tests {
    use super::*;

    #[tokio::test]
    async fn test_provider_query_groups() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(static_identity("dir"))
            .await
            .unwrap();

        let identity = registry
            .identity_provider("dir")
            .await
            .unwrap()
            .get_identity("alice")
            .await
            .unwrap()
            .unwrap();

        let groups = registry.get_identity_groups(&identity).await.unwrap();
        let names: Vec<&str> = groups.iter().map(|group| group.name()).collect();
        assert_eq!(names, vec!["admins", "staff"]);

        let admins = registry.get_group("dir", "admins").await.unwrap().unwrap();
        assert!(admins.has_member("alice").await.unwrap());
        assert!(!admins.has_member("bob").await.unwrap());
        assert!(admins.supports_member_list());
        assert_eq!(admins.get_members().await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_provider_query_membership() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(static_identity("dir"))
            .await
            .unwrap();

        assert!(registry
            .is_member(&IdentityRef::key("dir", "alice"), "admins")
            .await
            .unwrap());
        assert!(!registry
            .is_member(&IdentityRef::key("dir", "bob"), "admins")
            .await
            .unwrap());
        // membership in an unknown group is false, not an error
        assert!(!registry
            .is_member(&IdentityRef::key("dir", "alice"), "nonexistent")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_attribute_strategy_without_backend_call() {
        let registry = Multipass::new();
        let provider = ScriptedIdentity::with_attribute_groups("sso", "scripted", None);
        registry
            .register_identity_provider(provider.clone())
            .await
            .unwrap();

        let identity = IdentityInfo::new(
            "sso",
            "alice",
            HashMap::from([("groups".to_string(), json!(["admins", "staff"]))]),
        );
        assert!(registry
            .is_member(&IdentityRef::Info(identity.clone()), "admins")
            .await
            .unwrap());
        assert!(!registry
            .is_member(&IdentityRef::Info(identity), "finance")
            .await
            .unwrap());
        // the already-resolved identity answered both tests
        assert_eq!(provider.backend_calls(), 0);
    }

    #[tokio::test]
    async fn test_attribute_strategy_with_bare_identifier() {
        let registry = Multipass::new();
        let stored = IdentityInfo::new(
            "sso",
            "alice",
            HashMap::from([("groups".to_string(), json!(["admins"]))]),
        );
        let provider = ScriptedIdentity::with_attribute_groups("sso", "scripted", Some(stored));
        registry
            .register_identity_provider(provider.clone())
            .await
            .unwrap();

        assert!(registry
            .is_member(&IdentityRef::key("sso", "alice"), "admins")
            .await
            .unwrap());
        // a bare identifier costs exactly one identity lookup
        assert_eq!(provider.backend_calls(), 1);
    }

    #[tokio::test]
    async fn test_attribute_groups_cannot_enumerate_members() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(ScriptedIdentity::with_attribute_groups(
                "sso", "scripted", None,
            ))
            .await
            .unwrap();

        let identity = IdentityInfo::new(
            "sso",
            "alice",
            HashMap::from([("groups".to_string(), json!(["admins"]))]),
        );
        let groups = registry.get_identity_groups(&identity).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name(), "admins");
        assert!(!groups[0].supports_member_list());
        assert!(matches!(
            groups[0].get_members().await.unwrap_err(),
            MultipassError::UnsupportedCapability {
                capability: Capability::MemberList,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_provider_query_without_group_support() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(ScriptedIdentity::new("plain", "scripted", None))
            .await
            .unwrap();

        let identity = IdentityInfo::new("plain", "alice", HashMap::new());
        let err = registry.get_identity_groups(&identity).await.unwrap_err();
        assert!(matches!(
            err,
            MultipassError::UnsupportedCapability {
                capability: Capability::Groups,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_groups_of_unknown_provider() {
        let registry = Multipass::new();
        let identity = IdentityInfo::new("ghost", "alice", HashMap::new());
        assert!(matches!(
            registry.get_identity_groups(&identity).await.unwrap_err(),
            MultipassError::UnknownProvider {
                kind: ProviderKind::Identity,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_search_groups() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(static_identity("dir"))
            .await
            .unwrap();
        let groups = registry.search_groups("adm", None, false).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name(), "admins");
        assert_eq!(groups[0].group_ref().provider, "dir");
    }
}

// =============================================================================
// Refresh Tests
// =============================================================================

mod refresh_tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_returns_current_identity() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(static_identity("dir"))
            .await
            .unwrap();
        let refreshed = registry
            .refresh_identity("dir", "alice", &HashMap::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.identifier(), "alice");
    }

    #[tokio::test]
    async fn test_refresh_unsupported() {
        let registry = Multipass::new();
        registry
            .register_identity_provider(ScriptedIdentity::new("sso", "scripted", None))
            .await
            .unwrap();
        let err = registry
            .refresh_identity("sso", "alice", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MultipassError::UnsupportedCapability {
                capability: Capability::Refresh,
                ..
            }
        ));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config_tests {
    use super::*;

    struct SingletonIdentityFactory;

    #[async_trait]
    impl IdentityProviderFactory for SingletonIdentityFactory {
        fn backend(&self) -> &'static str {
            "singleton"
        }

        fn multi_instance(&self) -> bool {
            false
        }

        async fn create(
            &self,
            config: &IdentityProviderConfig,
        ) -> Result<Arc<dyn IdentityProvider>> {
            Ok(Arc::new(StaticIdentityProvider::from_config(config)?))
        }
    }

    #[tokio::test]
    async fn test_from_config_builds_working_registry() {
        let settings = MultipassSettings {
            auth_providers: vec![static_auth_config("corp", Some("corp_dir"))],
            identity_providers: vec![static_identity_config("corp_dir")],
            require_single_match: false,
        };
        let registry = Multipass::from_config(&settings, &default_backends())
            .await
            .unwrap();

        let outcome = registry
            .handle_login("corp", &form(&[("username", "alice"), ("password", "correcthorse")]))
            .await
            .unwrap();
        assert_eq!(outcome.identity().unwrap().identifier(), "alice");
    }

    #[tokio::test]
    async fn test_from_config_unknown_backend_type() {
        let settings = MultipassSettings {
            auth_providers: vec![AuthProviderConfig::new("corp", "no-such-backend")],
            ..MultipassSettings::default()
        };
        let err = Multipass::from_config(&settings, &default_backends())
            .await
            .unwrap_err();
        assert!(matches!(err, MultipassError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_from_config_broken_pairing_link() {
        let settings = MultipassSettings {
            auth_providers: vec![static_auth_config("corp", Some("missing_dir"))],
            identity_providers: vec![static_identity_config("corp_dir")],
            require_single_match: false,
        };
        let err = Multipass::from_config(&settings, &default_backends())
            .await
            .unwrap_err();
        assert!(matches!(err, MultipassError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_from_config_duplicate_name() {
        let settings = MultipassSettings {
            identity_providers: vec![
                static_identity_config("dir"),
                static_identity_config("dir"),
            ],
            ..MultipassSettings::default()
        };
        let err = Multipass::from_config(&settings, &default_backends())
            .await
            .unwrap_err();
        assert!(matches!(err, MultipassError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_from_config_enforces_single_instance_backends() {
        let mut backends = default_backends();
        backends.register_identity_backend(Arc::new(SingletonIdentityFactory));

        let settings = MultipassSettings {
            identity_providers: vec![
                IdentityProviderConfig::new("one", "singleton"),
                IdentityProviderConfig::new("two", "singleton"),
            ],
            ..MultipassSettings::default()
        };
        let err = Multipass::from_config(&settings, &backends)
            .await
            .unwrap_err();
        assert!(matches!(err, MultipassError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_settings_deserialization() {
        let settings: MultipassSettings = serde_json::from_value(json!({
            "auth_providers": [
                {"name": "corp", "backend": "static", "identity_provider": "corp_dir"},
            ],
            "identity_providers": [
                {
                    "name": "corp_dir",
                    "backend": "static",
                    "group_resolution": {"mode": "identity_attribute", "attribute": "groups"},
                    "mapping": {"email": "mail"},
                },
            ],
        }))
        .unwrap();
        assert_eq!(settings.auth_providers.len(), 1);
        assert_eq!(
            settings.identity_providers[0].group_resolution,
            GroupResolution::identity_attribute()
        );
        assert!(!settings.require_single_match);
    }
}

// =============================================================================
// Shibboleth Adapter Tests
// =============================================================================

mod shibboleth_tests {
    use super::*;
    use crate::providers::shibboleth::{ShibbolethAuthProvider, ShibbolethIdentityProvider};

    fn sso_registry() -> (AuthProviderConfig, IdentityProviderConfig) {
        let mut auth = AuthProviderConfig::new("sso", "shibboleth");
        auth.identity_provider = Some("sso".to_string());
        auth.options = options(json!({"callback_uri": "/login/sso/callback"}));

        let mut identity = IdentityProviderConfig::new("sso", "shibboleth");
        identity.group_resolution = GroupResolution::identity_attribute();
        identity.mapping = HashMap::from([
            ("email".to_string(), "ADFS_EMAIL".to_string()),
            ("display_name".to_string(), "ADFS_NAME".to_string()),
        ]);
        (auth, identity)
    }

    #[tokio::test]
    async fn test_callback_login_resolves_identity() {
        let registry = Multipass::new();
        let (auth, identity) = sso_registry();
        registry
            .register_identity_provider(Arc::new(
                ShibbolethIdentityProvider::from_config(&identity).unwrap(),
            ))
            .await
            .unwrap();
        registry
            .register_auth_provider(Arc::new(ShibbolethAuthProvider::from_config(&auth).unwrap()))
            .await
            .unwrap();

        let request = LoginRequest::callback(HashMap::from([
            ("ADFS_LOGIN".to_string(), "alice".to_string()),
            ("ADFS_EMAIL".to_string(), "a@x.org".to_string()),
            ("ADFS_NAME".to_string(), "Alice".to_string()),
            ("unrelated".to_string(), "dropped".to_string()),
        ]));
        let outcome = registry.handle_login("sso", &request).await.unwrap();
        let identity = outcome.identity().unwrap();
        assert_eq!(identity.identifier(), "alice");
        assert_eq!(identity.get_str("email"), Some("a@x.org"));
        assert_eq!(identity.get_str("display_name"), Some("Alice"));
        assert!(identity.get("unrelated").is_none());
    }

    #[tokio::test]
    async fn test_callback_without_assertion_attributes() {
        let registry = Multipass::new();
        let (auth, _) = sso_registry();
        registry
            .register_auth_provider(Arc::new(ShibbolethAuthProvider::from_config(&auth).unwrap()))
            .await
            .unwrap();

        let request =
            LoginRequest::callback(HashMap::from([("foo".to_string(), "bar".to_string())]));
        let outcome = registry.handle_login("sso", &request).await.unwrap();
        assert!(matches!(
            outcome,
            LoginOutcome::AuthFailed {
                kind: AuthFailureKind::Rejected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_callback_uri_fails_fast() {
        let config = AuthProviderConfig::new("sso", "shibboleth");
        let err = ShibbolethAuthProvider::from_config(&config).unwrap_err();
        assert!(matches!(err, MultipassError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_redirect_login_style() {
        let (auth, _) = sso_registry();
        let provider = ShibbolethAuthProvider::from_config(&auth).unwrap();
        assert_eq!(provider.login_style(), LoginStyle::Redirect);
        assert_eq!(
            provider.initiate_login("xyz").await.unwrap(),
            "/login/sso/callback"
        );
    }
}
