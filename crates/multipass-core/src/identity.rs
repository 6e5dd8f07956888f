//! Normalized identity model shared by all backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::error::{Capability, MultipassError, Result};

/// Canonical attribute keys. Every backend maps its native attribute names
/// onto these, so the same logical attribute is reachable under one key
/// regardless of which backend produced it.
pub mod attrs {
    pub const EMAIL: &str = "email";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const FIRST_NAME: &str = "first_name";
    pub const LAST_NAME: &str = "last_name";
    pub const AFFILIATION: &str = "affiliation";
    pub const PHONE: &str = "phone";
    /// Multi-valued group membership carried inline with the identity.
    pub const GROUPS: &str = "groups";
}

/// Search criteria: attribute key → expected value.
pub type SearchCriteria = HashMap<String, Value>;

/// A resolved identity, scoped to the provider that produced it.
///
/// `(provider, identifier)` is globally unique and stable across resolutions
/// of the same underlying principal. Equality and hashing consider only this
/// pair; attribute contents may legitimately differ between two resolutions
/// of the same identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityInfo {
    provider: String,
    identifier: String,
    #[serde(default)]
    data: HashMap<String, Value>,
}

impl IdentityInfo {
    pub fn new(
        provider: impl Into<String>,
        identifier: impl Into<String>,
        data: HashMap<String, Value>,
    ) -> Self {
        Self {
            provider: provider.into(),
            identifier: identifier.into(),
            data,
        }
    }

    /// Name of the identity provider that produced this record.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Provider-scoped unique identifier of the principal.
    pub fn identifier(&self) -> &str {
        &self.identifier
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

    /// Values of a multi-valued attribute, as strings. A scalar string is
    /// treated as a single-element list; anything else yields nothing.
    pub fn get_multi(&self, key: &str) -> Vec<String> {
        match self.data.get(key) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            Some(Value::String(value)) => vec![value.clone()],
            _ => Vec::new(),
        }
    }
}

impl PartialEq for IdentityInfo {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider && self.identifier == other.identifier
    }
}

impl Eq for IdentityInfo {}

impl Hash for IdentityInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.provider.hash(state);
        self.identifier.hash(state);
    }
}

/// Renames the keys of `data` according to `mapping` (target key → source
/// key). Keys used as a mapping source disappear; unmapped keys pass
/// through. If `keys` is given, the result contains exactly those keys,
/// with `Null` for anything missing.
pub fn convert_attributes(
    data: &HashMap<String, Value>,
    mapping: &HashMap<String, String>,
    keys: Option<&[&str]>,
) -> HashMap<String, Value> {
    let sources: HashSet<&String> = mapping.values().collect();
    let mut result: HashMap<String, Value> = data
        .iter()
        .filter(|(key, _)| !sources.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for (target, source) in mapping {
        result.insert(
            target.clone(),
            data.get(source).cloned().unwrap_or(Value::Null),
        );
    }
    if let Some(keys) = keys {
        let keep: HashSet<&str> = keys.iter().copied().collect();
        result.retain(|key, _| keep.contains(key.as_str()));
        for key in keys {
            result.entry((*key).to_string()).or_insert(Value::Null);
        }
    }
    result
}

/// Renames criteria keys according to `mapping` (application key → backend
/// key). Unmapped keys pass through unchanged.
pub fn remap_keys(criteria: &SearchCriteria, mapping: &HashMap<String, String>) -> SearchCriteria {
    criteria
        .iter()
        .map(|(key, value)| {
            (
                mapping.get(key).cloned().unwrap_or_else(|| key.clone()),
                value.clone(),
            )
        })
        .collect()
}

/// Equality key of a group: two groups are the same group iff their refs
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupRef {
    pub provider: String,
    pub name: String,
}

/// A provider-scoped group. Concrete types are backend-specific and
/// ephemeral; nothing is persisted by the core.
#[async_trait]
pub trait Group: Send + Sync + std::fmt::Debug {
    /// Name of the identity provider owning this group.
    fn provider_name(&self) -> &str;

    /// Provider-scoped name of the group.
    fn name(&self) -> &str;

    /// If the member list can be enumerated. Check before `get_members`.
    fn supports_member_list(&self) -> bool {
        false
    }

    /// Identifiers of all members. Fails with `UnsupportedCapability`
    /// unless `supports_member_list` is true.
    async fn get_members(&self) -> Result<Vec<String>> {
        Err(MultipassError::unsupported(
            self.provider_name(),
            Capability::MemberList,
        ))
    }

    /// Tests whether the given identifier is a member of this group.
    async fn has_member(&self, identifier: &str) -> Result<bool>;

    fn group_ref(&self) -> GroupRef {
        GroupRef {
            provider: self.provider_name().to_string(),
            name: self.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs_map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_identity_equality_ignores_attributes() {
        let a = IdentityInfo::new(
            "dir",
            "alice",
            attrs_map(&[("email", json!("alice@example.com"))]),
        );
        let b = IdentityInfo::new("dir", "alice", attrs_map(&[("email", json!("old@example.com"))]));
        let c = IdentityInfo::new("other", "alice", HashMap::new());
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_get_multi() {
        let identity = IdentityInfo::new(
            "dir",
            "alice",
            attrs_map(&[
                ("groups", json!(["admins", "staff"])),
                ("email", json!("alice@example.com")),
                ("age", json!(42)),
            ]),
        );
        assert_eq!(identity.get_multi("groups"), vec!["admins", "staff"]);
        assert_eq!(identity.get_multi("email"), vec!["alice@example.com"]);
        assert!(identity.get_multi("age").is_empty());
        assert!(identity.get_multi("missing").is_empty());
    }

    #[test]
    fn test_convert_attributes_mapping() {
        let data = attrs_map(&[("mail", json!("a@x.org")), ("cn", json!("Alice"))]);
        let mapping = HashMap::from([("email".to_string(), "mail".to_string())]);
        let result = convert_attributes(&data, &mapping, None);
        assert_eq!(result.get("email"), Some(&json!("a@x.org")));
        // the mapping source key is consumed, unmapped keys pass through
        assert!(!result.contains_key("mail"));
        assert_eq!(result.get("cn"), Some(&json!("Alice")));
    }

    #[test]
    fn test_convert_attributes_key_list() {
        let data = attrs_map(&[("mail", json!("a@x.org")), ("cn", json!("Alice"))]);
        let mapping = HashMap::from([("email".to_string(), "mail".to_string())]);
        let result = convert_attributes(&data, &mapping, Some(&["email", "phone"]));
        assert_eq!(result.len(), 2);
        assert_eq!(result.get("email"), Some(&json!("a@x.org")));
        assert_eq!(result.get("phone"), Some(&Value::Null));
        assert!(!result.contains_key("cn"));
    }

    #[test]
    fn test_remap_keys() {
        let criteria = HashMap::from([
            ("email".to_string(), json!("a@x.org")),
            ("phone".to_string(), json!("123")),
        ]);
        let mapping = HashMap::from([("email".to_string(), "mail".to_string())]);
        let mapped = remap_keys(&criteria, &mapping);
        assert_eq!(mapped.get("mail"), Some(&json!("a@x.org")));
        assert_eq!(mapped.get("phone"), Some(&json!("123")));
        assert!(!mapped.contains_key("email"));
    }
}
