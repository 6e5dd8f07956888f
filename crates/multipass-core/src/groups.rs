//! Group resolution strategies
//!
//! Two interchangeable policies determine how group membership is resolved
//! for a provider's identities: the backend can answer membership queries
//! itself, or membership can be read off a multi-valued attribute already
//! present on the resolved identity. Both expose the same membership-test
//! contract, so the choice is transparent to callers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Capability, MultipassError, Result};
use crate::identity::{attrs, Group, IdentityInfo};
use crate::provider::IdentityProvider;

fn default_groups_attribute() -> String {
    attrs::GROUPS.to_string()
}

/// How group membership is determined for identities of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GroupResolution {
    /// The backend answers membership queries itself (e.g. a directory
    /// membership query).
    ProviderQuery,
    /// Membership is read off a multi-valued attribute on the resolved
    /// identity, avoiding a second backend round-trip.
    IdentityAttribute {
        #[serde(default = "default_groups_attribute")]
        attribute: String,
    },
}

impl Default for GroupResolution {
    fn default() -> Self {
        Self::ProviderQuery
    }
}

impl GroupResolution {
    /// The attribute strategy reading the canonical `groups` attribute.
    pub fn identity_attribute() -> Self {
        Self::IdentityAttribute {
            attribute: default_groups_attribute(),
        }
    }
}

/// Reference to an identity: either the full resolved record or just its
/// `(provider, identifier)` key.
#[derive(Debug, Clone)]
pub enum IdentityRef {
    Info(IdentityInfo),
    Key {
        provider: String,
        identifier: String,
    },
}

impl IdentityRef {
    pub fn key(provider: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::Key {
            provider: provider.into(),
            identifier: identifier.into(),
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Info(info) => info.provider(),
            Self::Key { provider, .. } => provider,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Info(info) => info.identifier(),
            Self::Key { identifier, .. } => identifier,
        }
    }
}

impl From<IdentityInfo> for IdentityRef {
    fn from(info: IdentityInfo) -> Self {
        Self::Info(info)
    }
}

/// A group synthesized from a multi-valued identity attribute.
///
/// Membership tests resolve the identity and inspect the attribute; the
/// member list cannot be enumerated.
pub struct AttributeGroup {
    provider: Arc<dyn IdentityProvider>,
    name: String,
    attribute: String,
}

impl AttributeGroup {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        name: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            name: name.into(),
            attribute: attribute.into(),
        }
    }
}

impl std::fmt::Debug for AttributeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeGroup")
            .field("provider", &self.provider.name())
            .field("name", &self.name)
            .field("attribute", &self.attribute)
            .finish()
    }
}

#[async_trait]
impl Group for AttributeGroup {
    fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn has_member(&self, identifier: &str) -> Result<bool> {
        let Some(identity) = self.provider.get_identity(identifier).await? else {
            return Ok(false);
        };
        Ok(identity
            .get_multi(&self.attribute)
            .iter()
            .any(|name| name == &self.name))
    }
}

/// Groups of a resolved identity, via the provider's configured strategy.
pub async fn groups_of(
    provider: &Arc<dyn IdentityProvider>,
    identity: &IdentityInfo,
) -> Result<Vec<Arc<dyn Group>>> {
    match provider.group_resolution() {
        GroupResolution::ProviderQuery => {
            if !provider.supports_groups() {
                return Err(MultipassError::unsupported(
                    provider.name(),
                    Capability::Groups,
                ));
            }
            provider.get_identity_groups(identity.identifier()).await
        }
        GroupResolution::IdentityAttribute { attribute } => Ok(identity
            .get_multi(attribute)
            .into_iter()
            .map(|name| {
                Arc::new(AttributeGroup::new(
                    provider.clone(),
                    name,
                    attribute.clone(),
                )) as Arc<dyn Group>
            })
            .collect()),
    }
}

/// Membership test under the provider's configured strategy.
///
/// With the attribute strategy and a full `IdentityInfo`, this makes no
/// backend call at all; a bare identifier requires one identity lookup.
pub async fn is_member(
    provider: &Arc<dyn IdentityProvider>,
    identity: &IdentityRef,
    group_name: &str,
) -> Result<bool> {
    match provider.group_resolution() {
        GroupResolution::ProviderQuery => {
            if !provider.supports_groups() {
                return Err(MultipassError::unsupported(
                    provider.name(),
                    Capability::Groups,
                ));
            }
            match provider.get_group(group_name).await? {
                Some(group) => group.has_member(identity.identifier()).await,
                None => Ok(false),
            }
        }
        GroupResolution::IdentityAttribute { attribute } => {
            let names = match identity {
                IdentityRef::Info(info) => info.get_multi(attribute),
                IdentityRef::Key { identifier, .. } => {
                    match provider.get_identity(identifier).await? {
                        Some(info) => info.get_multi(attribute),
                        None => return Ok(false),
                    }
                }
            };
            Ok(names.iter().any(|name| name == group_name))
        }
    }
}
