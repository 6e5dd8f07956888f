//! Backend adapter implementations

pub mod memory;
pub mod shibboleth;

#[cfg(feature = "oidc")]
mod common;
#[cfg(feature = "oidc")]
pub mod oidc;

#[cfg(feature = "ldap")]
pub mod ldap;

#[cfg(feature = "oidc")]
pub use common::*;

use serde::de::DeserializeOwned;
use std::sync::Arc;

use multipass_core::{BackendRegistry, MultipassError, ProviderOptions, Result};

/// A backend registry pre-populated with every compiled-in backend type.
pub fn default_backends() -> BackendRegistry {
    let mut registry = BackendRegistry::new();

    registry.register_auth_backend(Arc::new(memory::StaticAuthFactory));
    registry.register_identity_backend(Arc::new(memory::StaticIdentityFactory));

    registry.register_auth_backend(Arc::new(shibboleth::ShibbolethAuthFactory));
    registry.register_identity_backend(Arc::new(shibboleth::ShibbolethIdentityFactory));

    #[cfg(feature = "oidc")]
    {
        registry.register_auth_backend(Arc::new(oidc::OidcAuthFactory));
        registry.register_identity_backend(Arc::new(oidc::OidcIdentityFactory));
    }

    #[cfg(feature = "ldap")]
    {
        registry.register_auth_backend(Arc::new(ldap::LdapAuthFactory));
        registry.register_identity_backend(Arc::new(ldap::LdapIdentityFactory));
    }

    registry
}

/// Deserializes a provider's raw options mapping into its typed options.
pub(crate) fn parse_options<T: DeserializeOwned>(
    provider: &str,
    options: &ProviderOptions,
) -> Result<T> {
    let value = serde_json::Value::Object(options.clone().into_iter().collect());
    serde_json::from_value(value).map_err(|err| {
        MultipassError::configuration(format!("Invalid options for provider {provider}: {err}"))
    })
}
