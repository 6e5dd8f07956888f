//! Multipass - pluggable multi-backend authentication and identity resolution
//!
//! This facade re-exports the full public API: the domain types and provider
//! contracts from `multipass-core`, and the [`Multipass`] registry plus the
//! built-in backend adapters from `multipass-identity`.
//!
//! A minimal setup registers the compiled-in backends and builds the registry
//! from configuration:
//!
//! ```ignore
//! let backends = multipass::default_backends();
//! let multipass = multipass::Multipass::from_config(&settings, &backends).await?;
//! let outcome = multipass.handle_login("corp_ldap", &request).await?;
//! ```

pub use multipass_identity::*;
