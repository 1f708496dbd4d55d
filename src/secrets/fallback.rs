//! Fallback secret resolution used for one-time seeding.
//!
//! When the key manager sees a `(provider, key type)` slot for the first time
//! in a process, it asks a [`FallbackResolver`] for a bootstrap secret. If one
//! is returned it is rotated into the store as the newest active version.
//!
//! Resolution happens at the collaborator boundary: the key manager never
//! knows which providers have fallbacks or where they come from.
//!
//! # Example
//!
//! ```rust,ignore
//! use credvault::secrets::EnvFallbackResolver;
//!
//! // hubspot -> HUBSPOT_PRIVATE_APP_KEY, anything else -> CREDVAULT_FALLBACK_<PROVIDER>
//! let resolver = EnvFallbackResolver::with_defaults();
//! ```

use std::collections::HashMap;
use std::env;

use crate::domain::{ProviderKey, DEFAULT_KEY_TYPE};

use super::types::SecretString;

/// Environment variable prefix for generic provider fallbacks.
pub const FALLBACK_PREFIX: &str = "CREDVAULT_FALLBACK_";

/// Legacy variable holding the HubSpot private app key.
pub const HUBSPOT_FALLBACK_VAR: &str = "HUBSPOT_PRIVATE_APP_KEY";

/// Source of bootstrap secrets for never-seeded credential slots.
pub trait FallbackResolver: Send + Sync {
    /// Returns the fallback plaintext for `key`, or `None` when there is none.
    ///
    /// Implementations must treat empty values as absent.
    fn resolve(&self, key: &ProviderKey) -> Option<SecretString>;
}

/// Resolver that never provides a fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFallback;

impl FallbackResolver for NoFallback {
    fn resolve(&self, _key: &ProviderKey) -> Option<SecretString> {
        None
    }
}

/// Resolver backed by a fixed in-memory map, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticFallbackResolver {
    secrets: HashMap<ProviderKey, SecretString>,
}

impl StaticFallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fallback for `key` (builder style)
    pub fn with(mut self, key: ProviderKey, secret: impl Into<SecretString>) -> Self {
        self.secrets.insert(key, secret.into());
        self
    }
}

impl FallbackResolver for StaticFallbackResolver {
    fn resolve(&self, key: &ProviderKey) -> Option<SecretString> {
        self.secrets.get(key).filter(|s| !s.is_blank()).cloned()
    }
}

/// Resolver reading fallbacks from environment variables.
///
/// Explicit mappings take precedence. Otherwise the variable name is derived
/// from the slot: `CREDVAULT_FALLBACK_<PROVIDER>` for the default key type and
/// `CREDVAULT_FALLBACK_<PROVIDER>_<KEY_TYPE>` for any other key type.
#[derive(Debug, Clone, Default)]
pub struct EnvFallbackResolver {
    mappings: HashMap<ProviderKey, String>,
    derive_names: bool,
}

impl EnvFallbackResolver {
    /// Resolver with no mappings and no derived names
    pub fn new() -> Self {
        Self::default()
    }

    /// HubSpot legacy mapping plus derived `CREDVAULT_FALLBACK_*` names
    pub fn with_defaults() -> Self {
        Self::new()
            .map(ProviderKey::api_key("hubspot"), HUBSPOT_FALLBACK_VAR)
            .derive_names(true)
    }

    /// Maps a slot to an explicit environment variable
    pub fn map(mut self, key: ProviderKey, var: impl Into<String>) -> Self {
        self.mappings.insert(key, var.into());
        self
    }

    /// Enables or disables `CREDVAULT_FALLBACK_*` name derivation
    pub fn derive_names(mut self, enabled: bool) -> Self {
        self.derive_names = enabled;
        self
    }

    /// Derived variable name for a slot
    pub fn derived_var_name(key: &ProviderKey) -> String {
        let provider = sanitize(&key.provider);
        if key.key_type == DEFAULT_KEY_TYPE {
            format!("{}{}", FALLBACK_PREFIX, provider)
        } else {
            format!("{}{}_{}", FALLBACK_PREFIX, provider, sanitize(&key.key_type))
        }
    }

    fn read(var: &str) -> Option<SecretString> {
        env::var(var).ok().filter(|v| !v.trim().is_empty()).map(SecretString::from)
    }
}

impl FallbackResolver for EnvFallbackResolver {
    fn resolve(&self, key: &ProviderKey) -> Option<SecretString> {
        if let Some(secret) = self.mappings.get(key).and_then(|var| Self::read(var)) {
            return Some(secret);
        }
        if self.derive_names {
            return Self::read(&Self::derived_var_name(key));
        }
        None
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
