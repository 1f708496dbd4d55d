//! Credential records persisted by a Key Store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::VaultError;

/// Default key type when a provider has a single credential
pub const DEFAULT_KEY_TYPE: &str = "api_key";

/// Free-form metadata attached to a credential version (e.g. `{"source": "env"}`)
pub type CredentialMetadata = serde_json::Map<String, serde_json::Value>;

/// Composite identity of a credential slot: provider plus key type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderKey {
    pub provider: String,
    pub key_type: String,
}

impl ProviderKey {
    /// Slot for `provider` with an explicit key type
    pub fn new(provider: impl Into<String>, key_type: impl Into<String>) -> Self {
        Self { provider: provider.into(), key_type: key_type.into() }
    }

    /// Slot for `provider` with the default `api_key` key type
    pub fn api_key(provider: impl Into<String>) -> Self {
        Self::new(provider, DEFAULT_KEY_TYPE)
    }

    /// Rejects empty provider or key type identifiers
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.provider.trim().is_empty() {
            return Err(VaultError::validation("provider must not be empty"));
        }
        if self.key_type.trim().is_empty() {
            return Err(VaultError::validation("key type must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.key_type)
    }
}

/// Lifecycle status of a credential version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Rotated,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Rotated => "rotated",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(KeyStatus::Active),
            "rotated" => Ok(KeyStatus::Rotated),
            other => Err(VaultError::validation(format!("Unknown key status '{}'", other))),
        }
    }
}

/// A persisted, versioned, encrypted credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: i64,
    pub provider: String,
    pub key_type: String,
    pub version: i64,
    pub status: KeyStatus,
    /// `nonce.ciphertext.tag` envelope produced by the encryption codec
    pub encrypted_secret: String,
    pub metadata: CredentialMetadata,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn provider_key(&self) -> ProviderKey {
        ProviderKey::new(&self.provider, &self.key_type)
    }

    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}

/// Insert request for a new credential version
#[derive(Debug, Clone, PartialEq)]
pub struct NewCredential {
    pub provider_key: ProviderKey,
    pub version: i64,
    pub encrypted_secret: String,
    pub metadata: CredentialMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_key_display_and_default_type() {
        let key = ProviderKey::api_key("hubspot");
        assert_eq!(key.key_type, "api_key");
        assert_eq!(key.to_string(), "hubspot:api_key");
    }

    #[test]
    fn test_provider_key_validation() {
        assert!(ProviderKey::api_key("hubspot").validate().is_ok());
        assert!(ProviderKey::api_key("  ").validate().is_err());
        assert!(ProviderKey::new("hubspot", "").validate().is_err());
    }

    #[test]
    fn test_key_status_round_trips_through_str() {
        assert_eq!("active".parse::<KeyStatus>().unwrap(), KeyStatus::Active);
        assert_eq!("rotated".parse::<KeyStatus>().unwrap(), KeyStatus::Rotated);
        assert!("revoked".parse::<KeyStatus>().is_err());
        assert_eq!(serde_json::to_string(&KeyStatus::Rotated).unwrap(), "\"rotated\"");
    }
}
