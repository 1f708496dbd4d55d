//! Key Store abstraction over persisted credential versions.
//!
//! A Key Store is the durable source of truth for credential records. The
//! key manager only relies on the operations below; backends decide how to
//! persist them.
//!
//! # Rotation
//!
//! [`KeyStore::rotate`] retires the newest record for a slot and inserts the
//! next version. The provided implementation runs the three steps as
//! separate calls, so a failure between retire and insert leaves the slot
//! without an active key. Backends with transactions override it to run the
//! steps atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{CredentialMetadata, CredentialRecord, NewCredential, ProviderKey};
use crate::errors::{Result, StoreOperation, VaultError};

/// Persistent table of versioned, provider-scoped encrypted credentials
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Highest-version record with `status = active` for the slot
    async fn find_active(&self, key: &ProviderKey) -> Result<Option<CredentialRecord>>;

    /// Highest-version record for the slot regardless of status
    async fn find_latest(&self, key: &ProviderKey) -> Result<Option<CredentialRecord>>;

    /// Mark a record `rotated` and stamp `rotated_at`
    async fn retire(&self, id: i64, rotated_at: DateTime<Utc>) -> Result<()>;

    /// Insert a new active record.
    ///
    /// Re-inserting an identical `(provider, key_type, version)` returns the
    /// existing row; a different payload for an existing version is a
    /// conflict.
    async fn insert(&self, credential: NewCredential) -> Result<CredentialRecord>;

    /// Every version of the slot, newest first
    async fn list(&self, key: &ProviderKey) -> Result<Vec<CredentialRecord>>;

    /// Retire every active record of the slot with a version below `keep_version`.
    ///
    /// Returns the number of records retired.
    async fn retire_stale_active(
        &self,
        key: &ProviderKey,
        keep_version: i64,
        rotated_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Retire the newest record and insert the next version as active.
    ///
    /// Failures are tagged with the step that failed.
    async fn rotate(
        &self,
        key: &ProviderKey,
        encrypted_secret: String,
        metadata: CredentialMetadata,
    ) -> Result<CredentialRecord> {
        let current = self
            .find_latest(key)
            .await
            .map_err(|e| VaultError::store(StoreOperation::LookupExistingKey, e))?;

        if let Some(current) = &current {
            if current.is_active() {
                self.retire(current.id, Utc::now())
                    .await
                    .map_err(|e| VaultError::store(StoreOperation::RetirePreviousKey, e))?;
            }
        }

        let credential = NewCredential {
            provider_key: key.clone(),
            version: next_version(current.as_ref()),
            encrypted_secret,
            metadata,
        };

        self.insert(credential).await.map_err(|e| VaultError::store(StoreOperation::StoreNewKey, e))
    }
}

/// Version that follows `current`, starting at 1
pub fn next_version(current: Option<&CredentialRecord>) -> i64 {
    current.map_or(0, |record| record.version) + 1
}
