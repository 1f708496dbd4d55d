//! In-memory Key Store.
//!
//! Keeps credential records in a process-local vector. Useful for tests and
//! for embedding the vault where persistence is handled elsewhere. Rotation
//! holds the write lock across retire and insert, so it is atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::key_store::{next_version, KeyStore};
use crate::domain::{
    CredentialMetadata, CredentialRecord, KeyStatus, NewCredential, ProviderKey,
};
use crate::errors::{Result, StoreOperation, VaultError};

#[derive(Debug, Default)]
struct State {
    records: Vec<CredentialRecord>,
    next_id: i64,
}

impl State {
    fn newest<'a>(
        &'a self,
        key: &'a ProviderKey,
        active_only: bool,
    ) -> Option<&'a CredentialRecord> {
        self.records
            .iter()
            .filter(|r| r.provider == key.provider && r.key_type == key.key_type)
            .filter(|r| !active_only || r.is_active())
            .max_by_key(|r| r.version)
    }

    fn retire(&mut self, id: i64, rotated_at: DateTime<Utc>) -> Result<()> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| VaultError::validation(format!("No credential with id {}", id)))?;
        record.status = KeyStatus::Rotated;
        record.rotated_at = Some(rotated_at);
        Ok(())
    }

    fn insert(&mut self, credential: NewCredential) -> Result<CredentialRecord> {
        let NewCredential { provider_key, version, encrypted_secret, metadata } = credential;

        if version < 1 {
            return Err(VaultError::validation("credential version must be positive"));
        }

        if let Some(existing) = self.records.iter().find(|r| {
            r.provider == provider_key.provider
                && r.key_type == provider_key.key_type
                && r.version == version
        }) {
            if existing.encrypted_secret == encrypted_secret {
                return Ok(existing.clone());
            }
            return Err(VaultError::conflict(format!(
                "version {} of {} already exists",
                version, provider_key
            )));
        }

        self.next_id += 1;
        let record = CredentialRecord {
            id: self.next_id,
            provider: provider_key.provider,
            key_type: provider_key.key_type,
            version,
            status: KeyStatus::Active,
            encrypted_secret,
            metadata,
            created_at: Utc::now(),
            rotated_at: None,
        };
        self.records.push(record.clone());
        Ok(record)
    }
}

/// Process-local [`KeyStore`]
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    state: RwLock<State>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, in insertion order
    pub async fn records(&self) -> Vec<CredentialRecord> {
        self.state.read().await.records.clone()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn find_active(&self, key: &ProviderKey) -> Result<Option<CredentialRecord>> {
        Ok(self.state.read().await.newest(key, true).cloned())
    }

    async fn find_latest(&self, key: &ProviderKey) -> Result<Option<CredentialRecord>> {
        Ok(self.state.read().await.newest(key, false).cloned())
    }

    async fn retire(&self, id: i64, rotated_at: DateTime<Utc>) -> Result<()> {
        self.state.write().await.retire(id, rotated_at)
    }

    async fn insert(&self, credential: NewCredential) -> Result<CredentialRecord> {
        self.state.write().await.insert(credential)
    }

    async fn list(&self, key: &ProviderKey) -> Result<Vec<CredentialRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<CredentialRecord> = state
            .records
            .iter()
            .filter(|r| r.provider == key.provider && r.key_type == key.key_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(records)
    }

    async fn retire_stale_active(
        &self,
        key: &ProviderKey,
        keep_version: i64,
        rotated_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut retired = 0;
        for record in state.records.iter_mut().filter(|r| {
            r.provider == key.provider
                && r.key_type == key.key_type
                && r.is_active()
                && r.version < keep_version
        }) {
            record.status = KeyStatus::Rotated;
            record.rotated_at = Some(rotated_at);
            retired += 1;
        }
        Ok(retired)
    }

    async fn rotate(
        &self,
        key: &ProviderKey,
        encrypted_secret: String,
        metadata: CredentialMetadata,
    ) -> Result<CredentialRecord> {
        let mut state = self.state.write().await;

        let current = state.newest(key, false).cloned();
        if let Some(current) = current.as_ref().filter(|c| c.is_active()) {
            state
                .retire(current.id, Utc::now())
                .map_err(|e| VaultError::store(StoreOperation::RetirePreviousKey, e))?;
        }

        state
            .insert(NewCredential {
                provider_key: key.clone(),
                version: next_version(current.as_ref()),
                encrypted_secret,
                metadata,
            })
            .map_err(|e| VaultError::store(StoreOperation::StoreNewKey, e))
    }
}
