//! Integration tests for the key manager over the SQLite key store
//!
//! These tests exercise rotation, history, seeding and error context against
//! a real database created through the embedded migrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use credvault::config::DatabaseConfig;
use credvault::domain::{CredentialMetadata, NewCredential};
use credvault::errors::StoreOperation;
use credvault::secrets::{NoFallback, StaticFallbackResolver};
use credvault::services::EncryptionConfig;
use credvault::storage::{create_pool, IntegrationKeyRepository};
use credvault::{
    CredentialRecord, EnvelopeCodec, KeyManager, KeyStatus, KeyStore, ProviderKey, Result,
    VaultError,
};

fn codec_for(master_key: &str) -> EnvelopeCodec {
    EnvelopeCodec::new(&EncryptionConfig::new(master_key)).unwrap()
}

async fn sqlite_store(config: &DatabaseConfig) -> Arc<IntegrationKeyRepository> {
    Arc::new(IntegrationKeyRepository::new(create_pool(config).await.unwrap()))
}

fn manager(store: Arc<dyn KeyStore>, codec: EnvelopeCodec) -> KeyManager {
    KeyManager::builder().store(store).codec(codec).fallback(Arc::new(NoFallback)).build().unwrap()
}

#[tokio::test]
async fn test_rotation_history_in_sqlite() {
    let master_key = EnvelopeCodec::generate_master_key().unwrap();
    let store = sqlite_store(&DatabaseConfig::in_memory()).await;
    let manager = manager(store.clone(), codec_for(&master_key));

    manager.rotate_key("hubspot", "secretA", CredentialMetadata::new()).await.unwrap();
    manager.rotate_key("hubspot", "secretB", CredentialMetadata::new()).await.unwrap();

    assert_eq!(manager.get_active_key("hubspot").await.unwrap(), "secretB");

    let history = manager.history(&ProviderKey::api_key("hubspot")).await.unwrap();
    let summary: Vec<_> = history.iter().map(|r| (r.version, r.status)).collect();
    assert_eq!(summary, vec![(2, KeyStatus::Active), (1, KeyStatus::Rotated)]);
    assert!(history[1].rotated_at.is_some());

    // Plaintext never reaches the table.
    for record in &history {
        assert!(!record.encrypted_secret.contains("secret"));
        assert_eq!(record.encrypted_secret.split('.').count(), 3);
    }
}

#[tokio::test]
async fn test_store_is_source_of_truth_across_managers() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("vault.db").display()),
        ..DatabaseConfig::default()
    };
    let master_key = EnvelopeCodec::generate_master_key().unwrap();

    let writer = manager(sqlite_store(&config).await, codec_for(&master_key));
    writer.rotate_key("openai", "sk-first", CredentialMetadata::new()).await.unwrap();

    let reader = manager(sqlite_store(&config).await, codec_for(&master_key));
    assert_eq!(reader.get_active_key("openai").await.unwrap(), "sk-first");

    // A different master key cannot open the stored envelope.
    let other_key = EnvelopeCodec::generate_master_key().unwrap();
    let stranger = manager(sqlite_store(&config).await, codec_for(&other_key));
    let err = stranger.get_active_key("openai").await.unwrap_err();
    assert!(matches!(err, VaultError::Authentication { .. }));
}

#[tokio::test]
async fn test_seeding_from_fallback_persists_one_version() {
    let master_key = EnvelopeCodec::generate_master_key().unwrap();
    let store = sqlite_store(&DatabaseConfig::in_memory()).await;
    let fallback = StaticFallbackResolver::new().with(ProviderKey::api_key("hubspot"), "pat-env");
    let manager = KeyManager::builder()
        .store(store.clone())
        .codec(codec_for(&master_key))
        .fallback(Arc::new(fallback))
        .build()
        .unwrap();

    assert_eq!(manager.get_active_key("hubspot").await.unwrap(), "pat-env");
    manager.clear_cache().await;
    assert_eq!(manager.get_active_key("hubspot").await.unwrap(), "pat-env");

    let history = store.list(&ProviderKey::api_key("hubspot")).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].metadata["source"], "env");
}

/// SQLite store whose reads or inserts can be made to fail on demand
struct FlakyStore {
    inner: Arc<IntegrationKeyRepository>,
    fail_reads: AtomicBool,
    fail_inserts: AtomicBool,
}

impl FlakyStore {
    fn unavailable() -> VaultError {
        VaultError::database(sqlx::Error::PoolTimedOut, "store unavailable")
    }
}

#[async_trait]
impl KeyStore for FlakyStore {
    async fn find_active(&self, key: &ProviderKey) -> Result<Option<CredentialRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.find_active(key).await
    }

    async fn find_latest(&self, key: &ProviderKey) -> Result<Option<CredentialRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.find_latest(key).await
    }

    async fn retire(&self, id: i64, rotated_at: DateTime<Utc>) -> Result<()> {
        self.inner.retire(id, rotated_at).await
    }

    async fn insert(&self, credential: NewCredential) -> Result<CredentialRecord> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.insert(credential).await
    }

    async fn list(&self, key: &ProviderKey) -> Result<Vec<CredentialRecord>> {
        self.inner.list(key).await
    }

    async fn retire_stale_active(
        &self,
        key: &ProviderKey,
        keep_version: i64,
        rotated_at: DateTime<Utc>,
    ) -> Result<u64> {
        self.inner.retire_stale_active(key, keep_version, rotated_at).await
    }

    // `rotate` is left to the non-transactional default.
}

async fn flaky_manager() -> (Arc<FlakyStore>, KeyManager) {
    let store = Arc::new(FlakyStore {
        inner: sqlite_store(&DatabaseConfig::in_memory()).await,
        fail_reads: AtomicBool::new(false),
        fail_inserts: AtomicBool::new(false),
    });
    let master_key = EnvelopeCodec::generate_master_key().unwrap();
    (store.clone(), manager(store, codec_for(&master_key)))
}

#[tokio::test]
async fn test_read_failure_names_the_operation() {
    let (store, manager) = flaky_manager().await;
    store.fail_reads.store(true, Ordering::SeqCst);

    let err = manager.get_active_key("hubspot").await.unwrap_err();
    assert_eq!(err.store_operation(), Some(StoreOperation::FetchActiveKey));
    assert!(err.is_retryable());
    assert!(err.to_string().starts_with("Unable to fetch active key"));

    let err = manager.rotate_key("hubspot", "pat", CredentialMetadata::new()).await.unwrap_err();
    assert_eq!(err.store_operation(), Some(StoreOperation::LookupExistingKey));
}

#[tokio::test]
async fn test_interrupted_rotation_surfaces_and_recovers() {
    let (store, manager) = flaky_manager().await;
    let key = ProviderKey::api_key("hubspot");
    manager.rotate_key("hubspot", "pat-1", CredentialMetadata::new()).await.unwrap();

    store.fail_inserts.store(true, Ordering::SeqCst);
    let err = manager.rotate_key("hubspot", "pat-2", CredentialMetadata::new()).await.unwrap_err();
    assert_eq!(err.store_operation(), Some(StoreOperation::StoreNewKey));

    // The default rotation is not transactional: the old version is retired.
    manager.clear_cache().await;
    let err = manager.get_active_key("hubspot").await.unwrap_err();
    assert!(err.is_integration_not_configured());

    store.fail_inserts.store(false, Ordering::SeqCst);
    let record = manager.rotate_key("hubspot", "pat-2", CredentialMetadata::new()).await.unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(manager.get_active_key("hubspot").await.unwrap(), "pat-2");
    assert_eq!(manager.repair(&key).await.unwrap(), 0);
}

#[tokio::test]
async fn test_repair_cleans_duplicate_actives_in_sqlite() {
    let master_key = EnvelopeCodec::generate_master_key().unwrap();
    let codec = codec_for(&master_key);
    let store = sqlite_store(&DatabaseConfig::in_memory()).await;
    let key = ProviderKey::api_key("hubspot");

    for (version, secret) in [(1, "old"), (2, "new")] {
        store
            .insert(NewCredential {
                provider_key: key.clone(),
                version,
                encrypted_secret: codec.encrypt(secret).unwrap(),
                metadata: CredentialMetadata::new(),
            })
            .await
            .unwrap();
    }

    let manager = manager(store.clone(), codec);
    // Newest active version wins even before the sweep.
    assert_eq!(manager.get_active_key("hubspot").await.unwrap(), "new");
    assert_eq!(manager.repair(&key).await.unwrap(), 1);

    let active: Vec<_> = store.list(&key).await.unwrap().into_iter().filter(|r| r.is_active()).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].version, 2);
}
