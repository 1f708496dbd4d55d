//! # Key Manager
//!
//! Hands out the currently-active plaintext credential for a provider slot.
//!
//! Reads go through an in-memory cache with a fixed TTL. On a miss the
//! manager seeds the slot from its [`FallbackResolver`] (at most once per
//! process), loads the highest active version from the [`KeyStore`],
//! decrypts it and caches the result.
//!
//! Misses for the same slot are single-flight: callers serialize on a
//! per-slot lock and re-check the cache once they hold it, so concurrent
//! first access seeds and loads exactly once. Rotation takes the same lock,
//! so a load can never overwrite a freshly rotated secret with the old one.
//!
//! Expired entries are only replaced on the next access for that slot;
//! nothing sweeps the cache in the background.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = KeyManager::builder()
//!     .store(Arc::new(InMemoryKeyStore::new()))
//!     .codec(EnvelopeCodec::from_env()?)
//!     .fallback(Arc::new(EnvFallbackResolver::with_defaults()))
//!     .build()?;
//!
//! manager.rotate_key("hubspot", "pat-na1-...", CredentialMetadata::new()).await?;
//! let secret = manager.get_active_key("hubspot").await?;
//! ```

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::DEFAULT_CACHE_TTL_SECS;
use crate::domain::{CredentialMetadata, CredentialRecord, ProviderKey};
use crate::errors::{Result, StoreOperation, VaultError};
use crate::secrets::{FallbackResolver, NoFallback, SecretString};
use crate::services::encryption::EnvelopeCodec;
use crate::storage::KeyStore;

#[derive(Clone)]
struct CacheEntry {
    secret: SecretString,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Cached, seeding, rotation-aware access to provider credentials.
///
/// Construct one per process and share it behind an `Arc`.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    codec: EnvelopeCodec,
    fallback: Arc<dyn FallbackResolver>,
    ttl: Duration,
    cache: RwLock<HashMap<ProviderKey, CacheEntry>>,
    seeded: RwLock<HashSet<ProviderKey>>,
    in_flight: DashMap<ProviderKey, Arc<Mutex<()>>>,
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("codec", &self.codec)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Builder for [`KeyManager`]
#[derive(Default)]
pub struct KeyManagerBuilder {
    store: Option<Arc<dyn KeyStore>>,
    codec: Option<EnvelopeCodec>,
    fallback: Option<Arc<dyn FallbackResolver>>,
    ttl: Option<Duration>,
}

impl KeyManagerBuilder {
    pub fn store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Bootstrap secrets, rotated in the first time a slot is read in this
    /// process, whether or not the store already holds versions for it.
    /// Defaults to none.
    pub fn fallback(mut self, fallback: Arc<dyn FallbackResolver>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Cache entry lifetime. Defaults to five minutes.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn build(self) -> Result<KeyManager> {
        let store = self.store.ok_or_else(|| VaultError::config("KeyManager requires a key store"))?;
        let codec = self.codec.ok_or_else(|| VaultError::config("KeyManager requires a codec"))?;
        let ttl = self.ttl.unwrap_or(Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
        if ttl.is_zero() {
            return Err(VaultError::config("Cache TTL must be greater than zero"));
        }

        Ok(KeyManager {
            store,
            codec,
            fallback: self.fallback.unwrap_or_else(|| Arc::new(NoFallback)),
            ttl,
            cache: RwLock::new(HashMap::new()),
            seeded: RwLock::new(HashSet::new()),
            in_flight: DashMap::new(),
        })
    }
}

impl KeyManager {
    pub fn builder() -> KeyManagerBuilder {
        KeyManagerBuilder::default()
    }

    pub fn cache_ttl(&self) -> Duration {
        self.ttl
    }

    /// Active secret for `provider` with the default `api_key` key type
    pub async fn get_active_key(&self, provider: &str) -> Result<SecretString> {
        self.get_active_key_for(&ProviderKey::api_key(provider)).await
    }

    /// Active secret for an explicit credential slot.
    ///
    /// Fails with [`VaultError::NoActiveKey`] when the slot has no active
    /// version after the one-time fallback seeding attempt.
    #[instrument(skip(self), fields(provider = %key.provider, key_type = %key.key_type))]
    pub async fn get_active_key_for(&self, key: &ProviderKey) -> Result<SecretString> {
        key.validate()?;

        if let Some(secret) = self.cached(key).await {
            debug!("Credential cache hit");
            return Ok(secret);
        }

        let lock = self.slot_lock(key);
        let _guard = lock.lock().await;

        // Another caller may have loaded the slot while we waited.
        if let Some(secret) = self.cached(key).await {
            debug!("Credential loaded by concurrent caller");
            return Ok(secret);
        }

        self.seed_from_fallback(key).await?;
        self.load_active(key).await
    }

    /// Store `secret` as the next active version for `provider` (`api_key` slot)
    pub async fn rotate_key(
        &self,
        provider: &str,
        secret: &str,
        metadata: CredentialMetadata,
    ) -> Result<CredentialRecord> {
        self.rotate_key_for(&ProviderKey::api_key(provider), secret, metadata).await
    }

    /// Encrypt `secret`, retire the current version and store the next one.
    ///
    /// The cache is updated immediately, so the next read in this process
    /// does not touch the store.
    #[instrument(skip(self, secret, metadata), fields(provider = %key.provider, key_type = %key.key_type))]
    pub async fn rotate_key_for(
        &self,
        key: &ProviderKey,
        secret: &str,
        metadata: CredentialMetadata,
    ) -> Result<CredentialRecord> {
        key.validate()?;
        if secret.trim().is_empty() {
            return Err(VaultError::validation("secret must not be empty"));
        }

        let lock = self.slot_lock(key);
        let _guard = lock.lock().await;
        self.rotate_locked(key, SecretString::new(secret), metadata).await
    }

    /// Drop the cached secret for a slot; the next read goes to the store
    pub async fn invalidate(&self, key: &ProviderKey) -> bool {
        let removed = self.cache.write().await.remove(key).is_some();
        debug!(provider = %key.provider, key_type = %key.key_type, removed, "Invalidated cached credential");
        removed
    }

    /// Drop every cached secret
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        let count = cache.len();
        cache.clear();
        info!(count, "Cleared credential cache");
    }

    /// Number of cached entries, fresh or expired
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Every stored version of the slot, newest first
    #[instrument(skip(self), fields(provider = %key.provider, key_type = %key.key_type))]
    pub async fn history(&self, key: &ProviderKey) -> Result<Vec<CredentialRecord>> {
        key.validate()?;
        self.store.list(key).await.map_err(|e| VaultError::store(StoreOperation::ListHistory, e))
    }

    /// Retire every active version below the newest active one.
    ///
    /// Cleans up slots left with several active versions by an interrupted
    /// non-transactional rotation. Returns the number of versions retired.
    #[instrument(skip(self), fields(provider = %key.provider, key_type = %key.key_type))]
    pub async fn repair(&self, key: &ProviderKey) -> Result<u64> {
        key.validate()?;

        let lock = self.slot_lock(key);
        let _guard = lock.lock().await;

        let active = self
            .store
            .find_active(key)
            .await
            .map_err(|e| VaultError::store(StoreOperation::FetchActiveKey, e))?;

        let Some(active) = active else {
            return Ok(0);
        };

        let retired = self
            .store
            .retire_stale_active(key, active.version, Utc::now())
            .await
            .map_err(|e| VaultError::store(StoreOperation::SweepStaleActive, e))?;

        if retired > 0 {
            warn!(retired, kept_version = active.version, "Retired stale active credential versions");
        }
        Ok(retired)
    }

    fn slot_lock(&self, key: &ProviderKey) -> Arc<Mutex<()>> {
        self.in_flight.entry(key.clone()).or_default().value().clone()
    }

    async fn cached(&self, key: &ProviderKey) -> Option<SecretString> {
        let cache = self.cache.read().await;
        cache.get(key).filter(|entry| entry.is_fresh(Instant::now())).map(|entry| entry.secret.clone())
    }

    async fn store_in_cache(&self, key: &ProviderKey, secret: SecretString) {
        let entry = CacheEntry { secret, expires_at: Instant::now() + self.ttl };
        self.cache.write().await.insert(key.clone(), entry);
    }

    /// Caller must hold the slot lock.
    async fn seed_from_fallback(&self, key: &ProviderKey) -> Result<()> {
        if self.seeded.read().await.contains(key) {
            return Ok(());
        }

        if let Some(secret) = self.fallback.resolve(key) {
            info!("Seeding credential from fallback");
            let mut metadata = CredentialMetadata::new();
            metadata.insert("source".to_string(), Value::String("env".to_string()));
            self.rotate_locked(key, secret, metadata).await?;
        }

        self.seeded.write().await.insert(key.clone());
        Ok(())
    }

    /// Caller must hold the slot lock.
    async fn load_active(&self, key: &ProviderKey) -> Result<SecretString> {
        let record = self
            .store
            .find_active(key)
            .await
            .map_err(|e| VaultError::store(StoreOperation::FetchActiveKey, e))?
            .ok_or_else(|| VaultError::no_active_key(&key.provider, &key.key_type))?;

        let secret = SecretString::new(self.codec.decrypt(&record.encrypted_secret)?);
        self.store_in_cache(key, secret.clone()).await;

        debug!(version = record.version, "Loaded active credential from store");
        Ok(secret)
    }

    /// Caller must hold the slot lock.
    async fn rotate_locked(
        &self,
        key: &ProviderKey,
        secret: SecretString,
        metadata: CredentialMetadata,
    ) -> Result<CredentialRecord> {
        let envelope = self.codec.encrypt(secret.expose_secret())?;
        let record = self.store.rotate(key, envelope, metadata).await?;
        self.store_in_cache(key, secret).await;

        info!(version = record.version, "Rotated credential");
        Ok(record)
    }
}
