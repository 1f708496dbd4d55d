//! Integration key repository
//!
//! SQLite-backed [`KeyStore`] over the `integration_keys` table. Secrets are
//! stored as codec envelopes; this layer never sees plaintext.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use tracing::instrument;

use crate::domain::{CredentialMetadata, CredentialRecord, NewCredential, ProviderKey};
use crate::errors::{Result, StoreOperation, VaultError};
use crate::storage::key_store::{next_version, KeyStore};
use crate::storage::DbPool;

const SELECT_COLUMNS: &str = "SELECT id, provider, key_type, version, status, encrypted_secret, \
     metadata, created_at, rotated_at FROM integration_keys";

/// Database row structure for integration keys
#[derive(Debug, Clone, FromRow)]
struct IntegrationKeyRow {
    pub id: i64,
    pub provider: String,
    pub key_type: String,
    pub version: i64,
    pub status: String,
    pub encrypted_secret: String,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl TryFrom<IntegrationKeyRow> for CredentialRecord {
    type Error = VaultError;

    fn try_from(row: IntegrationKeyRow) -> Result<Self> {
        let metadata: CredentialMetadata = serde_json::from_str(&row.metadata).map_err(|e| {
            VaultError::Serialization {
                source: e,
                context: format!("Invalid metadata on integration key {}", row.id),
            }
        })?;

        Ok(CredentialRecord {
            id: row.id,
            provider: row.provider,
            key_type: row.key_type,
            version: row.version,
            status: row.status.parse()?,
            encrypted_secret: row.encrypted_secret,
            metadata,
            created_at: row.created_at,
            rotated_at: row.rotated_at,
        })
    }
}

async fn fetch_newest(
    conn: &mut SqliteConnection,
    key: &ProviderKey,
    active_only: bool,
) -> Result<Option<CredentialRecord>> {
    let sql = if active_only {
        format!(
            "{} WHERE provider = ? AND key_type = ? AND status = 'active' \
             ORDER BY version DESC LIMIT 1",
            SELECT_COLUMNS
        )
    } else {
        format!(
            "{} WHERE provider = ? AND key_type = ? ORDER BY version DESC LIMIT 1",
            SELECT_COLUMNS
        )
    };

    let row = sqlx::query_as::<_, IntegrationKeyRow>(&sql)
        .bind(&key.provider)
        .bind(&key.key_type)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, provider = %key.provider, key_type = %key.key_type, "Failed to query integration key");
            VaultError::database(e, format!("Failed to query integration key for {}", key))
        })?;

    row.map(CredentialRecord::try_from).transpose()
}

async fn retire_by_id(
    conn: &mut SqliteConnection,
    id: i64,
    rotated_at: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE integration_keys SET status = 'rotated', rotated_at = ? WHERE id = ?",
    )
    .bind(rotated_at)
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, id = id, "Failed to retire integration key");
        VaultError::database(e, format!("Failed to retire integration key {}", id))
    })?;

    if result.rows_affected() == 0 {
        return Err(VaultError::validation(format!("No integration key with id {}", id)));
    }
    Ok(())
}

async fn insert_credential(
    conn: &mut SqliteConnection,
    credential: NewCredential,
) -> Result<CredentialRecord> {
    let NewCredential { provider_key, version, encrypted_secret, metadata } = credential;

    if version < 1 {
        return Err(VaultError::validation("credential version must be positive"));
    }

    let metadata_json = serde_json::to_string(&metadata)?;

    sqlx::query(
        "INSERT INTO integration_keys (provider, key_type, version, status, encrypted_secret, metadata, created_at) \
         VALUES (?, ?, ?, 'active', ?, ?, ?) \
         ON CONFLICT (provider, key_type, version) DO NOTHING",
    )
    .bind(&provider_key.provider)
    .bind(&provider_key.key_type)
    .bind(version)
    .bind(&encrypted_secret)
    .bind(&metadata_json)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, slot = %provider_key, version = version, "Failed to insert integration key");
        VaultError::database(e, format!("Failed to insert version {} of {}", version, provider_key))
    })?;

    let row = sqlx::query_as::<_, IntegrationKeyRow>(&format!(
        "{} WHERE provider = ? AND key_type = ? AND version = ?",
        SELECT_COLUMNS
    ))
    .bind(&provider_key.provider)
    .bind(&provider_key.key_type)
    .bind(version)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        VaultError::database(e, format!("Failed to read back version {} of {}", version, provider_key))
    })?;

    if row.encrypted_secret != encrypted_secret {
        return Err(VaultError::conflict(format!(
            "version {} of {} already exists",
            version, provider_key
        )));
    }

    CredentialRecord::try_from(row)
}

/// Repository for integration key data access
#[derive(Debug, Clone)]
pub struct IntegrationKeyRepository {
    pool: DbPool,
}

impl IntegrationKeyRepository {
    /// Create a new integration key repository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| VaultError::database(e, "Failed to acquire database connection"))
    }
}

#[async_trait]
impl KeyStore for IntegrationKeyRepository {
    #[instrument(skip(self), fields(slot = %key), name = "db_find_active_key")]
    async fn find_active(&self, key: &ProviderKey) -> Result<Option<CredentialRecord>> {
        let mut conn = self.acquire().await?;
        fetch_newest(&mut conn, key, true).await
    }

    #[instrument(skip(self), fields(slot = %key), name = "db_find_latest_key")]
    async fn find_latest(&self, key: &ProviderKey) -> Result<Option<CredentialRecord>> {
        let mut conn = self.acquire().await?;
        fetch_newest(&mut conn, key, false).await
    }

    #[instrument(skip(self), name = "db_retire_key")]
    async fn retire(&self, id: i64, rotated_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.acquire().await?;
        retire_by_id(&mut conn, id, rotated_at).await
    }

    #[instrument(skip(self, credential), fields(slot = %credential.provider_key, version = credential.version), name = "db_insert_key")]
    async fn insert(&self, credential: NewCredential) -> Result<CredentialRecord> {
        let mut conn = self.acquire().await?;
        insert_credential(&mut conn, credential).await
    }

    #[instrument(skip(self), fields(slot = %key), name = "db_list_keys")]
    async fn list(&self, key: &ProviderKey) -> Result<Vec<CredentialRecord>> {
        let rows = sqlx::query_as::<_, IntegrationKeyRow>(&format!(
            "{} WHERE provider = ? AND key_type = ? ORDER BY version DESC",
            SELECT_COLUMNS
        ))
        .bind(&key.provider)
        .bind(&key.key_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, slot = %key, "Failed to list integration keys");
            VaultError::database(e, format!("Failed to list integration keys for {}", key))
        })?;

        rows.into_iter().map(CredentialRecord::try_from).collect()
    }

    #[instrument(skip(self), fields(slot = %key), name = "db_retire_stale_keys")]
    async fn retire_stale_active(
        &self,
        key: &ProviderKey,
        keep_version: i64,
        rotated_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE integration_keys SET status = 'rotated', rotated_at = ? \
             WHERE provider = ? AND key_type = ? AND status = 'active' AND version < ?",
        )
        .bind(rotated_at)
        .bind(&key.provider)
        .bind(&key.key_type)
        .bind(keep_version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            VaultError::database(e, format!("Failed to retire stale active keys for {}", key))
        })?;

        Ok(result.rows_affected())
    }

    /// Retire and insert inside one transaction
    #[instrument(skip(self, encrypted_secret, metadata), fields(slot = %key), name = "db_rotate_key")]
    async fn rotate(
        &self,
        key: &ProviderKey,
        encrypted_secret: String,
        metadata: CredentialMetadata,
    ) -> Result<CredentialRecord> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            VaultError::store(
                StoreOperation::LookupExistingKey,
                VaultError::database(e, "Failed to begin rotation transaction"),
            )
        })?;

        let current = fetch_newest(&mut tx, key, false)
            .await
            .map_err(|e| VaultError::store(StoreOperation::LookupExistingKey, e))?;

        if let Some(current) = current.as_ref().filter(|c| c.is_active()) {
            retire_by_id(&mut tx, current.id, Utc::now())
                .await
                .map_err(|e| VaultError::store(StoreOperation::RetirePreviousKey, e))?;
        }

        let record = insert_credential(
            &mut tx,
            NewCredential {
                provider_key: key.clone(),
                version: next_version(current.as_ref()),
                encrypted_secret,
                metadata,
            },
        )
        .await
        .map_err(|e| VaultError::store(StoreOperation::StoreNewKey, e))?;

        tx.commit().await.map_err(|e| {
            VaultError::store(
                StoreOperation::StoreNewKey,
                VaultError::database(e, "Failed to commit rotation transaction"),
            )
        })?;

        tracing::info!(slot = %key, version = record.version, "Rotated integration key");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::domain::KeyStatus;
    use crate::storage::create_pool;

    async fn repository() -> IntegrationKeyRepository {
        let pool = create_pool(&DatabaseConfig::in_memory()).await.unwrap();
        IntegrationKeyRepository::new(pool)
    }

    fn metadata(source: &str) -> CredentialMetadata {
        let mut metadata = CredentialMetadata::new();
        metadata.insert("source".to_string(), serde_json::Value::String(source.to_string()));
        metadata
    }

    #[tokio::test]
    async fn test_rotate_creates_sequential_versions() {
        let repo = repository().await;
        let key = ProviderKey::api_key("hubspot");

        let first = repo.rotate(&key, "env-1".into(), metadata("env")).await.unwrap();
        let second = repo.rotate(&key, "env-2".into(), metadata("admin")).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.metadata["source"], "admin");

        let history = repo.list(&key).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, KeyStatus::Active);
        assert_eq!(history[1].status, KeyStatus::Rotated);
        assert!(history[1].rotated_at.is_some());
    }

    #[tokio::test]
    async fn test_find_active_returns_highest_active_version() {
        let repo = repository().await;
        let key = ProviderKey::api_key("hubspot");
        repo.rotate(&key, "env-1".into(), CredentialMetadata::new()).await.unwrap();
        repo.rotate(&key, "env-2".into(), CredentialMetadata::new()).await.unwrap();

        let active = repo.find_active(&key).await.unwrap().unwrap();
        assert_eq!(active.version, 2);
        assert_eq!(active.encrypted_secret, "env-2");

        assert!(repo.find_active(&ProviderKey::api_key("openai")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_idempotent_and_conflicting() {
        let repo = repository().await;
        let credential = NewCredential {
            provider_key: ProviderKey::api_key("hubspot"),
            version: 1,
            encrypted_secret: "env-1".to_string(),
            metadata: CredentialMetadata::new(),
        };

        let first = repo.insert(credential.clone()).await.unwrap();
        let again = repo.insert(credential.clone()).await.unwrap();
        assert_eq!(first.id, again.id);

        let conflicting = NewCredential { encrypted_secret: "env-other".to_string(), ..credential };
        assert!(matches!(repo.insert(conflicting).await, Err(VaultError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_retire_unknown_id_fails() {
        let repo = repository().await;
        assert!(repo.retire(999, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_retire_stale_active_keeps_newest() {
        let repo = repository().await;
        let key = ProviderKey::api_key("hubspot");
        for version in 1..=3 {
            repo.insert(NewCredential {
                provider_key: key.clone(),
                version,
                encrypted_secret: format!("env-{}", version),
                metadata: CredentialMetadata::new(),
            })
            .await
            .unwrap();
        }

        assert_eq!(repo.retire_stale_active(&key, 3, Utc::now()).await.unwrap(), 2);

        let active: Vec<_> =
            repo.list(&key).await.unwrap().into_iter().filter(|r| r.is_active()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, 3);
    }
}
