//! # Storage and Persistence
//!
//! The Key Store seam and its implementations:
//!
//! - [`KeyStore`]: the operations the key manager needs from persistence
//! - [`InMemoryKeyStore`]: process-local store for tests and embedding
//! - [`IntegrationKeyRepository`]: SQLite store over `integration_keys`

pub mod key_store;
pub mod memory;
pub mod pool;
pub mod repositories;

pub use crate::config::DatabaseConfig;

pub use key_store::{next_version, KeyStore};
pub use memory::InMemoryKeyStore;
pub use pool::{create_pool, run_migrations, DbPool};
pub use repositories::IntegrationKeyRepository;

use crate::errors::{Result, VaultError};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| VaultError::database(e, "Database connectivity check failed"))?;

    Ok(())
}
