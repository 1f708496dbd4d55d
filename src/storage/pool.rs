//! # Database Connection Pool Management
//!
//! Provides SQLite connection pool creation for the SQL key store.

use crate::config::DatabaseConfig;
use crate::errors::{Result, VaultError};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{str::FromStr, time::Duration};

/// Type alias for the database connection pool
pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a database connection pool with the specified configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    validate_config(config)?;

    let pool_options = SqlitePoolOptions::new()
        .acquire_timeout(config.connect_timeout())
        .test_before_acquire(true);

    // Every in-memory connection is its own database, so pin exactly one.
    let pool_options = if is_in_memory(&config.url) {
        pool_options.max_connections(1).min_connections(1).idle_timeout(None).max_lifetime(None)
    } else {
        let pool_options = pool_options
            .max_connections(config.max_connections)
            .min_connections(config.min_connections);
        match config.idle_timeout() {
            Some(idle_timeout) => pool_options.idle_timeout(idle_timeout),
            None => pool_options,
        }
    };

    let connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| VaultError::database(e, format!("Invalid SQLite connection string: {}", config.url)))?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = pool_options.connect_with(connect_options).await.map_err(|e| {
        tracing::error!(
            error = %e,
            url = %config.url,
            busy_timeout_ms = SQLITE_BUSY_TIMEOUT.as_millis(),
            "Failed to create SQLite database pool"
        );
        VaultError::database(e, format!("Failed to connect to database: {}", config.url))
    })?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_ms = config.connect_timeout().as_millis(),
        idle_timeout_ms = config.idle_timeout().map(|d| d.as_millis()),
        "Database connection pool created"
    );

    if config.auto_migrate {
        tracing::info!("Auto-migration enabled, running database migrations");
        run_migrations(&pool).await?;
    }

    Ok(pool)
}

/// Apply the embedded migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        tracing::error!(error = %e, "Database migration failed");
        VaultError::from(e)
    })?;
    tracing::info!("Database migrations applied");
    Ok(())
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Validate database configuration
fn validate_config(config: &DatabaseConfig) -> Result<()> {
    if config.max_connections == 0 {
        return Err(VaultError::validation("max_connections must be greater than 0"));
    }

    if config.min_connections > config.max_connections {
        return Err(VaultError::validation(
            "min_connections cannot be greater than max_connections",
        ));
    }

    if config.url.is_empty() {
        return Err(VaultError::validation("database URL cannot be empty"));
    }

    if !config.url.starts_with("sqlite:") {
        return Err(VaultError::validation("database URL must start with 'sqlite:'"));
    }

    Ok(())
}
