//! # Configuration Settings
//!
//! Configuration structures for the credential vault.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

use crate::domain::ProviderKey;
use crate::errors::{Result, VaultError};
use crate::services::encryption::EncryptionConfig;

/// Default cache TTL for decrypted credentials (5 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Run embedded migrations when the pool is created
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./credvault.db".to_string(),
            max_connections: 5,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Load from `CREDVAULT_DATABASE_*` variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("CREDVAULT_DATABASE_URL").unwrap_or(defaults.url),
            max_connections: env_parse("CREDVAULT_DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            min_connections: env_parse("CREDVAULT_DATABASE_MIN_CONNECTIONS")
                .unwrap_or(defaults.min_connections),
            connect_timeout_seconds: env_parse("CREDVAULT_DATABASE_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout_seconds),
            idle_timeout_seconds: env_parse("CREDVAULT_DATABASE_IDLE_TIMEOUT_SECS")
                .unwrap_or(defaults.idle_timeout_seconds),
            auto_migrate: env_parse("CREDVAULT_DATABASE_AUTO_MIGRATE")
                .unwrap_or(defaults.auto_migrate),
        }
    }

    /// In-memory SQLite, used by tests and throwaway runs
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            idle_timeout_seconds: 0,
            ..Self::default()
        }
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Default log filter when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Output format
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), log_format: LogFormat::Pretty }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        let log_level =
            std::env::var("CREDVAULT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = match std::env::var("CREDVAULT_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self { log_level, log_format }
    }
}

/// Key manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct KeyManagerConfig {
    /// Lifetime of decrypted cache entries in seconds
    #[validate(range(
        min = 1,
        max = 86400,
        message = "Cache TTL must be between 1 second and 24 hours"
    ))]
    pub cache_ttl_seconds: u64,

    /// Extra fallback variable mappings, `provider[:key_type]` -> env var
    pub fallback_vars: HashMap<String, String>,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self { cache_ttl_seconds: DEFAULT_CACHE_TTL_SECS, fallback_vars: HashMap::new() }
    }
}

impl KeyManagerConfig {
    /// Reads `CREDVAULT_CACHE_TTL_SECS` and `CREDVAULT_FALLBACK_VARS`
    /// (`hubspot=MY_VAR,openai:org_id=OTHER_VAR`)
    pub fn from_env() -> Result<Self> {
        let cache_ttl_seconds = match std::env::var("CREDVAULT_CACHE_TTL_SECS") {
            Ok(raw) => raw.parse().map_err(|e| {
                VaultError::config(format!("Invalid CREDVAULT_CACHE_TTL_SECS '{}': {}", raw, e))
            })?,
            Err(_) => DEFAULT_CACHE_TTL_SECS,
        };

        let fallback_vars = match std::env::var("CREDVAULT_FALLBACK_VARS") {
            Ok(raw) => parse_fallback_vars(&raw)?,
            Err(_) => HashMap::new(),
        };

        Ok(Self { cache_ttl_seconds, fallback_vars })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Parsed fallback mappings keyed by credential slot
    pub fn fallback_mappings(&self) -> Vec<(ProviderKey, String)> {
        self.fallback_vars.iter().map(|(slot, var)| (parse_slot(slot), var.clone())).collect()
    }
}

/// Top-level vault configuration
#[derive(Debug, Clone, Validate)]
pub struct VaultConfig {
    pub encryption: EncryptionConfig,

    #[validate(nested)]
    pub database: DatabaseConfig,

    #[validate(nested)]
    pub key_manager: KeyManagerConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl VaultConfig {
    /// Load the full configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            encryption: EncryptionConfig::from_env()?,
            database: DatabaseConfig::from_env(),
            key_manager: KeyManagerConfig::from_env()?,
            observability: ObservabilityConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(VaultError::from)?;

        if !self.database.url.starts_with("sqlite:") {
            return Err(VaultError::config("Database URL must start with 'sqlite:'"));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(VaultError::config(
                "min_connections cannot be greater than max_connections",
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn parse_slot(slot: &str) -> ProviderKey {
    match slot.split_once(':') {
        Some((provider, key_type)) => ProviderKey::new(provider.trim(), key_type.trim()),
        None => ProviderKey::api_key(slot.trim()),
    }
}

fn parse_fallback_vars(raw: &str) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (slot, var) = entry.split_once('=').ok_or_else(|| {
            VaultError::config(format!(
                "Invalid CREDVAULT_FALLBACK_VARS entry '{}': expected provider=VAR",
                entry
            ))
        })?;
        if slot.trim().is_empty() || var.trim().is_empty() {
            return Err(VaultError::config(format!(
                "Invalid CREDVAULT_FALLBACK_VARS entry '{}': empty provider or variable",
                entry
            )));
        }
        vars.insert(slot.trim().to_string(), var.trim().to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> VaultConfig {
        VaultConfig {
            encryption: EncryptionConfig::for_testing(),
            database: DatabaseConfig::in_memory(),
            key_manager: KeyManagerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_cache_ttl_bounds() {
        let mut config = valid_config();
        config.key_manager.cache_ttl_seconds = 0;
        assert!(matches!(config.validate(), Err(VaultError::Config { .. })));

        config.key_manager.cache_ttl_seconds = 86_401;
        assert!(config.validate().is_err());

        config.key_manager.cache_ttl_seconds = 60;
        assert!(config.validate().is_ok());
        assert_eq!(config.key_manager.cache_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_database_url_must_be_sqlite() {
        let mut config = valid_config();
        config.database.url = "postgresql://localhost/vault".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_connections_cannot_exceed_max() {
        let mut config = valid_config();
        config.database.min_connections = 5;
        config.database.max_connections = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_idle_timeout_zero_means_none() {
        let config = DatabaseConfig { idle_timeout_seconds: 0, ..Default::default() };
        assert!(config.idle_timeout().is_none());
    }

    #[test]
    fn test_parse_fallback_vars() {
        let vars = parse_fallback_vars("hubspot=HS_KEY, openai:org_id = OPENAI_ORG").unwrap();
        assert_eq!(vars.get("hubspot").unwrap(), "HS_KEY");
        assert_eq!(vars.get("openai:org_id").unwrap(), "OPENAI_ORG");

        assert!(parse_fallback_vars("hubspot").is_err());
        assert!(parse_fallback_vars("=VAR").is_err());
        assert!(parse_fallback_vars("").unwrap().is_empty());
    }

    #[test]
    fn test_fallback_mappings_resolve_slots() {
        let config = KeyManagerConfig {
            cache_ttl_seconds: 300,
            fallback_vars: HashMap::from([("openai:org_id".to_string(), "ORG".to_string())]),
        };
        let mappings = config.fallback_mappings();
        assert_eq!(mappings, vec![(ProviderKey::new("openai", "org_id"), "ORG".to_string())]);
    }
}
