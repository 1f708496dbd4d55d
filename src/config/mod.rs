//! # Configuration Management
//!
//! Environment-driven configuration for the credential vault. The binary
//! loads `.env` via `dotenvy` before calling [`VaultConfig::from_env`].
//!
//! | Variable | Meaning |
//! |---|---|
//! | `KEY_ENCRYPTION_SECRET` | base64 32-byte master key (required) |
//! | `CREDVAULT_DATABASE_URL` | SQLite URL |
//! | `CREDVAULT_CACHE_TTL_SECS` | decrypted-key cache TTL |
//! | `CREDVAULT_FALLBACK_VARS` | extra `provider[:key_type]=VAR` fallback mappings |
//! | `CREDVAULT_LOG_LEVEL`, `CREDVAULT_LOG_FORMAT` | logging |

pub mod settings;

pub use settings::{
    DatabaseConfig, KeyManagerConfig, LogFormat, ObservabilityConfig, VaultConfig,
    DEFAULT_CACHE_TTL_SECS,
};
