//! # Credvault
//!
//! Encrypted, versioned storage for third-party API credentials.
//!
//! ## Architecture
//!
//! ```text
//! caller → KeyManager → cache (TTL) ─miss→ KeyStore (SQLite / memory)
//!                 ↓                               ↓
//!          FallbackResolver                EnvelopeCodec (AES-256-GCM)
//! ```
//!
//! ## Core Components
//!
//! - **Envelope codec**: AES-256-GCM with a random nonce per call, stored as
//!   `base64(nonce).base64(ciphertext).base64(tag)`
//! - **Key manager**: cached lookup of the active credential per
//!   `(provider, key_type)`, one-time seeding from the environment, rotation
//! - **Key stores**: SQLx/SQLite repository and an in-memory store
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use credvault::{
//!     domain::CredentialMetadata, storage::InMemoryKeyStore, EnvelopeCodec, KeyManager, Result,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = KeyManager::builder()
//!         .store(Arc::new(InMemoryKeyStore::new()))
//!         .codec(EnvelopeCodec::from_env()?)
//!         .build()?;
//!
//!     manager.rotate_key("hubspot", "pat-na1-example", CredentialMetadata::new()).await?;
//!     let secret = manager.get_active_key("hubspot").await?;
//!     assert_eq!(secret.expose_secret(), "pat-na1-example");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod secrets;
pub mod services;
pub mod storage;

// Re-export commonly used types and traits
pub use config::VaultConfig;
pub use domain::{CredentialRecord, KeyStatus, ProviderKey};
pub use errors::{Result, VaultError};
pub use secrets::{FallbackResolver, SecretString};
pub use services::{EnvelopeCodec, KeyManager};
pub use storage::KeyStore;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
