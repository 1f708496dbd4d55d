//! Vault services
//!
//! - [`EnvelopeCodec`]: AES-256-GCM envelope encryption of credential plaintext
//! - [`KeyManager`]: cached, seeding, rotation-aware access to active credentials

pub mod encryption;
pub mod key_manager;

pub use encryption::{EncryptionConfig, EnvelopeCodec, MASTER_KEY_SIZE, MASTER_KEY_VAR};
pub use key_manager::{KeyManager, KeyManagerBuilder};
