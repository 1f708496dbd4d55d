//! # Error Handling
//!
//! Error types for the credential vault, defined with `thiserror`.

pub mod types;

pub use types::{Result, StoreOperation, VaultError};
