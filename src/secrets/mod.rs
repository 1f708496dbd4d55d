//! Secret-handling primitives shared across the vault.
//!
//! - [`SecretString`]: redacting, zeroizing wrapper for decrypted credentials
//! - [`FallbackResolver`]: source of bootstrap secrets for first-time seeding
//!
//! # Security Considerations
//!
//! - Secrets are never logged or exposed in error messages
//! - Fallback values come from the process environment and are only used
//!   once per process to seed the encrypted store

pub mod fallback;
pub mod types;

pub use fallback::{
    EnvFallbackResolver, FallbackResolver, NoFallback, StaticFallbackResolver, FALLBACK_PREFIX,
    HUBSPOT_FALLBACK_VAR,
};
pub use types::SecretString;
