//! # Repositories
//!
//! SQL-backed persistence for credential vault data.

pub mod integration_key;

pub use integration_key::IntegrationKeyRepository;
