//! # Observability Infrastructure
//!
//! Structured logging for the credential vault via `tracing`.

pub mod logging;

pub use logging::{init_logging, log_config_info};
