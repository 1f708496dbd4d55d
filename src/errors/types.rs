//! # Error Types
//!
//! Error taxonomy for the credential vault using `thiserror`.

use std::fmt;

/// Custom result type for credential vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// The Key Store operation that was in flight when a storage failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    FetchActiveKey,
    LookupExistingKey,
    RetirePreviousKey,
    StoreNewKey,
    ListHistory,
    SweepStaleActive,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOperation::FetchActiveKey => write!(f, "fetch active key"),
            StoreOperation::LookupExistingKey => write!(f, "lookup existing key"),
            StoreOperation::RetirePreviousKey => write!(f, "retire previous key"),
            StoreOperation::StoreNewKey => write!(f, "store new key"),
            StoreOperation::ListHistory => write!(f, "list key history"),
            StoreOperation::SweepStaleActive => write!(f, "sweep stale active keys"),
        }
    }
}

/// Main error type for the credential vault
#[derive(thiserror::Error, Debug)]
pub enum VaultError {
    /// Master key or other configuration is missing or malformed
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Ciphertext envelope is not `nonce.ciphertext.tag`
    #[error("Malformed ciphertext envelope: {message}")]
    Format { message: String },

    /// Authentication tag did not verify (tampering, corruption or wrong master key)
    #[error("Ciphertext authentication failed: {message}")]
    Authentication { message: String },

    /// No active credential exists for the provider and key type
    #[error("No active key found for provider {provider} (key type '{key_type}')")]
    NoActiveKey { provider: String, key_type: String },

    /// Key Store failure, tagged with the operation that failed
    #[error("Unable to {operation}: {source}")]
    Store {
        operation: StoreOperation,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Database errors raised inside the SQL key store
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Serialization/deserialization errors (credential metadata)
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// A credential version already exists with different contents
    #[error("Resource conflict: {message}")]
    Conflict { message: String },

    /// Invalid caller input
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Internal errors (RNG failure, broken invariants)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl VaultError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a malformed envelope error
    pub fn format<S: Into<String>>(message: S) -> Self {
        Self::Format { message: message.into() }
    }

    /// Create an authentication (tag verification) error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication { message: message.into() }
    }

    /// Create a missing-active-key error
    pub fn no_active_key<P: Into<String>, K: Into<String>>(provider: P, key_type: K) -> Self {
        Self::NoActiveKey { provider: provider.into(), key_type: key_type.into() }
    }

    /// Wrap a store failure with the operation it interrupted
    pub fn store<E>(operation: StoreOperation, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store { operation, source: Box::new(source) }
    }

    /// Create a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// The store operation this error is attributed to, if any
    pub fn store_operation(&self) -> Option<StoreOperation> {
        match self {
            VaultError::Store { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Whether the caller should treat this as "integration not configured"
    pub fn is_integration_not_configured(&self) -> bool {
        matches!(self, VaultError::NoActiveKey { .. })
    }

    /// Check if this error should be retried.
    ///
    /// Only database failures are transient. A store error is retryable
    /// when the failure it wraps is.
    pub fn is_retryable(&self) -> bool {
        match self {
            VaultError::Database { .. } => true,
            VaultError::Store { source, .. } => {
                if let Some(inner) = source.downcast_ref::<VaultError>() {
                    inner.is_retryable()
                } else {
                    source.downcast_ref::<sqlx::Error>().is_some()
                }
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<sqlx::migrate::MigrateError> for VaultError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::Database {
            source: sqlx::Error::Migrate(Box::new(error)),
            context: "Database migration failed".to_string(),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<validator::ValidationErrors> for VaultError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        // nested struct failures are not listed in field_errors()
        let message = if message.is_empty() { errors.to_string() } else { message };

        Self::config(format!("Invalid configuration: {}", message))
    }
}
