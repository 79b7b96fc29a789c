//! Error types for mailvault-meta

use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lookup of an absent message id (expected in normal operation)
    NotFound,
    /// Record rejected before any mutation
    MalformedRecord,
    /// Backing-store I/O or statement failure
    Database,
    /// Transaction begin/commit failure or poisoned store handle
    Transaction,
    /// Serialization/deserialization errors
    Serialization,
    /// Record store and secondary index disagree (fatal)
    IndexInconsistency,
    /// Query on a field that is not registered
    UnindexedField,
    /// Query on a field whose backfill has not completed
    BackfillPending,
    /// Configuration errors
    Config,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::MalformedRecord => "malformed_record",
            ErrorKind::Database => "database",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Serialization => "serialization",
            ErrorKind::IndexInconsistency => "index_inconsistency",
            ErrorKind::UnindexedField => "unindexed_field",
            ErrorKind::BackfillPending => "backfill_pending",
            ErrorKind::Config => "config",
            ErrorKind::IO => "io",
        }
    }

    /// Whether the store may have diverged from its index.
    ///
    /// Fatal kinds require a full index rebuild from the record store.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::IndexInconsistency)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    // Convenience constructors
    pub fn not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("Message not found: {}", id))
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedRecord, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn inconsistency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexInconsistency, message)
    }

    pub fn unindexed_field(field: &str) -> Self {
        Self::new(
            ErrorKind::UnindexedField,
            format!("Field is not indexed: {}", field),
        )
    }

    pub fn backfill_pending(field: &str) -> Self {
        Self::new(
            ErrorKind::BackfillPending,
            format!("Field '{}' is registered but not yet backfilled", field),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, format!("I/O error: {}", err)).with_source(err)
    }
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::config(err.to_string()).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
