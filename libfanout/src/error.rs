//! Error types for Fanout

use thiserror::Error;

use crate::types::{FailureKind, PostStatus};

pub type Result<T> = std::result::Result<T, FanoutError>;

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// A status change outside the transition table. This is a logic fault
    /// in the caller, never a retryable condition.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: PostStatus, to: PostStatus },

    /// An outstanding job already holds this dedup key. Expected during
    /// idempotent scheduling; callers treat it as a no-op signal.
    #[error("Duplicate job for dedup key: {0}")]
    DuplicateJob(String),

    /// A stale write was rejected by the version check. Expected under
    /// concurrency; callers re-read and retry a bounded number of times.
    #[error("Version conflict saving post: {0}")]
    VersionConflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FanoutError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FanoutError::InvalidInput(_) => 3,
            FanoutError::Config(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure reported by a platform adapter. The variant is the retry
/// classification; workers never inspect anything beyond kind and message.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("transient platform failure: {0}")]
    Transient(String),

    #[error("permanent platform failure: {0}")]
    Permanent(String),
}

impl AdapterError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AdapterError::Transient(_) => FailureKind::Transient,
            AdapterError::Permanent(_) => FailureKind::Permanent,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AdapterError::Transient(msg) | AdapterError::Permanent(msg) => msg,
        }
    }
}
