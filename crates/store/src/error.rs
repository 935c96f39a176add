//! Error types for storage operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data exists but cannot be decoded
    #[error("Corrupt data under key '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// Write would exceed the storage quota
    #[error("Storage quota exceeded: {needed} bytes needed, {limit} available")]
    QuotaExceeded { needed: usize, limit: usize },

    /// The in-memory state changed but could not be written to durable storage
    #[error("Local persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl StoreError {
    /// Whether this error means local durability is degraded rather than
    /// the operation itself being invalid
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            StoreError::PersistenceUnavailable(_) | StoreError::QuotaExceeded { .. } | StoreError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
