//! Error types for the herald-store crate.
//!
//! Storage operations distinguish between I/O failures, serialization
//! failures, missing records, and optimistic-concurrency conflicts so that
//! callers can branch on the outcome rather than parse error strings.

use std::io;

use thiserror::Error;

use crate::types::{QueueId, Version};

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Queue record not found in the store.
    #[error("Queue not found: {0}")]
    NotFound(QueueId),

    /// A versioned update lost against a concurrent writer. The caller
    /// must re-read and decide whether to retry or defer.
    #[error("Version conflict on {record}: expected {expected}, found {actual}")]
    Conflict {
        record: String,
        expected: Version,
        actual: Version,
    },

    /// Store directory validation failed.
    #[error("Store validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Bincode serialization failed.
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode deserialization failed.
    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Record data is corrupted or incomplete.
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

/// Store directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Store path does not exist.
    #[error("Store path does not exist: {0}")]
    PathNotFound(String),

    /// Store path is not a directory.
    #[error("Store path is not a directory: {0}")]
    NotDirectory(String),

    /// Store path must be absolute.
    #[error("Store path must be absolute: {0}")]
    NotAbsolute(String),

    /// Store path contains directory traversal components.
    #[error("Store path cannot contain '..' components: {0}")]
    Traversal(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// Convenience conversion for lock poisoning
impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl StoreError {
    /// Returns `true` if this error is an optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }

    #[test]
    fn test_conflict_detection() {
        let err = StoreError::Conflict {
            record: "queue".to_string(),
            expected: 2,
            actual: 5,
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("expected 2"));

        let err = StoreError::Internal("whatever".to_string());
        assert!(!err.is_conflict());
    }
}
