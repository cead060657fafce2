//! Error types for Strata.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in Strata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("No segment holds offset {offset} in store {store}")]
    SegmentNotFound { store: String, offset: u64 },

    #[error("Store {0} has been removed")]
    StoreRemoved(String),

    // Batch errors
    #[error("Batch not found: {batch_id}")]
    BatchNotFound { batch_id: u64 },

    #[error("Batch corrupted: {batch_id}, reason: {reason}")]
    BatchCorrupted { batch_id: u64, reason: String },

    #[error("Batch manager {0} has been removed")]
    ManagerRemoved(u32),

    // Tree errors
    #[error("Invalid key length {key_length} for {columns} columns")]
    InvalidKeyLength { key_length: usize, columns: usize },

    #[error("Tuple arity mismatch: expected {expected}, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("STree corrupted: {0}")]
    TreeCorrupted(String),

    // Type errors
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Unsupported type tag: {0}")]
    UnsupportedType(u8),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Creates a batch corruption error.
    pub fn corrupted(batch_id: u64, reason: impl Into<String>) -> Self {
        Self::BatchCorrupted {
            batch_id,
            reason: reason.into(),
        }
    }

    /// Creates a tree corruption error.
    pub fn tree_corrupted(msg: impl Into<String>) -> Self {
        Self::TreeCorrupted(msg.into())
    }

    /// Returns true for failures raised by the storage layer.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StrataError::Io(_)
                | StrataError::SegmentNotFound { .. }
                | StrataError::StoreRemoved(_)
                | StrataError::BatchNotFound { .. }
                | StrataError::BatchCorrupted { .. }
        )
    }
}
