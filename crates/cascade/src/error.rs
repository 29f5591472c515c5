//! Error types for Cascade

use thiserror::Error;

use crate::adapters::BlobError;
use crate::memory::RecordId;

/// Main error type for Cascade operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The record is not present in any tier
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    /// The backing blob store failed or did not answer before the deadline
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A single record is larger than the whole hot tier budget
    #[error("Capacity exceeded: record of {size} bytes exceeds hot budget of {budget} bytes")]
    CapacityExceeded { size: u64, budget: u64 },

    /// Preconditions of a multi-record operation no longer hold
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation was called with arguments it cannot honour
    #[error("Invalid operation: {0}")]
    Invalid(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Whether the caller may retry the same operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::StorageUnavailable(_) | CacheError::Conflict(_))
    }
}

impl From<BlobError> for CacheError {
    fn from(e: BlobError) -> Self {
        CacheError::StorageUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Result type alias for Cascade operations
pub type Result<T> = std::result::Result<T, CacheError>;
