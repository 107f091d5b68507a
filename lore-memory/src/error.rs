//! Error types for lore-memory

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the memory engine
#[derive(Debug, Error)]
pub enum MemoryError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Write request is missing required fields or carries invalid values
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Malformed event id
    #[error("Invalid event id: {0}")]
    InvalidId(String),

    /// A file lock could not be acquired before the timeout
    #[error("Lock timeout: {}", .0.display())]
    LockTimeout(PathBuf),

    /// Event not found
    #[error("Event not found: {0}")]
    NotFound(String),

    /// Invalid path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid configuration value
    #[error("Invalid config: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MemoryError {
    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create an invalid id error
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for contract-precondition failures the caller must fix.
    ///
    /// Everything else is a storage-side failure that callers degrade to
    /// "memory unavailable this cycle".
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidRecord(_) | Self::InvalidId(_))
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = MemoryError::invalid_record("content is empty");
        assert_eq!(err.to_string(), "Invalid record: content is empty");

        let err = MemoryError::LockTimeout(PathBuf::from("/tmp/x.lock"));
        assert_eq!(err.to_string(), "Lock timeout: /tmp/x.lock");
    }

    #[test]
    fn test_input_error_classification() {
        assert!(MemoryError::invalid_record("x").is_input_error());
        assert!(MemoryError::invalid_id("x").is_input_error());
        assert!(!MemoryError::other("x").is_input_error());

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!MemoryError::from(io).is_input_error());
    }
}
