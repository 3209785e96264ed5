//! Error types for qers-state

use thiserror::Error;

use crate::storage_traits::ReportKind;

/// Errors that can occur in the report persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No value stored under the requested key
    #[error("{kind} not found: {key}")]
    NotFound { kind: ReportKind, key: String },

    /// Key is empty, too long, or contains characters outside `[A-Za-z0-9_.-]`
    #[error("invalid report key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Backend query or lock failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl StorageError {
    /// `true` when the error only signals a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_names_kind_and_key() {
        let err = StorageError::NotFound {
            kind: ReportKind::BatchEval,
            key: "batch_abc".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("batch_eval"));
        assert!(msg.contains("batch_abc"));
        assert!(err.is_not_found());
    }

    #[test]
    fn backend_error_is_not_a_miss() {
        let err = StorageError::Backend("connection reset".to_string());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("connection reset"));
    }
}
