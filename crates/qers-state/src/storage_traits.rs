//! Storage trait definitions for QERS
//!
//! `ReportStore` is the single persistence abstraction: whole JSON documents
//! keyed by `(ReportKind, key)`. Batch reports, cached evaluations and job
//! status records all go through it.
//!
//! All backends are async and interchangeable. `MemoryReportStore` is the
//! default for the daemon and for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Maximum accepted key length.
pub const MAX_KEY_LEN: usize = 128;

/// Namespace of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// A finalized `BatchReport`.
    BatchReport,
    /// A cached `BatchEval` derived from one report.
    BatchEval,
    /// Lifecycle record of an asynchronous batch job.
    JobStatus,
}

impl ReportKind {
    /// Every kind, in a fixed order.
    pub const ALL: [ReportKind; 3] = [
        ReportKind::BatchReport,
        ReportKind::BatchEval,
        ReportKind::JobStatus,
    ];

    /// Stable storage name (table / directory).
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::BatchReport => "batch_report",
            ReportKind::BatchEval => "batch_eval",
            ReportKind::JobStatus => "job_status",
        }
    }
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject keys that could escape a namespace on any backend.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(invalid("key is too long"));
    }
    if key.starts_with('.') {
        return Err(invalid("key must not start with '.'"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(invalid("allowed characters are [A-Za-z0-9_.-]"));
    }
    Ok(())
}

/// Keyed document store.
///
/// Guarantees:
/// - `put` is last-write-wins and idempotent for identical values.
/// - `get` returns `StorageError::NotFound` for a missing key.
/// - A value becomes visible to `get` in one step: readers observe either the
///   previous value (or a miss) or the complete new value, never a mix.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Store `value` under `(kind, key)`, replacing any previous value.
    async fn put(&self, kind: ReportKind, key: &str, value: serde_json::Value)
        -> StorageResult<()>;

    /// Retrieve the value stored under `(kind, key)`.
    async fn get(&self, kind: ReportKind, key: &str) -> StorageResult<serde_json::Value>;

    /// Check whether `(kind, key)` holds a value.
    async fn contains(&self, kind: ReportKind, key: &str) -> StorageResult<bool>;

    /// All keys of `kind`, sorted ascending.
    async fn list_keys(&self, kind: ReportKind) -> StorageResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ReportKind::BatchReport).unwrap();
        assert_eq!(json, "\"batch_report\"");
        for kind in ReportKind::ALL {
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
    }

    #[test]
    fn validate_key_accepts_batch_ids() {
        validate_key("batch_0191b2c4d5e6f7a8b9c0d1e2f3a4b5c6").unwrap();
        validate_key("batch_1.total_reward").unwrap();
        validate_key("a-b_c").unwrap();
    }

    #[test]
    fn validate_key_rejects_traversal_and_empty() {
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key(&"x".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}
