//! Error taxonomy for batch execution and gap evaluation.

use qers_state::StorageError;

/// Failure of a single episode.
///
/// Never surfaces to a caller directly: the executor records it on the
/// episode as `status = failed`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EpisodeError {
    #[error("physics diverged at step {step}: {message}")]
    Physics { step: u32, message: String },

    #[error("invalid sampled parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: String,
        value: f64,
        reason: String,
    },

    #[error("episode runner panicked: {0}")]
    Panicked(String),

    #[error("episode produced non-finite {field} = {value}")]
    NonFinite { field: String, value: f64 },
}

/// Errors surfaced by the batch service.
#[derive(Debug, thiserror::Error)]
pub enum GapError {
    /// Bad request; rejected before any episode runs.
    #[error("invalid batch configuration: {0}")]
    BatchConfig(String),

    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    #[error("unknown batch: {0}")]
    UnknownBatch(String),

    /// A job exists for the id but its report is not persisted yet.
    #[error("batch not ready: {batch_id} is {state}")]
    BatchNotReady { batch_id: String, state: String },

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("inconsistent metrics in batch {batch_id}: run {run_id} reports {found:?}, expected {expected:?}")]
    InconsistentMetrics {
        batch_id: String,
        run_id: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("invalid profile {profile_id}: {reason}")]
    InvalidProfile { profile_id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GapError {
    /// `true` for errors caused by the caller's input or a lookup miss.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GapError::BatchConfig(_)
                | GapError::UnknownProfile(_)
                | GapError::UnknownBatch(_)
                | GapError::BatchNotReady { .. }
                | GapError::Evaluation(_)
                | GapError::InconsistentMetrics { .. }
        )
    }
}

/// Result type for batch service operations.
pub type Result<T> = std::result::Result<T, GapError>;
