//! Asynchronous batch job lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::batch::BatchStatus;

/// `pending -> running -> completed | failed | cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Legal forward transitions. A job may be cancelled while pending.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl From<BatchStatus> for JobState {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => JobState::Completed,
            BatchStatus::Failed => JobState::Failed,
            BatchStatus::Cancelled => JobState::Cancelled,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub batch_id: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn pending(batch_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            batch_id: batch_id.into(),
            state: JobState::Pending,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy with a new state. Returns `None` for an illegal transition.
    pub fn transition(&self, next: JobState, message: Option<String>) -> Option<Self> {
        if !self.state.can_transition_to(next) {
            return None;
        }
        Some(Self {
            batch_id: self.batch_id.clone(),
            state: next,
            message,
            created_at: self.created_at,
            updated_at: Utc::now(),
        })
    }
}
