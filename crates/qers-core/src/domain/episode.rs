//! Episode results and per-profile summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Concrete parameter values drawn for one episode.
///
/// Integer and boolean parameters are stored as `f64` (`0.0` / `1.0`).
pub type DrRealization = BTreeMap<String, f64>;

/// Named scalar metrics reported by one episode.
pub type MetricMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Completed,
    Failed,
}

/// Why an episode ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The runner returned an error or panicked.
    Error,
    /// The episode exceeded its wall-clock budget.
    Timeout,
    /// The batch was cancelled before the episode was scheduled.
    Cancelled,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::Error => "error",
            FailureCause::Timeout => "timeout",
            FailureCause::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeFailure {
    pub cause: FailureCause,
    pub message: String,
}

/// Wall-clock measurements. Kept apart from `metrics` so reruns reproduce
/// `metrics` exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeTiming {
    pub avg_step_time_ms: f64,
    pub total_time_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeResult {
    pub run_id: String,
    pub episode_index: u32,
    /// Derived per-episode seed.
    pub seed: u64,
    pub status: EpisodeStatus,
    #[serde(default)]
    pub metrics: MetricMap,
    #[serde(default)]
    pub dr_realization: DrRealization,
    #[serde(default)]
    pub timing: EpisodeTiming,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<EpisodeFailure>,
}

impl EpisodeResult {
    pub fn is_completed(&self) -> bool {
        self.status == EpisodeStatus::Completed
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        self.failure.as_ref().map(|f| f.cause)
    }
}

/// `{batch_id}__{profile_id}__ep{episode_index}`
pub fn make_run_id(batch_id: &str, profile_id: &str, episode_index: u32) -> String {
    format!("{batch_id}__{profile_id}__ep{episode_index}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_episodes: u32,
    pub completed: u32,
    pub failed: u32,
    /// Mean over completed episodes, `0.0` when none completed.
    pub avg_step_time_ms: f64,
    /// Sum over completed episodes.
    pub total_time_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub profile_id: String,
    pub episodes: Vec<EpisodeResult>,
    pub summary: SummaryStats,
}

impl ProfileSummary {
    /// Build the summary from the episode list. This is the only constructor;
    /// summaries are never patched field by field.
    pub fn from_episodes(profile_id: impl Into<String>, mut episodes: Vec<EpisodeResult>) -> Self {
        episodes.sort_by_key(|e| e.episode_index);

        let completed: Vec<&EpisodeResult> = episodes.iter().filter(|e| e.is_completed()).collect();
        let step_times: Vec<f64> = completed.iter().map(|e| e.timing.avg_step_time_ms).collect();
        let total_time_s = completed.iter().map(|e| e.timing.total_time_s).sum();

        let total = episodes.len() as u32;
        let done = completed.len() as u32;

        Self {
            profile_id: profile_id.into(),
            summary: SummaryStats {
                total_episodes: total,
                completed: done,
                failed: total - done,
                avg_step_time_ms: mean(&step_times),
                total_time_s,
            },
            episodes,
        }
    }

    pub fn completed_episodes(&self) -> impl Iterator<Item = &EpisodeResult> {
        self.episodes.iter().filter(|e| e.is_completed())
    }

    pub fn has_completed(&self) -> bool {
        self.summary.completed > 0
    }
}

/// Arithmetic mean, `0.0` for an empty slice.
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation (divide by N), `0.0` below two values.
pub(crate) fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}
