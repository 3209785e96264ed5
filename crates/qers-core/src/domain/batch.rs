//! Batch requests, resolved configurations and finalized reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::digest::compute_digest;
use crate::domain::episode::{mean, population_std, ProfileSummary};
use crate::domain::error::Result;

pub const DEFAULT_STEPS: u32 = 100;
pub const DEFAULT_DT: f64 = 0.01;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_EPISODES_PER_PROFILE: u32 = 1;

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

fn default_dt() -> f64 {
    DEFAULT_DT
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_episodes() -> u32 {
    DEFAULT_EPISODES_PER_PROFILE
}

/// Body of `POST /sim/batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub urdf_path: Option<String>,
    /// `None` selects every registered profile.
    #[serde(default)]
    pub profiles: Option<Vec<String>>,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_episodes")]
    pub dr_episodes_per_profile: u32,
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self {
            urdf_path: None,
            profiles: None,
            steps: DEFAULT_STEPS,
            dt: DEFAULT_DT,
            seed: DEFAULT_SEED,
            dr_episodes_per_profile: DEFAULT_EPISODES_PER_PROFILE,
        }
    }
}

impl BatchRequest {
    pub fn with_profiles<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_episodes(mut self, episodes: u32) -> Self {
        self.dr_episodes_per_profile = episodes;
        self
    }
}

/// A request after validation, with the profile list made explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub urdf_path: Option<String>,
    pub profiles: Vec<String>,
    pub steps: u32,
    pub dt: f64,
    pub seed: u64,
    pub dr_episodes_per_profile: u32,
}

impl BatchConfig {
    pub fn total_episodes(&self) -> u64 {
        self.profiles.len() as u64 * self.dr_episodes_per_profile as u64
    }

    /// SHA-256 of the canonical JSON form.
    pub fn digest(&self) -> Result<String> {
        compute_digest(&serde_json::to_value(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    /// `cancelled` wins over `failed`; `failed` only when nothing completed.
    pub fn derive(per_profile: &[ProfileSummary], cancelled: bool) -> Self {
        if cancelled {
            return BatchStatus::Cancelled;
        }
        if per_profile.iter().any(ProfileSummary::has_completed) {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

/// Spread of `avg_step_time_ms` across profiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossProfileStats {
    pub num_profiles: usize,
    pub step_time_mean_ms: f64,
    pub step_time_std_ms: f64,
    pub step_time_min_ms: f64,
    pub step_time_max_ms: f64,
}

impl CrossProfileStats {
    /// Profiles with no completed episode count toward `num_profiles` only.
    pub fn from_summaries(per_profile: &[ProfileSummary]) -> Self {
        let times: Vec<f64> = per_profile
            .iter()
            .filter(|p| p.has_completed())
            .map(|p| p.summary.avg_step_time_ms)
            .collect();

        let (min, max) = if times.is_empty() {
            (0.0, 0.0)
        } else {
            (
                times.iter().copied().fold(f64::INFINITY, f64::min),
                times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };

        Self {
            num_profiles: per_profile.len(),
            step_time_mean_ms: mean(&times),
            step_time_std_ms: population_std(&times),
            step_time_min_ms: min,
            step_time_max_ms: max,
        }
    }
}

/// Finalized result of one batch. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub config: BatchConfig,
    pub config_digest: String,
    pub per_profile: Vec<ProfileSummary>,
    pub cross_profile: CrossProfileStats,
    pub total_time_s: f64,
    pub created_at: DateTime<Utc>,
    /// Source batch when this report was produced by a retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
}

impl BatchReport {
    pub fn profile(&self, profile_id: &str) -> Option<&ProfileSummary> {
        self.per_profile.iter().find(|p| p.profile_id == profile_id)
    }

    /// `(completed, failed)` across all profiles.
    pub fn episode_counts(&self) -> (usize, usize) {
        self.per_profile.iter().fold((0, 0), |(c, f), p| {
            (c + p.summary.completed as usize, f + p.summary.failed as usize)
        })
    }
}

/// Time-ordered batch handle: `batch_` + UUIDv7 in simple form.
pub fn new_batch_id() -> String {
    format!("batch_{}", Uuid::now_v7().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::episode::{
        DrRealization, EpisodeResult, EpisodeStatus, EpisodeTiming, MetricMap,
    };
    use serde_json::json;

    fn summary(profile_id: &str, step_ms: Option<f64>) -> ProfileSummary {
        let ep = EpisodeResult {
            run_id: "r".to_string(),
            episode_index: 0,
            seed: 0,
            status: if step_ms.is_some() {
                EpisodeStatus::Completed
            } else {
                EpisodeStatus::Failed
            },
            metrics: MetricMap::new(),
            dr_realization: DrRealization::new(),
            timing: EpisodeTiming {
                avg_step_time_ms: step_ms.unwrap_or(0.0),
                total_time_s: 0.0,
            },
            failure: None,
        };
        ProfileSummary::from_episodes(profile_id, vec![ep])
    }

    #[test]
    fn request_defaults_fill_missing_fields() {
        let req: BatchRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(req, BatchRequest::default());
        assert_eq!(req.steps, 100);
        assert_eq!(req.dt, 0.01);
        assert_eq!(req.seed, 42);
        assert_eq!(req.dr_episodes_per_profile, 1);
        assert!(req.profiles.is_none());
    }

    #[test]
    fn explicit_empty_profiles_is_distinct_from_absent() {
        let req: BatchRequest = serde_json::from_value(json!({"profiles": []})).unwrap();
        assert_eq!(req.profiles, Some(vec![]));
    }

    #[test]
    fn batch_id_is_prefixed_and_time_ordered() {
        let a = new_batch_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_batch_id();
        assert!(a.starts_with("batch_"));
        assert_eq!(a.len(), "batch_".len() + 32);
        assert!(a < b);
    }

    #[test]
    fn cross_profile_skips_profiles_without_completions() {
        let stats = CrossProfileStats::from_summaries(&[
            summary("a", Some(2.0)),
            summary("b", Some(4.0)),
            summary("c", None),
        ]);
        assert_eq!(stats.num_profiles, 3);
        assert_eq!(stats.step_time_mean_ms, 3.0);
        assert_eq!(stats.step_time_std_ms, 1.0);
        assert_eq!(stats.step_time_min_ms, 2.0);
        assert_eq!(stats.step_time_max_ms, 4.0);
    }

    #[test]
    fn cross_profile_empty_is_zero() {
        let stats = CrossProfileStats::from_summaries(&[summary("a", None)]);
        assert_eq!(stats.step_time_min_ms, 0.0);
        assert_eq!(stats.step_time_max_ms, 0.0);
    }

    #[test]
    fn status_derivation() {
        let ok = [summary("a", Some(1.0)), summary("b", None)];
        let bad = [summary("a", None)];
        assert_eq!(BatchStatus::derive(&ok, false), BatchStatus::Completed);
        assert_eq!(BatchStatus::derive(&bad, false), BatchStatus::Failed);
        assert_eq!(BatchStatus::derive(&ok, true), BatchStatus::Cancelled);
    }

    #[test]
    fn config_digest_is_stable() {
        let cfg = BatchConfig {
            urdf_path: None,
            profiles: vec!["default".to_string(), "noisy".to_string()],
            steps: 50,
            dt: 0.01,
            seed: 42,
            dr_episodes_per_profile: 3,
        };
        assert_eq!(cfg.digest().unwrap(), cfg.clone().digest().unwrap());
        assert_eq!(cfg.total_episodes(), 6);
    }
}
