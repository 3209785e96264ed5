//! Domain models for QERS batch evaluation.
//!
//! - `RealityProfile`: named set of parameter distributions
//! - `EpisodeResult` / `ProfileSummary`: one run and its per-profile rollup
//! - `BatchReport`: finalized batch, keyed by `batch_id`
//! - `BatchEval`: pairwise transfer-gap metrics over one report
//! - `JobStatus`: lifecycle of an asynchronous batch

pub mod batch;
pub mod digest;
pub mod episode;
pub mod error;
pub mod eval;
pub mod job;
pub mod profile;

pub use batch::{
    new_batch_id, BatchConfig, BatchReport, BatchRequest, BatchStatus, CrossProfileStats,
};
pub use episode::{
    make_run_id, DrRealization, EpisodeFailure, EpisodeResult, EpisodeStatus, EpisodeTiming,
    FailureCause, MetricMap, ProfileSummary, SummaryStats,
};
pub use error::{EpisodeError, GapError, Result};
pub use eval::{
    BatchEval, EvalSummary, GapWidth, PairwiseDrop, PerformanceDrop, DEFAULT_PERFORMANCE_METRIC,
};
pub use job::{JobState, JobStatus};
pub use profile::{ParamDistribution, ProfileInfo, RealityProfile};
