//! QERS Core Library
//!
//! Batch multi-profile evaluation: run episodes across reality profiles,
//! aggregate per-profile statistics and compute pairwise transfer-gap
//! metrics between profiles.

pub mod config;
pub mod domain;
pub mod dr;
pub mod executor;
pub mod gap;
pub mod jobs;
pub mod metrics;
pub mod obs;
pub mod registry;
pub mod seed;
pub mod service;
pub mod sim;
pub mod store;
pub mod telemetry;

pub use domain::{
    make_run_id, new_batch_id, BatchConfig, BatchEval, BatchReport, BatchRequest, BatchStatus,
    CrossProfileStats, DrRealization, EpisodeError, EpisodeFailure, EpisodeResult, EpisodeStatus,
    EpisodeTiming, EvalSummary, FailureCause, GapError, GapWidth, JobState, JobStatus, MetricMap,
    PairwiseDrop, ParamDistribution, PerformanceDrop, ProfileInfo, ProfileSummary, RealityProfile,
    Result, SummaryStats, DEFAULT_PERFORMANCE_METRIC,
};

pub use config::ServiceConfig;
pub use executor::{BatchExecutor, CancelHandle, ExecutorConfig};
pub use gap::{evaluate_report, GapEvaluator};
pub use jobs::JobTracker;
pub use registry::ProfileRegistry;
pub use seed::derive_episode_seed;
pub use service::BatchService;
pub use sim::{EpisodeContext, EpisodeOutput, EpisodeRunner, PhysicsModel, PlanarArm, SimEpisodeRunner};
pub use store::Reports;

pub use qers_state::{
    FsReportStore, MemoryReportStore, ReportKind, ReportStore, StorageError, SurrealReportStore,
};

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// QERS version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
