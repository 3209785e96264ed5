//! Batch executor.
//!
//! Fans `profiles x episodes` out over a bounded worker pool, folds the
//! results into per-profile summaries and publishes the finished report in a
//! single store call.
//!
//! - A `Semaphore` bounds concurrency. The permit moves into the blocking
//!   closure, so an episode that outlives its timeout still holds its slot.
//! - A `watch` flag cancels the batch: in-flight episodes finish, episodes
//!   not yet started are recorded as failed with cause `cancelled`.
//! - Episode failures never abort the batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn, Instrument};

use crate::domain::{
    make_run_id, new_batch_id, BatchConfig, BatchReport, BatchRequest, BatchStatus,
    CrossProfileStats, EpisodeError, EpisodeFailure, EpisodeResult, EpisodeStatus, EpisodeTiming,
    FailureCause, GapError, MetricMap, ProfileSummary, RealityProfile, Result,
};
use crate::dr::sample_realization;
use crate::gap::consistent_metric_keys;
use crate::metrics::METRICS;
use crate::obs;
use crate::registry::ProfileRegistry;
use crate::seed::derive_episode_seed;
use crate::sim::{EpisodeContext, EpisodeRunner};
use crate::store::Reports;

/// Upper bound on `profiles x episodes` accepted in one batch.
pub const DEFAULT_MAX_EPISODES_PER_BATCH: u64 = 10_000;

/// Executor tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Maximum number of episodes running at once.
    pub max_workers: usize,
    /// Wall-clock budget per episode. `None` disables the timeout.
    pub episode_timeout: Option<Duration>,
    pub max_episodes_per_batch: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_workers(),
            episode_timeout: None,
            max_episodes_per_batch: DEFAULT_MAX_EPISODES_PER_BATCH,
        }
    }
}

/// Host parallelism, at least 1.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Cancellation flag for one batch. Cloning shares the flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop scheduling further episodes. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// One scheduled episode.
#[derive(Clone)]
struct EpisodeJob {
    profile_idx: usize,
    profile: Arc<RealityProfile>,
    ctx: EpisodeContext,
}

/// Runs batches against a profile registry, an episode runner and a store.
pub struct BatchExecutor {
    registry: Arc<ProfileRegistry>,
    runner: Arc<dyn EpisodeRunner>,
    reports: Reports,
    config: ExecutorConfig,
}

impl BatchExecutor {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        runner: Arc<dyn EpisodeRunner>,
        reports: Reports,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            runner,
            reports,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Check `request` and resolve its profiles. Nothing runs and nothing is
    /// persisted on rejection.
    pub fn validate(
        &self,
        request: &BatchRequest,
    ) -> Result<(BatchConfig, Vec<Arc<RealityProfile>>)> {
        if request.steps < 1 {
            return Err(GapError::BatchConfig("steps must be >= 1".to_string()));
        }
        if request.dr_episodes_per_profile < 1 {
            return Err(GapError::BatchConfig(
                "dr_episodes_per_profile must be >= 1".to_string(),
            ));
        }
        if !request.dt.is_finite() || request.dt <= 0.0 {
            return Err(GapError::BatchConfig(format!(
                "dt must be finite and > 0, got {}",
                request.dt
            )));
        }

        let ids = match &request.profiles {
            Some(ids) if ids.is_empty() => {
                return Err(GapError::BatchConfig("profile list is empty".to_string()));
            }
            Some(ids) => ids.clone(),
            None => self.registry.ids(),
        };
        if ids.is_empty() {
            return Err(GapError::BatchConfig("no profiles are registered".to_string()));
        }
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(GapError::BatchConfig(format!("duplicate profile id: {id}")));
            }
        }

        let unknown: Vec<&str> = ids
            .iter()
            .filter(|id| !self.registry.contains(id.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(GapError::BatchConfig(format!(
                "unknown profile: {}",
                unknown.join(", ")
            )));
        }
        let profiles = self.registry.resolve(&ids)?;

        let config = BatchConfig {
            urdf_path: request.urdf_path.clone(),
            profiles: ids,
            steps: request.steps,
            dt: request.dt,
            seed: request.seed,
            dr_episodes_per_profile: request.dr_episodes_per_profile,
        };
        if config.total_episodes() > self.config.max_episodes_per_batch {
            return Err(GapError::BatchConfig(format!(
                "batch has {} episodes, limit is {}",
                config.total_episodes(),
                self.config.max_episodes_per_batch
            )));
        }

        Ok((config, profiles))
    }

    /// Validate, run and persist a batch under a fresh id.
    pub async fn execute(&self, request: BatchRequest) -> Result<BatchReport> {
        let (config, profiles) = self.validate(&request)?;
        self.execute_validated(new_batch_id(), config, profiles, CancelHandle::new())
            .await
    }

    /// Run an already validated batch under `batch_id`.
    pub async fn execute_validated(
        &self,
        batch_id: String,
        config: BatchConfig,
        profiles: Vec<Arc<RealityProfile>>,
        cancel: CancelHandle,
    ) -> Result<BatchReport> {
        let span = obs::batch_span(&batch_id);
        async move {
            let started = Instant::now();
            obs::emit_batch_started(&batch_id, profiles.len(), config.dr_episodes_per_profile);

            let mut jobs = Vec::with_capacity(config.total_episodes() as usize);
            for (profile_idx, profile) in profiles.iter().enumerate() {
                for episode_index in 0..config.dr_episodes_per_profile {
                    jobs.push(EpisodeJob {
                        profile_idx,
                        profile: Arc::clone(profile),
                        ctx: EpisodeContext {
                            run_id: make_run_id(&batch_id, &profile.id, episode_index),
                            episode_index,
                            seed: derive_episode_seed(config.seed, &profile.id, episode_index),
                            steps: config.steps,
                            dt: config.dt,
                            urdf_path: config.urdf_path.clone(),
                        },
                    });
                }
            }

            let mut grouped: Vec<Vec<EpisodeResult>> = vec![Vec::new(); profiles.len()];
            let (results, cancelled) = self.run_episodes(jobs, &cancel).await;
            for (idx, result) in results {
                grouped[idx].push(result);
            }

            self.finalize(batch_id.clone(), config, &profiles, grouped, cancelled, started, None)
                .await
        }
        .instrument(span)
        .await
    }

    /// Re-run only the failed episodes of a stored batch with their original
    /// seeds. Completed episodes are carried over. The result is a new report
    /// under a fresh id with `retry_of` set; the source report is untouched.
    pub async fn rerun_failed(&self, batch_id: &str) -> Result<BatchReport> {
        let source = self.reports.get_report(batch_id).await?;
        let failed: usize = source
            .per_profile
            .iter()
            .map(|p| p.summary.failed as usize)
            .sum();
        if failed == 0 {
            return Err(GapError::BatchConfig(format!(
                "batch {batch_id} has no failed episodes to retry"
            )));
        }

        let profiles = self
            .registry
            .resolve(&source.config.profiles)
            .map_err(|e| match e {
                GapError::UnknownProfile(id) => GapError::BatchConfig(format!(
                    "profile {id} of batch {batch_id} is no longer registered"
                )),
                other => other,
            })?;

        let new_id = new_batch_id();
        let span = obs::batch_span(&new_id);
        async move {
            let started = Instant::now();
            obs::emit_batch_started(&new_id, profiles.len(), source.config.dr_episodes_per_profile);

            let mut grouped: Vec<Vec<EpisodeResult>> = vec![Vec::new(); profiles.len()];
            let mut jobs = Vec::new();
            for (profile_idx, summary) in source.per_profile.iter().enumerate() {
                let profile = &profiles[profile_idx];
                for episode in &summary.episodes {
                    let run_id = make_run_id(&new_id, &summary.profile_id, episode.episode_index);
                    if episode.is_completed() {
                        grouped[profile_idx].push(EpisodeResult {
                            run_id,
                            ..episode.clone()
                        });
                    } else {
                        jobs.push(EpisodeJob {
                            profile_idx,
                            profile: Arc::clone(profile),
                            ctx: EpisodeContext {
                                run_id,
                                episode_index: episode.episode_index,
                                seed: episode.seed,
                                steps: source.config.steps,
                                dt: source.config.dt,
                                urdf_path: source.config.urdf_path.clone(),
                            },
                        });
                    }
                }
            }
            debug!(retried = jobs.len(), source = %batch_id, "re-running failed episodes");

            let (results, cancelled) = self.run_episodes(jobs, &CancelHandle::new()).await;
            for (idx, result) in results {
                grouped[idx].push(result);
            }

            self.finalize(
                new_id.clone(),
                source.config.clone(),
                &profiles,
                grouped,
                cancelled,
                started,
                Some(batch_id.to_string()),
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Fan `jobs` out on the worker pool. Returns results in job order and
    /// whether cancellation skipped any episode.
    async fn run_episodes(
        &self,
        jobs: Vec<EpisodeJob>,
        cancel: &CancelHandle,
    ) -> (Vec<(usize, EpisodeResult)>, bool) {
        let sem = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let timeout = self.config.episode_timeout;

        let mut tasks = Vec::with_capacity(jobs.len());
        for job in jobs {
            let sem = Arc::clone(&sem);
            let runner = Arc::clone(&self.runner);
            let cancel_rx = cancel.subscribe();
            let fallback = job.clone();

            let task = tokio::spawn(
                async move {
                    let permit = match sem.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return skipped(&job),
                    };
                    if *cancel_rx.borrow() {
                        return skipped(&job);
                    }
                    run_one(runner, job, permit, timeout).await
                }
                .in_current_span(),
            );
            tasks.push((fallback, task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        let mut cancelled = false;
        for (job, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => failed(
                    &job,
                    FailureCause::Error,
                    EpisodeError::Panicked(e.to_string()).to_string(),
                    EpisodeTiming::default(),
                ),
            };
            if result.failure_cause() == Some(FailureCause::Cancelled) {
                cancelled = true;
            }
            results.push((job.profile_idx, result));
        }
        (results, cancelled)
    }

    /// Build summaries, check metric consistency and persist the report.
    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        batch_id: String,
        config: BatchConfig,
        profiles: &[Arc<RealityProfile>],
        grouped: Vec<Vec<EpisodeResult>>,
        cancelled: bool,
        started: Instant,
        retry_of: Option<String>,
    ) -> Result<BatchReport> {
        let per_profile: Vec<ProfileSummary> = profiles
            .iter()
            .zip(grouped)
            .map(|(profile, episodes)| ProfileSummary::from_episodes(profile.id.clone(), episodes))
            .collect();

        consistent_metric_keys(
            &batch_id,
            per_profile.iter().flat_map(|p| p.episodes.iter()),
        )?;

        let report = BatchReport {
            status: BatchStatus::derive(&per_profile, cancelled),
            config_digest: config.digest()?,
            cross_profile: CrossProfileStats::from_summaries(&per_profile),
            total_time_s: started.elapsed().as_secs_f64(),
            created_at: Utc::now(),
            batch_id,
            config,
            per_profile,
            retry_of,
        };

        if let Err(e) = self.reports.put_report(&report).await {
            obs::emit_persist_error(&report.batch_id, &e);
            return Err(e);
        }

        let (completed, failed) = report.episode_counts();
        METRICS.inc_batches();
        METRICS.flush();
        obs::emit_batch_finished(
            &report.batch_id,
            report.status.as_str(),
            completed,
            failed,
            report.total_time_s,
        );
        Ok(report)
    }
}

async fn run_one(
    runner: Arc<dyn EpisodeRunner>,
    job: EpisodeJob,
    permit: tokio::sync::OwnedSemaphorePermit,
    timeout: Option<Duration>,
) -> EpisodeResult {
    let started = Instant::now();
    let profile = Arc::clone(&job.profile);
    let ctx = job.ctx.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        runner.run(&profile, &ctx)
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                let elapsed = started.elapsed();
                warn!(run_id = %job.ctx.run_id, timeout_ms = limit.as_millis() as u64, "episode timed out");
                METRICS.inc_episodes_timed_out();
                return failed(
                    &job,
                    FailureCause::Timeout,
                    format!("episode exceeded {} ms", limit.as_millis()),
                    timing_of(elapsed, job.ctx.steps),
                );
            }
        },
        None => handle.await,
    };
    let elapsed = started.elapsed();

    let joined = joined.map(|r| r.and_then(|output| output.check_finite().map(|()| output)));

    match joined {
        Ok(Ok(output)) => {
            METRICS.inc_episodes_completed();
            obs::emit_episode_finished(
                &job.ctx.run_id,
                true,
                None,
                elapsed.as_secs_f64() * 1000.0,
            );
            EpisodeResult {
                run_id: job.ctx.run_id,
                episode_index: job.ctx.episode_index,
                seed: job.ctx.seed,
                status: EpisodeStatus::Completed,
                metrics: output.metrics,
                dr_realization: output.dr_realization,
                timing: output.timing,
                failure: None,
            }
        }
        Ok(Err(e)) => {
            warn!(run_id = %job.ctx.run_id, error = %e, "episode failed");
            failed(
                &job,
                FailureCause::Error,
                e.to_string(),
                timing_of(elapsed, job.ctx.steps),
            )
        }
        Err(join_err) => {
            warn!(run_id = %job.ctx.run_id, error = %join_err, "episode runner panicked");
            failed(
                &job,
                FailureCause::Error,
                EpisodeError::Panicked(join_err.to_string()).to_string(),
                timing_of(elapsed, job.ctx.steps),
            )
        }
    }
}

fn timing_of(elapsed: Duration, steps: u32) -> EpisodeTiming {
    EpisodeTiming {
        avg_step_time_ms: elapsed.as_secs_f64() * 1000.0 / steps.max(1) as f64,
        total_time_s: elapsed.as_secs_f64(),
    }
}

fn skipped(job: &EpisodeJob) -> EpisodeResult {
    failed(
        job,
        FailureCause::Cancelled,
        "batch cancelled before episode started".to_string(),
        EpisodeTiming::default(),
    )
}

/// Failed episode record. The realization is re-derived from the seed so it
/// matches what a successful run would have drawn.
fn failed(
    job: &EpisodeJob,
    cause: FailureCause,
    message: String,
    timing: EpisodeTiming,
) -> EpisodeResult {
    if cause != FailureCause::Cancelled {
        METRICS.inc_episodes_failed();
    }
    obs::emit_episode_finished(
        &job.ctx.run_id,
        false,
        Some(cause.as_str()),
        timing.total_time_s * 1000.0,
    );
    EpisodeResult {
        run_id: job.ctx.run_id.clone(),
        episode_index: job.ctx.episode_index,
        seed: job.ctx.seed,
        status: EpisodeStatus::Failed,
        metrics: MetricMap::new(),
        dr_realization: sample_realization(&job.profile, job.ctx.seed).unwrap_or_default(),
        timing,
        failure: Some(EpisodeFailure { cause, message }),
    }
}
