//! The batch evaluation service: registry, executor, evaluator and job
//! tracker wired over one report store. Both binaries drive this type.

use std::sync::Arc;

use tracing::info;

use crate::config::ServiceConfig;
use crate::domain::{
    BatchEval, BatchReport, BatchRequest, GapError, JobStatus, ProfileInfo,
    RealityProfile, Result,
};
use crate::executor::{BatchExecutor, ExecutorConfig};
use crate::gap::GapEvaluator;
use crate::jobs::JobTracker;
use crate::registry::ProfileRegistry;
use crate::sim::{EpisodeRunner, PlanarArm, SimEpisodeRunner};
use crate::store::Reports;

pub struct BatchService {
    registry: Arc<ProfileRegistry>,
    reports: Reports,
    executor: Arc<BatchExecutor>,
    evaluator: GapEvaluator,
    jobs: Arc<JobTracker>,
}

impl BatchService {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        runner: Arc<dyn EpisodeRunner>,
        reports: Reports,
        executor_config: ExecutorConfig,
        performance_metric: impl Into<String>,
    ) -> Self {
        let executor = Arc::new(BatchExecutor::new(
            Arc::clone(&registry),
            runner,
            reports.clone(),
            executor_config,
        ));
        let evaluator = GapEvaluator::new(reports.clone(), Arc::clone(&registry), performance_metric);
        let jobs = Arc::new(JobTracker::new(Arc::clone(&executor), reports.clone()));
        Self {
            registry,
            reports,
            executor,
            evaluator,
            jobs,
        }
    }

    /// Builtin profiles, the planar-arm runner and an in-memory store.
    pub fn in_memory(executor_config: ExecutorConfig) -> Self {
        Self::new(
            Arc::new(ProfileRegistry::builtin()),
            Arc::new(SimEpisodeRunner::new(PlanarArm)),
            Reports::memory(),
            executor_config,
            crate::domain::DEFAULT_PERFORMANCE_METRIC,
        )
    }

    /// Build everything `config` describes, using the default runner.
    pub async fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;
        let registry = ProfileRegistry::load(
            config.profiles_file.as_deref(),
            config.include_builtin_profiles,
        )?;
        if registry.is_empty() {
            return Err(GapError::Config("no reality profiles configured".to_string()));
        }
        let store = config.open_store().await?;
        info!(
            profiles = registry.len(),
            max_workers = config.executor_config().max_workers,
            metric = %config.performance_metric,
            "batch service ready"
        );
        Ok(Self::new(
            Arc::new(registry),
            Arc::new(SimEpisodeRunner::new(PlanarArm)),
            Reports::new(store),
            config.executor_config(),
            config.performance_metric.clone(),
        ))
    }

    pub fn profiles(&self) -> Vec<ProfileInfo> {
        self.registry.list()
    }

    pub fn profile(&self, id: &str) -> Result<Arc<RealityProfile>> {
        self.registry.get(id)
    }

    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.registry
    }

    pub fn default_metric(&self) -> &str {
        self.evaluator.default_metric()
    }

    /// Run a batch to completion and return its persisted report.
    pub async fn run_batch(&self, request: BatchRequest) -> Result<BatchReport> {
        self.executor.execute(request).await
    }

    /// Start a batch in the background.
    pub async fn submit_batch(&self, request: BatchRequest) -> Result<JobStatus> {
        self.jobs.submit(request).await
    }

    /// Stored report. `BatchNotReady` while its job is still in flight.
    pub async fn report(&self, batch_id: &str) -> Result<BatchReport> {
        match self.reports.get_report(batch_id).await {
            Err(GapError::UnknownBatch(id)) => match self.reports.get_job(&id).await? {
                Some(job) if !job.state.is_terminal() => Err(GapError::BatchNotReady {
                    batch_id: id,
                    state: job.state.to_string(),
                }),
                _ => Err(GapError::UnknownBatch(id)),
            },
            other => other,
        }
    }

    pub async fn job_status(&self, batch_id: &str) -> Result<JobStatus> {
        self.jobs.status(batch_id).await
    }

    pub async fn cancel(&self, batch_id: &str) -> Result<JobStatus> {
        self.jobs.cancel(batch_id).await
    }

    /// Block until a submitted job is terminal.
    pub async fn wait(&self, batch_id: &str) -> Result<JobStatus> {
        self.jobs.wait(batch_id).await
    }

    /// Re-run the failed episodes of `batch_id` under a new batch id.
    pub async fn retry(&self, batch_id: &str) -> Result<BatchReport> {
        if let Some(job) = self.reports.get_job(batch_id).await? {
            if !job.state.is_terminal() {
                return Err(GapError::BatchNotReady {
                    batch_id: batch_id.to_string(),
                    state: job.state.to_string(),
                });
            }
        }
        self.executor.rerun_failed(batch_id).await
    }

    pub async fn evaluate(&self, batch_id: &str, metric: Option<&str>) -> Result<BatchEval> {
        self.evaluator.evaluate(batch_id, metric).await
    }

    /// Stored batch ids, oldest first.
    pub async fn list_batches(&self) -> Result<Vec<String>> {
        self.reports.list_reports().await
    }

    /// Cancel running jobs and wait for them to persist their reports.
    pub async fn shutdown(&self) {
        let in_flight = self.jobs.active_count();
        if in_flight > 0 {
            info!(jobs = in_flight, "cancelling in-flight batch jobs");
        }
        self.jobs.cancel_all();
        while self.jobs.active_count() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}
