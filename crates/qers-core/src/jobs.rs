//! Asynchronous batch jobs.
//!
//! `submit` validates up front, stores a `pending` record and drives the
//! batch on a background task: `pending -> running -> completed | failed |
//! cancelled`. The terminal state is written only after the report itself
//! has been persisted, so a terminal job always has a readable report.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info};

use crate::domain::{
    new_batch_id, BatchConfig, BatchRequest, GapError, JobState, JobStatus, RealityProfile, Result,
};
use crate::executor::{BatchExecutor, CancelHandle};
use crate::obs;
use crate::store::Reports;

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Tracks submitted batches and their cancel flags.
pub struct JobTracker {
    executor: Arc<BatchExecutor>,
    reports: Reports,
    active: Mutex<HashMap<String, CancelHandle>>,
}

impl JobTracker {
    pub fn new(executor: Arc<BatchExecutor>, reports: Reports) -> Self {
        Self {
            executor,
            reports,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Validate `request` and start it in the background.
    pub async fn submit(self: &Arc<Self>, request: BatchRequest) -> Result<JobStatus> {
        let (config, profiles) = self.executor.validate(&request)?;
        let batch_id = new_batch_id();

        let job = JobStatus::pending(&batch_id);
        self.reports.put_job(&job).await?;

        let cancel = CancelHandle::new();
        self.active_jobs()?.insert(batch_id.clone(), cancel.clone());
        info!(batch_id = %batch_id, "batch job submitted");

        let tracker = Arc::clone(self);
        let pending = job.clone();
        tokio::spawn(async move {
            tracker.drive(pending, config, profiles, cancel).await;
        });

        Ok(job)
    }

    async fn drive(
        &self,
        job: JobStatus,
        config: BatchConfig,
        profiles: Vec<Arc<RealityProfile>>,
        cancel: CancelHandle,
    ) {
        let batch_id = job.batch_id.clone();
        let mut current = job;

        if let Some(running) = current.transition(JobState::Running, None) {
            self.record(&current, &running).await;
            current = running;
        }

        let (next, message) = match self
            .executor
            .execute_validated(batch_id.clone(), config, profiles, cancel)
            .await
        {
            Ok(report) => (JobState::from(report.status), None),
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "batch job failed");
                (JobState::Failed, Some(e.to_string()))
            }
        };

        if let Some(done) = current.transition(next, message) {
            self.record(&current, &done).await;
        }
        if let Ok(mut active) = self.active_jobs() {
            active.remove(&batch_id);
        }
    }

    async fn record(&self, from: &JobStatus, to: &JobStatus) {
        obs::emit_job_transition(&to.batch_id, from.state.as_str(), to.state.as_str());
        if let Err(e) = self.reports.put_job(to).await {
            obs::emit_persist_error(&to.batch_id, &e);
        }
    }

    /// Job record for `batch_id`. Batches run synchronously have no record;
    /// their status is read off the report.
    pub async fn status(&self, batch_id: &str) -> Result<JobStatus> {
        if let Some(job) = self.reports.get_job(batch_id).await? {
            return Ok(job);
        }
        let report = self.reports.get_report(batch_id).await?;
        Ok(JobStatus {
            batch_id: report.batch_id,
            state: JobState::from(report.status),
            message: None,
            created_at: report.created_at,
            updated_at: report.created_at,
        })
    }

    /// Request cancellation. Idempotent; a finished job is returned as is.
    pub async fn cancel(&self, batch_id: &str) -> Result<JobStatus> {
        let handle = self.active_jobs()?.get(batch_id).cloned();
        if let Some(handle) = handle {
            if !handle.is_cancelled() {
                info!(batch_id = %batch_id, "batch job cancel requested");
            }
            handle.cancel();
        }
        self.status(batch_id).await
    }

    /// Cancel every job still in flight.
    pub fn cancel_all(&self) {
        if let Ok(active) = self.active_jobs() {
            for handle in active.values() {
                handle.cancel();
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_jobs().map(|a| a.len()).unwrap_or(0)
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait(&self, batch_id: &str) -> Result<JobStatus> {
        loop {
            let status = self.status(batch_id).await?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    fn active_jobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CancelHandle>>> {
        self.active
            .lock()
            .map_err(|_| GapError::Config("job table lock poisoned".to_string()))
    }
}
