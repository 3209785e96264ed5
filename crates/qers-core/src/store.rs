//! Typed access to the report store.
//!
//! Wraps any [`ReportStore`] backend and speaks `BatchReport`, `BatchEval`
//! and `JobStatus`. Misses on batch reports surface as
//! [`GapError::UnknownBatch`].

use std::sync::Arc;

use qers_state::{MemoryReportStore, ReportKind, ReportStore, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{BatchEval, BatchReport, GapError, JobStatus, Result};

/// Cache key of an evaluation: `{batch_id}.{metric}`.
pub fn eval_key(batch_id: &str, metric: &str) -> String {
    format!("{batch_id}.{metric}")
}

/// Thin typed layer over a report store backend.
#[derive(Clone)]
pub struct Reports {
    store: Arc<dyn ReportStore>,
}

impl std::fmt::Debug for Reports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reports").finish_non_exhaustive()
    }
}

impl Reports {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    /// Fresh in-memory store.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryReportStore::new()))
    }

    async fn put<T: Serialize>(&self, kind: ReportKind, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.store.put(kind, key, value).await?;
        Ok(())
    }

    /// `Ok(None)` on a miss or on a key no backend could hold.
    async fn get_opt<T: DeserializeOwned>(&self, kind: ReportKind, key: &str) -> Result<Option<T>> {
        match self.store.get(kind, key).await {
            Ok(value) => Ok(Some(serde_json::from_value(value)?)),
            Err(StorageError::NotFound { .. }) | Err(StorageError::InvalidKey { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Publish a finalized report in one store call.
    pub async fn put_report(&self, report: &BatchReport) -> Result<()> {
        self.put(ReportKind::BatchReport, &report.batch_id, report).await
    }

    pub async fn get_report(&self, batch_id: &str) -> Result<BatchReport> {
        self.get_opt(ReportKind::BatchReport, batch_id)
            .await?
            .ok_or_else(|| GapError::UnknownBatch(batch_id.to_string()))
    }

    /// Batch ids, ascending (time order for generated ids).
    pub async fn list_reports(&self) -> Result<Vec<String>> {
        Ok(self.store.list_keys(ReportKind::BatchReport).await?)
    }

    pub async fn put_eval(&self, eval: &BatchEval) -> Result<()> {
        let key = eval_key(&eval.batch_id, &eval.performance_metric);
        self.put(ReportKind::BatchEval, &key, eval).await
    }

    pub async fn get_eval(&self, batch_id: &str, metric: &str) -> Result<Option<BatchEval>> {
        self.get_opt(ReportKind::BatchEval, &eval_key(batch_id, metric))
            .await
    }

    pub async fn put_job(&self, job: &JobStatus) -> Result<()> {
        self.put(ReportKind::JobStatus, &job.batch_id, job).await
    }

    pub async fn get_job(&self, batch_id: &str) -> Result<Option<JobStatus>> {
        self.get_opt(ReportKind::JobStatus, batch_id).await
    }
}
