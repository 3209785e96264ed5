//! Structured lifecycle events for batches, episodes, evaluations and jobs.
//!
//! - `batch_span`: span tagging everything inside with `batch_id`
//! - `emit_*`: one `info!` record per lifecycle transition
//!
//! Filter with `RUST_LOG`; pass `--json` to the binaries for JSON records.

use tracing::info;

/// Span tagging every event of one batch with `batch_id`. Attach it with
/// `Instrument::instrument` so it survives `.await` points.
pub fn batch_span(batch_id: &str) -> tracing::Span {
    tracing::info_span!("qers.batch", batch_id = %batch_id)
}

pub fn emit_batch_started(batch_id: &str, profiles: usize, episodes_per_profile: u32) {
    info!(
        event = "batch.started",
        batch_id = %batch_id,
        profiles = profiles,
        episodes_per_profile = episodes_per_profile,
    );
}

/// Emit event: one episode reached a terminal state.
pub fn emit_episode_finished(run_id: &str, completed: bool, cause: Option<&str>, elapsed_ms: f64) {
    info!(
        event = "episode.finished",
        run_id = %run_id,
        completed = completed,
        cause = cause.unwrap_or("-"),
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: batch finalized and persisted.
pub fn emit_batch_finished(
    batch_id: &str,
    status: &str,
    completed: usize,
    failed: usize,
    total_time_s: f64,
) {
    info!(
        event = "batch.finished",
        batch_id = %batch_id,
        status = %status,
        completed = completed,
        failed = failed,
        total_time_s = total_time_s,
    );
}

pub fn emit_eval_computed(batch_id: &str, metric: &str, comparisons: usize, cached: bool) {
    info!(
        event = "eval.computed",
        batch_id = %batch_id,
        metric = %metric,
        comparisons = comparisons,
        cached = cached,
    );
}

pub fn emit_job_transition(batch_id: &str, from: &str, to: &str) {
    info!(event = "job.transition", batch_id = %batch_id, from = %from, to = %to);
}

/// Emit event: a batch could not be persisted (warning level).
pub fn emit_persist_error(batch_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "batch.persist_error", batch_id = %batch_id, error = %error);
}
