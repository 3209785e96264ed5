//! Executor behaviour under failing, slow, panicking and flaky runners.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use qers_core::dr::sample_realization;
use qers_core::{
    BatchExecutor, BatchRequest, BatchStatus, EpisodeContext, EpisodeError, EpisodeOutput,
    EpisodeRunner, EpisodeTiming, ExecutorConfig, FailureCause, GapError, GapEvaluator,
    MetricMap, PlanarArm, ProfileRegistry, RealityProfile, Reports, SimEpisodeRunner,
};

fn output(profile: &RealityProfile, ctx: &EpisodeContext, reward: f64) -> EpisodeOutput {
    let mut metrics = MetricMap::new();
    metrics.insert("total_reward".to_string(), reward);
    EpisodeOutput {
        metrics,
        dr_realization: sample_realization(profile, ctx.seed).unwrap(),
        timing: EpisodeTiming {
            avg_step_time_ms: 0.1,
            total_time_s: 0.1 * ctx.steps as f64 / 1000.0,
        },
    }
}

fn executor(runner: Arc<dyn EpisodeRunner>, config: ExecutorConfig) -> (BatchExecutor, Reports) {
    let reports = Reports::memory();
    let ex = BatchExecutor::new(
        Arc::new(ProfileRegistry::builtin()),
        runner,
        reports.clone(),
        config,
    );
    (ex, reports)
}

fn request() -> BatchRequest {
    BatchRequest::default()
        .with_profiles(["default", "noisy"])
        .with_steps(10)
        .with_episodes(2)
}

/// Fails every episode of the listed profiles.
struct FailFor(&'static [&'static str]);

impl EpisodeRunner for FailFor {
    fn run(
        &self,
        profile: &RealityProfile,
        ctx: &EpisodeContext,
    ) -> Result<EpisodeOutput, EpisodeError> {
        if self.0.contains(&profile.id.as_str()) {
            return Err(EpisodeError::Physics {
                step: 3,
                message: "solver diverged".to_string(),
            });
        }
        Ok(output(profile, ctx, -1.0))
    }
}

#[tokio::test]
async fn test_failed_episodes_do_not_abort_batch() {
    let (ex, _) = executor(Arc::new(FailFor(&["noisy"])), ExecutorConfig::default());
    let report = ex.execute(request()).await.unwrap();

    assert_eq!(report.status, BatchStatus::Completed);
    let noisy = report.profile("noisy").unwrap();
    assert_eq!(noisy.summary.failed, 2);
    assert_eq!(noisy.summary.completed, 0);
    for ep in &noisy.episodes {
        assert_eq!(ep.failure_cause(), Some(FailureCause::Error));
        assert!(ep.metrics.is_empty());
        assert!(!ep.dr_realization.is_empty());
    }
    assert_eq!(report.cross_profile.num_profiles, 2);
    assert_eq!(report.cross_profile.step_time_std_ms, 0.0);
}

#[tokio::test]
async fn test_all_failed_batch_is_persisted_as_failed() {
    let (ex, reports) = executor(
        Arc::new(FailFor(&["default", "noisy"])),
        ExecutorConfig::default(),
    );
    let report = ex.execute(request()).await.unwrap();
    assert_eq!(report.status, BatchStatus::Failed);
    assert_eq!(reports.get_report(&report.batch_id).await.unwrap(), report);

    let eval = GapEvaluator::new(reports, Arc::new(ProfileRegistry::builtin()), "total_reward");
    let err = eval.evaluate(&report.batch_id, None).await.unwrap_err();
    assert!(matches!(err, GapError::Evaluation(_)));
}

struct Slow(Duration);

impl EpisodeRunner for Slow {
    fn run(
        &self,
        profile: &RealityProfile,
        ctx: &EpisodeContext,
    ) -> Result<EpisodeOutput, EpisodeError> {
        std::thread::sleep(self.0);
        Ok(output(profile, ctx, -1.0))
    }
}

#[tokio::test]
async fn test_episode_timeout_marks_failed() {
    let (ex, _) = executor(
        Arc::new(Slow(Duration::from_millis(300))),
        ExecutorConfig {
            max_workers: 4,
            episode_timeout: Some(Duration::from_millis(30)),
            ..Default::default()
        },
    );
    let report = ex
        .execute(BatchRequest::default().with_profiles(["default"]).with_steps(5))
        .await
        .unwrap();

    assert_eq!(report.status, BatchStatus::Failed);
    let ep = &report.per_profile[0].episodes[0];
    assert_eq!(ep.failure_cause(), Some(FailureCause::Timeout));
    assert_eq!(
        ep.dr_realization,
        sample_realization(&ProfileRegistry::builtin().get("default").unwrap(), ep.seed).unwrap()
    );
}

struct Counting {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl EpisodeRunner for Counting {
    fn run(
        &self,
        profile: &RealityProfile,
        ctx: &EpisodeContext,
    ) -> Result<EpisodeOutput, EpisodeError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(15));
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(output(profile, ctx, -1.0))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_bound_is_respected() {
    let runner = Arc::new(Counting {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let (ex, _) = executor(
        runner.clone(),
        ExecutorConfig {
            max_workers: 2,
            ..Default::default()
        },
    );
    let report = ex
        .execute(
            BatchRequest::default()
                .with_profiles(["default", "noisy", "noisy_outdoor"])
                .with_episodes(4),
        )
        .await
        .unwrap();

    assert_eq!(report.episode_counts(), (12, 0));
    let peak = runner.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency {peak}");
}

struct Panics;

impl EpisodeRunner for Panics {
    fn run(&self, _: &RealityProfile, ctx: &EpisodeContext) -> Result<EpisodeOutput, EpisodeError> {
        if ctx.episode_index == 0 {
            panic!("collaborator crashed");
        }
        Err(EpisodeError::Panicked("unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_runner_panic_becomes_failed_episode() {
    let (ex, _) = executor(Arc::new(Panics), ExecutorConfig::default());
    let report = ex
        .execute(BatchRequest::default().with_profiles(["default"]).with_steps(5))
        .await
        .unwrap();
    let ep = &report.per_profile[0].episodes[0];
    assert_eq!(ep.failure_cause(), Some(FailureCause::Error));
    assert!(ep.failure.as_ref().unwrap().message.contains("panicked"));
}

/// Reports an extra metric for one profile.
struct Inconsistent;

impl EpisodeRunner for Inconsistent {
    fn run(
        &self,
        profile: &RealityProfile,
        ctx: &EpisodeContext,
    ) -> Result<EpisodeOutput, EpisodeError> {
        let mut out = output(profile, ctx, -1.0);
        if profile.id == "noisy" {
            out.metrics.insert("bonus".to_string(), 1.0);
        }
        Ok(out)
    }
}

#[tokio::test]
async fn test_inconsistent_metric_keys_are_fatal() {
    let (ex, reports) = executor(Arc::new(Inconsistent), ExecutorConfig::default());
    let err = ex.execute(request()).await.unwrap_err();
    match err {
        GapError::InconsistentMetrics { expected, found, .. } => {
            assert_eq!(expected, vec!["total_reward"]);
            assert_eq!(found, vec!["bonus", "total_reward"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(reports.list_reports().await.unwrap().is_empty());
}

/// Fails episode 1 of every profile the first time it is seen.
struct FlakyOnce {
    inner: SimEpisodeRunner<PlanarArm>,
    seen: Mutex<HashSet<(String, u32)>>,
}

impl EpisodeRunner for FlakyOnce {
    fn run(
        &self,
        profile: &RealityProfile,
        ctx: &EpisodeContext,
    ) -> Result<EpisodeOutput, EpisodeError> {
        let first = self
            .seen
            .lock()
            .unwrap()
            .insert((profile.id.clone(), ctx.episode_index));
        if first && ctx.episode_index == 1 {
            return Err(EpisodeError::Physics {
                step: 0,
                message: "transient".to_string(),
            });
        }
        self.inner.run(profile, ctx)
    }
}

#[tokio::test]
async fn test_rerun_failed_reproduces_realizations() {
    let runner = Arc::new(FlakyOnce {
        inner: SimEpisodeRunner::new(PlanarArm),
        seen: Mutex::new(HashSet::new()),
    });
    let (ex, reports) = executor(runner, ExecutorConfig::default());
    let original = ex.execute(request()).await.unwrap();
    assert_eq!(original.episode_counts(), (2, 2));

    let retried = ex.rerun_failed(&original.batch_id).await.unwrap();
    assert_ne!(retried.batch_id, original.batch_id);
    assert_eq!(retried.retry_of.as_deref(), Some(original.batch_id.as_str()));
    assert_eq!(retried.status, BatchStatus::Completed);
    assert_eq!(retried.episode_counts(), (4, 0));
    assert_eq!(retried.config_digest, original.config_digest);

    for (old, new) in original.per_profile.iter().zip(&retried.per_profile) {
        for (a, b) in old.episodes.iter().zip(&new.episodes) {
            assert_eq!(a.episode_index, b.episode_index);
            assert_eq!(a.seed, b.seed);
            assert_eq!(a.dr_realization, b.dr_realization);
            assert!(b.run_id.starts_with(&retried.batch_id));
        }
    }

    let stored = reports.get_report(&original.batch_id).await.unwrap();
    assert_eq!(stored, original);

    let err = ex.rerun_failed(&retried.batch_id).await.unwrap_err();
    assert!(matches!(err, GapError::BatchConfig(_)));
}

/// Emits a NaN reward for episode 0 and an infinite step time for episode 1
/// of `noisy`.
struct NonFinite;

impl EpisodeRunner for NonFinite {
    fn run(
        &self,
        profile: &RealityProfile,
        ctx: &EpisodeContext,
    ) -> Result<EpisodeOutput, EpisodeError> {
        let mut out = output(profile, ctx, -1.0);
        if ctx.episode_index == 0 {
            out.metrics.insert("total_reward".to_string(), f64::NAN);
        } else if profile.id == "noisy" {
            out.timing.avg_step_time_ms = f64::INFINITY;
        }
        Ok(out)
    }
}

#[tokio::test]
async fn test_non_finite_output_fails_episode_and_report_reads_back() {
    let (ex, reports) = executor(Arc::new(NonFinite), ExecutorConfig::default());
    let report = ex.execute(request()).await.unwrap();

    assert_eq!(report.status, BatchStatus::Completed);
    let default = report.profile("default").unwrap();
    assert_eq!((default.summary.completed, default.summary.failed), (1, 1));
    let ep0 = &default.episodes[0];
    assert_eq!(ep0.failure_cause(), Some(FailureCause::Error));
    assert!(ep0.failure.as_ref().unwrap().message.contains("metrics.total_reward"));
    assert!(ep0.metrics.is_empty());

    let noisy = report.profile("noisy").unwrap();
    assert_eq!(noisy.summary.failed, 2);
    assert!(noisy.episodes[1]
        .failure
        .as_ref()
        .unwrap()
        .message
        .contains("timing.avg_step_time_ms"));

    assert_eq!(reports.get_report(&report.batch_id).await.unwrap(), report);
    let eval = GapEvaluator::new(reports, Arc::new(ProfileRegistry::builtin()), "total_reward");
    let err = eval.evaluate(&report.batch_id, None).await.unwrap_err();
    assert!(matches!(err, GapError::Evaluation(_)));
}

#[test]
fn test_check_finite_names_field() {
    let out = EpisodeOutput {
        metrics: [("total_reward".to_string(), f64::NEG_INFINITY)]
            .into_iter()
            .collect(),
        dr_realization: Default::default(),
        timing: EpisodeTiming::default(),
    };
    let err = out.check_finite().unwrap_err();
    assert!(matches!(err, EpisodeError::NonFinite { ref field, .. } if field == "metrics.total_reward"));
}
