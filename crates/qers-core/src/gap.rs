//! Gap evaluator: pairwise transfer metrics over a finalized batch.
//!
//! For every ordered pair `(design, eval)` of distinct profiles that have at
//! least one completed episode, in report order:
//!
//! - `absolute_drop = perf(eval) - perf(design)`
//! - `relative_drop = absolute_drop / |perf(design)|`, null when `perf(design) == 0`
//! - L1 / L2 distance and cosine similarity of the nominal parameter vectors,
//!   null when the schemas differ or a profile is no longer registered
//!
//! `perf(p)` is the mean of the performance metric over completed episodes.
//! The metric is a key of the episode `metrics`, or one of the timing fields
//! (`avg_step_time_ms`, `total_time_s`) when no metric of that name exists.

use std::collections::BTreeSet;
use std::sync::Arc;

use qers_state::validate_key;
use tracing::instrument;

use crate::domain::{
    BatchEval, BatchReport, EpisodeResult, EvalSummary, GapError, GapWidth, PairwiseDrop,
    PerformanceDrop, ProfileSummary, RealityProfile, Result,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::registry::ProfileRegistry;
use crate::store::{eval_key, Reports};

/// Key set shared by every completed episode, or `None` if none completed.
pub fn consistent_metric_keys<'a>(
    batch_id: &str,
    episodes: impl IntoIterator<Item = &'a EpisodeResult>,
) -> Result<Option<BTreeSet<String>>> {
    let mut expected: Option<BTreeSet<String>> = None;
    for episode in episodes.into_iter().filter(|e| e.is_completed()) {
        let keys: BTreeSet<String> = episode.metrics.keys().cloned().collect();
        match &expected {
            None => expected = Some(keys),
            Some(exp) if *exp != keys => {
                return Err(GapError::InconsistentMetrics {
                    batch_id: batch_id.to_string(),
                    run_id: episode.run_id.clone(),
                    expected: exp.iter().cloned().collect(),
                    found: keys.into_iter().collect(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(expected)
}

/// Timing fields usable as a performance metric.
pub const TIMING_METRICS: [&str; 2] = ["avg_step_time_ms", "total_time_s"];

/// Value of `metric` for one episode; `metrics` entries shadow timing fields.
pub fn episode_value(episode: &EpisodeResult, metric: &str) -> Option<f64> {
    if let Some(v) = episode.metrics.get(metric) {
        return Some(*v);
    }
    match metric {
        "avg_step_time_ms" => Some(episode.timing.avg_step_time_ms),
        "total_time_s" => Some(episode.timing.total_time_s),
        _ => None,
    }
}

/// Mean of `metric` over the completed episodes of `summary`.
pub fn profile_performance(summary: &ProfileSummary, metric: &str) -> Option<f64> {
    let values: Vec<f64> = summary
        .completed_episodes()
        .filter_map(|e| episode_value(e, metric))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn performance_drop(metric: &str, design: Option<f64>, eval: Option<f64>) -> PerformanceDrop {
    let absolute_drop = match (design, eval) {
        (Some(d), Some(e)) => Some(e - d),
        _ => None,
    };
    let relative_drop = match (absolute_drop, design) {
        (Some(drop), Some(d)) if d != 0.0 => Some(drop / d.abs()),
        _ => None,
    };
    PerformanceDrop {
        metric_key: metric.to_string(),
        design_value: design,
        eval_value: eval,
        absolute_drop,
        relative_drop,
    }
}

/// Distances between nominal parameter vectors.
pub fn gap_width(design: Option<&RealityProfile>, eval: Option<&RealityProfile>) -> GapWidth {
    let (Some(a), Some(b)) = (design, eval) else {
        return GapWidth::UNDEFINED;
    };
    if !a.same_schema(b) {
        return GapWidth::UNDEFINED;
    }

    let va = a.nominal_vector();
    let vb = b.nominal_vector();

    let l1 = va.iter().zip(&vb).map(|(x, y)| (y - x).abs()).sum::<f64>();
    let l2 = va
        .iter()
        .zip(&vb)
        .map(|(x, y)| (y - x).powi(2))
        .sum::<f64>()
        .sqrt();

    let dot = va.iter().zip(&vb).map(|(x, y)| x * y).sum::<f64>();
    let na = va.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = vb.iter().map(|x| x * x).sum::<f64>().sqrt();
    let cosine = if na == 0.0 || nb == 0.0 {
        None
    } else {
        Some(dot / (na * nb))
    };

    GapWidth {
        l1_distance: Some(l1),
        l2_distance: Some(l2),
        cosine_similarity: cosine,
    }
}

/// Compute the evaluation of `report` without touching any store.
pub fn evaluate_report(
    report: &BatchReport,
    registry: &ProfileRegistry,
    metric: &str,
) -> Result<BatchEval> {
    let evaluated: Vec<&ProfileSummary> = report
        .per_profile
        .iter()
        .filter(|p| p.has_completed())
        .collect();

    if evaluated.len() < 2 {
        return Err(GapError::Evaluation(format!(
            "batch {} has {} profile(s) with completed episodes; at least 2 are required",
            report.batch_id,
            evaluated.len()
        )));
    }

    let keys = consistent_metric_keys(
        &report.batch_id,
        report.per_profile.iter().flat_map(|p| p.episodes.iter()),
    )?
    .unwrap_or_default();

    if !keys.contains(metric) && !TIMING_METRICS.contains(&metric) {
        let available: Vec<&str> = keys
            .iter()
            .map(String::as_str)
            .chain(TIMING_METRICS)
            .collect();
        return Err(GapError::Evaluation(format!(
            "metric {metric:?} is not reported by batch {}; available: {}",
            report.batch_id,
            available.join(", ")
        )));
    }

    let perf: Vec<Option<f64>> = evaluated
        .iter()
        .map(|p| profile_performance(p, metric))
        .collect();
    let profiles: Vec<Option<Arc<RealityProfile>>> = evaluated
        .iter()
        .map(|p| registry.get(&p.profile_id).ok())
        .collect();

    let mut pairwise_drops = Vec::with_capacity(evaluated.len() * (evaluated.len() - 1));
    for (d, design) in evaluated.iter().enumerate() {
        for (e, eval) in evaluated.iter().enumerate() {
            if d == e {
                continue;
            }
            pairwise_drops.push(PairwiseDrop {
                design_profile: design.profile_id.clone(),
                eval_profile: eval.profile_id.clone(),
                performance_drop: performance_drop(metric, perf[d], perf[e]),
                gap_width: gap_width(profiles[d].as_deref(), profiles[e].as_deref()),
            });
        }
    }

    let drops: Vec<f64> = pairwise_drops
        .iter()
        .filter_map(|p| p.performance_drop.absolute_drop)
        .map(f64::abs)
        .collect();
    let (mean_absolute_drop, max_absolute_drop) = if drops.is_empty() {
        (0.0, 0.0)
    } else {
        (
            drops.iter().sum::<f64>() / drops.len() as f64,
            drops.iter().copied().fold(0.0, f64::max),
        )
    };

    Ok(BatchEval {
        batch_id: report.batch_id.clone(),
        performance_metric: metric.to_string(),
        summary: EvalSummary {
            profiles_evaluated: evaluated.len(),
            pairwise_comparisons: pairwise_drops.len(),
            mean_absolute_drop,
            max_absolute_drop,
        },
        pairwise_drops,
    })
}

/// Loads reports, evaluates them and caches the result per `(batch, metric)`.
#[derive(Debug, Clone)]
pub struct GapEvaluator {
    reports: Reports,
    registry: Arc<ProfileRegistry>,
    default_metric: String,
}

impl GapEvaluator {
    pub fn new(
        reports: Reports,
        registry: Arc<ProfileRegistry>,
        default_metric: impl Into<String>,
    ) -> Self {
        Self {
            reports,
            registry,
            default_metric: default_metric.into(),
        }
    }

    pub fn default_metric(&self) -> &str {
        &self.default_metric
    }

    /// Evaluate `batch_id` under `metric` (or the configured default).
    ///
    /// A cached evaluation is returned unchanged.
    #[instrument(skip(self))]
    pub async fn evaluate(&self, batch_id: &str, metric: Option<&str>) -> Result<BatchEval> {
        let metric = metric.unwrap_or(&self.default_metric);

        if validate_key(&eval_key(batch_id, metric)).is_err() {
            if validate_key(batch_id).is_err() {
                return Err(GapError::UnknownBatch(batch_id.to_string()));
            }
            return Err(GapError::Evaluation(format!(
                "invalid performance metric name {metric:?}"
            )));
        }

        if let Some(cached) = self.reports.get_eval(batch_id, metric).await? {
            obs::emit_eval_computed(
                batch_id,
                metric,
                cached.summary.pairwise_comparisons,
                true,
            );
            return Ok(cached);
        }

        let report = match self.reports.get_report(batch_id).await {
            Ok(report) => report,
            Err(GapError::UnknownBatch(id)) => {
                return Err(match self.reports.get_job(&id).await? {
                    Some(job) if !job.state.is_terminal() => GapError::BatchNotReady {
                        batch_id: id,
                        state: job.state.to_string(),
                    },
                    _ => GapError::UnknownBatch(id),
                });
            }
            Err(e) => return Err(e),
        };

        let eval = evaluate_report(&report, &self.registry, metric)?;
        self.reports.put_eval(&eval).await?;

        METRICS.inc_evaluations();
        obs::emit_eval_computed(batch_id, metric, eval.summary.pairwise_comparisons, false);
        Ok(eval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ParamDistribution, RealityProfile};
    use std::collections::BTreeMap;

    fn profile(id: &str, values: &[(&str, f64)]) -> RealityProfile {
        RealityProfile {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            parameters: values
                .iter()
                .map(|(k, v)| (k.to_string(), ParamDistribution::Fixed { value: *v }))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn completed(index: u32, reward: f64, step_ms: f64) -> EpisodeResult {
        EpisodeResult {
            run_id: format!("batch_t__p__ep{index}"),
            episode_index: index,
            seed: index as u64,
            status: crate::domain::EpisodeStatus::Completed,
            metrics: [("total_reward".to_string(), reward)].into_iter().collect(),
            dr_realization: Default::default(),
            timing: crate::domain::EpisodeTiming {
                avg_step_time_ms: step_ms,
                total_time_s: step_ms / 10.0,
            },
            failure: None,
        }
    }

    #[test]
    fn performance_falls_back_to_timing_fields() {
        let summary = ProfileSummary::from_episodes(
            "p",
            vec![completed(0, -1.0, 0.2), completed(1, -3.0, 0.4)],
        );
        assert_eq!(profile_performance(&summary, "total_reward"), Some(-2.0));
        let step = profile_performance(&summary, "avg_step_time_ms").unwrap();
        assert!((step - 0.3).abs() < 1e-12);
        let total = profile_performance(&summary, "total_time_s").unwrap();
        assert!((total - 0.03).abs() < 1e-12);
        assert_eq!(profile_performance(&summary, "lap_time"), None);
    }

    #[test]
    fn metrics_entry_shadows_timing_field() {
        let mut ep = completed(0, 1.0, 0.5);
        ep.metrics.insert("avg_step_time_ms".to_string(), 9.0);
        assert_eq!(episode_value(&ep, "avg_step_time_ms"), Some(9.0));
    }

    #[test]
    fn drop_and_relative_drop() {
        let d = performance_drop("total_reward", Some(-2.0), Some(-3.0));
        assert_eq!(d.absolute_drop, Some(-1.0));
        assert_eq!(d.relative_drop, Some(-0.5));
    }

    #[test]
    fn relative_drop_null_when_design_is_zero() {
        let d = performance_drop("m", Some(0.0), Some(1.0));
        assert_eq!(d.absolute_drop, Some(1.0));
        assert_eq!(d.relative_drop, None);
    }

    #[test]
    fn absolute_drop_null_without_design_value() {
        let d = performance_drop("m", None, Some(1.0));
        assert_eq!(d.absolute_drop, None);
        assert_eq!(d.relative_drop, None);
    }

    #[test]
    fn gap_width_known_vectors() {
        let a = profile("a", &[("x", 0.0), ("y", 3.0)]);
        let b = profile("b", &[("x", 4.0), ("y", 0.0)]);
        let g = gap_width(Some(&a), Some(&b));
        assert_eq!(g.l1_distance, Some(7.0));
        assert_eq!(g.l2_distance, Some(5.0));
        assert_eq!(g.cosine_similarity, Some(0.0));
    }

    #[test]
    fn gap_width_null_for_schema_mismatch_or_missing_profile() {
        let a = profile("a", &[("x", 1.0)]);
        let b = profile("b", &[("y", 1.0)]);
        assert_eq!(gap_width(Some(&a), Some(&b)), GapWidth::UNDEFINED);
        assert_eq!(gap_width(Some(&a), None), GapWidth::UNDEFINED);
    }

    #[test]
    fn cosine_null_for_zero_vector() {
        let a = profile("a", &[("x", 0.0), ("y", 0.0)]);
        let b = profile("b", &[("x", 1.0), ("y", 1.0)]);
        let g = gap_width(Some(&a), Some(&b));
        assert_eq!(g.cosine_similarity, None);
        assert!(g.l2_distance.is_some());
    }

    #[test]
    fn identical_profiles_have_zero_distance() {
        let a = profile("a", &[("x", 2.0)]);
        let g = gap_width(Some(&a), Some(&a.clone()));
        assert_eq!(g.l2_distance, Some(0.0));
        assert_eq!(g.cosine_similarity, Some(1.0));
    }
}
