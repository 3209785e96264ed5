//! Pairwise transfer-gap results.

use serde::{Deserialize, Serialize};

/// Performance metric used when none is configured.
pub const DEFAULT_PERFORMANCE_METRIC: &str = "total_reward";

/// Change of the performance metric from design to eval profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceDrop {
    pub metric_key: String,
    /// `perf(design)`; `None` when the design profile has no completed episode.
    pub design_value: Option<f64>,
    pub eval_value: Option<f64>,
    /// `perf(eval) - perf(design)`.
    pub absolute_drop: Option<f64>,
    /// `absolute_drop / |perf(design)|`; `None` when `perf(design) == 0`.
    pub relative_drop: Option<f64>,
}

/// Distance between the two profiles' nominal parameter vectors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapWidth {
    pub l1_distance: Option<f64>,
    pub l2_distance: Option<f64>,
    pub cosine_similarity: Option<f64>,
}

impl GapWidth {
    pub const UNDEFINED: GapWidth = GapWidth {
        l1_distance: None,
        l2_distance: None,
        cosine_similarity: None,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseDrop {
    pub design_profile: String,
    pub eval_profile: String,
    pub performance_drop: PerformanceDrop,
    pub gap_width: GapWidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub profiles_evaluated: usize,
    pub pairwise_comparisons: usize,
    /// Mean of `|absolute_drop|` over non-null entries, `0.0` when none.
    pub mean_absolute_drop: f64,
    pub max_absolute_drop: f64,
}

/// Derived entirely from one `BatchReport`; cached per `(batch_id, metric)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEval {
    pub batch_id: String,
    pub performance_metric: String,
    pub pairwise_drops: Vec<PairwiseDrop>,
    pub summary: EvalSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_fields_serialize_as_json_null() {
        let drop = PairwiseDrop {
            design_profile: "default".to_string(),
            eval_profile: "noisy".to_string(),
            performance_drop: PerformanceDrop {
                metric_key: "total_reward".to_string(),
                design_value: Some(0.0),
                eval_value: Some(-1.0),
                absolute_drop: Some(-1.0),
                relative_drop: None,
            },
            gap_width: GapWidth::UNDEFINED,
        };
        let v = serde_json::to_value(&drop).unwrap();
        assert_eq!(v["performance_drop"]["relative_drop"], json!(null));
        assert_eq!(v["gap_width"]["l2_distance"], json!(null));
        assert_eq!(v["gap_width"]["cosine_similarity"], json!(null));
    }
}
