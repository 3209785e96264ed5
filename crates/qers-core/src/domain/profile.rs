//! Reality profiles: named sets of domain-randomization distributions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::{GapError, Result};

/// Distribution of one randomized parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamDistribution {
    Fixed { value: f64 },
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std: f64 },
    /// Inclusive on both ends.
    IntRange { low: i64, high: i64 },
    /// Sampled as `1.0` with probability `p`, else `0.0`.
    Bernoulli { p: f64 },
}

impl ParamDistribution {
    /// Representative value used in gap-width parameter vectors.
    pub fn nominal(&self) -> f64 {
        match *self {
            ParamDistribution::Fixed { value } => value,
            ParamDistribution::Uniform { low, high } => (low + high) / 2.0,
            ParamDistribution::Normal { mean, .. } => mean,
            ParamDistribution::IntRange { low, high } => (low as f64 + high as f64) / 2.0,
            ParamDistribution::Bernoulli { p } => p,
        }
    }

    /// Check bounds; returns a human-readable reason on failure.
    pub fn check(&self) -> std::result::Result<(), String> {
        match *self {
            ParamDistribution::Fixed { value } if !value.is_finite() => {
                Err(format!("fixed value {value} is not finite"))
            }
            ParamDistribution::Uniform { low, high } => {
                if !low.is_finite() || !high.is_finite() {
                    Err("uniform bounds must be finite".to_string())
                } else if low > high {
                    Err(format!("uniform low {low} > high {high}"))
                } else {
                    Ok(())
                }
            }
            ParamDistribution::Normal { mean, std } => {
                if !mean.is_finite() || !std.is_finite() {
                    Err("normal mean and std must be finite".to_string())
                } else if std < 0.0 {
                    Err(format!("normal std {std} is negative"))
                } else {
                    Ok(())
                }
            }
            ParamDistribution::IntRange { low, high } if low > high => {
                Err(format!("int_range low {low} > high {high}"))
            }
            ParamDistribution::Bernoulli { p } if !(0.0..=1.0).contains(&p) => {
                Err(format!("bernoulli p {p} outside [0, 1]"))
            }
            _ => Ok(()),
        }
    }
}

/// A named "reality": one distribution per randomized parameter.
///
/// `parameters` is a sorted map, so iteration order is the vector order used
/// by gap-width metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealityProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: BTreeMap<String, ParamDistribution>,
}

/// Listing entry returned by `GET /reality-profiles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl RealityProfile {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| GapError::InvalidProfile {
            profile_id: self.id.clone(),
            reason,
        };

        if self.id.is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        {
            return Err(invalid(
                "id may only contain [A-Za-z0-9_-]".to_string(),
            ));
        }
        for (name, dist) in &self.parameters {
            dist.check()
                .map_err(|reason| invalid(format!("parameter {name}: {reason}")))?;
        }
        Ok(())
    }

    /// Parameter names in vector order.
    pub fn schema(&self) -> Vec<&str> {
        self.parameters.keys().map(String::as_str).collect()
    }

    /// Nominal values in vector order.
    pub fn nominal_vector(&self) -> Vec<f64> {
        self.parameters.values().map(ParamDistribution::nominal).collect()
    }

    pub fn same_schema(&self, other: &RealityProfile) -> bool {
        self.parameters.keys().eq(other.parameters.keys())
    }

    pub fn info(&self) -> ProfileInfo {
        ProfileInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}
