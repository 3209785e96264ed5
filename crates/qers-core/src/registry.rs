//! Profile registry.
//!
//! Built once at process start from the builtin profiles and/or a TOML file,
//! read-only afterwards. Shared as `Arc<ProfileRegistry>`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{GapError, ParamDistribution, ProfileInfo, RealityProfile, Result};

/// Named reality profiles, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    order: Vec<Arc<RealityProfile>>,
    by_id: HashMap<String, Arc<RealityProfile>>,
}

#[derive(Debug, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: Vec<RealityProfile>,
}

impl ProfileRegistry {
    /// Validate and index `profiles`. Duplicate ids are rejected.
    pub fn new(profiles: Vec<RealityProfile>) -> Result<Self> {
        let mut registry = Self::default();
        for profile in profiles {
            profile.validate()?;
            if registry.by_id.contains_key(&profile.id) {
                return Err(GapError::InvalidProfile {
                    profile_id: profile.id.clone(),
                    reason: "duplicate profile id".to_string(),
                });
            }
            let profile = Arc::new(profile);
            registry
                .by_id
                .insert(profile.id.clone(), Arc::clone(&profile));
            registry.order.push(profile);
        }
        debug!(profiles = registry.order.len(), "profile registry built");
        Ok(registry)
    }

    /// `default`, `noisy`, `slippery_warehouse`, `noisy_outdoor`.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for profile in builtin_profiles() {
            let profile = Arc::new(profile);
            registry
                .by_id
                .insert(profile.id.clone(), Arc::clone(&profile));
            registry.order.push(profile);
        }
        registry
    }

    /// Parse `[[profiles]]` tables from TOML text.
    pub fn parse_toml(text: &str) -> Result<Vec<RealityProfile>> {
        let file: ProfilesFile = toml::from_str(text)
            .map_err(|e| GapError::Config(format!("invalid profiles file: {e}")))?;
        Ok(file.profiles)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::new(Self::parse_toml(text)?)
    }

    /// Registry from the builtins, the profiles in `path`, or both.
    ///
    /// A file profile with the id of a builtin replaces the builtin.
    pub fn load(path: Option<&Path>, include_builtin: bool) -> Result<Self> {
        let mut profiles: Vec<RealityProfile> = if include_builtin {
            builtin_profiles()
        } else {
            Vec::new()
        };

        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|e| {
                GapError::Config(format!("cannot read profiles file {}: {e}", path.display()))
            })?;
            let from_file = Self::parse_toml(&text)?;
            let mut seen = std::collections::HashSet::new();
            for profile in from_file {
                if !seen.insert(profile.id.clone()) {
                    return Err(GapError::InvalidProfile {
                        profile_id: profile.id,
                        reason: "duplicate profile id".to_string(),
                    });
                }
                if let Some(slot) = profiles.iter_mut().find(|p| p.id == profile.id) {
                    info!(profile_id = %profile.id, "profiles file overrides builtin profile");
                    *slot = profile;
                } else {
                    profiles.push(profile);
                }
            }
        }

        Self::new(profiles)
    }

    pub fn get(&self, id: &str) -> Result<Arc<RealityProfile>> {
        self.by_id
            .get(id)
            .cloned()
            .ok_or_else(|| GapError::UnknownProfile(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Look up `ids` in the caller's order. The first unknown id fails.
    pub fn resolve<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Arc<RealityProfile>>> {
        ids.iter().map(|id| self.get(id.as_ref())).collect()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.order.iter().map(|p| p.id.clone()).collect()
    }

    pub fn list(&self) -> Vec<ProfileInfo> {
        self.order.iter().map(|p| p.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn uniform(low: f64, high: f64) -> ParamDistribution {
    ParamDistribution::Uniform { low, high }
}

fn int_range(low: i64, high: i64) -> ParamDistribution {
    ParamDistribution::IntRange { low, high }
}

fn profile(
    id: &str,
    name: &str,
    description: &str,
    overrides: &[(&str, ParamDistribution)],
) -> RealityProfile {
    let mut parameters: BTreeMap<String, ParamDistribution> = [
        ("mass_scale", uniform(0.95, 1.05)),
        ("friction", uniform(0.45, 0.55)),
        ("restitution", uniform(0.0, 0.05)),
        ("gravity_z", uniform(-9.91, -9.71)),
        ("noise_scale", uniform(0.005, 0.02)),
        ("latency_steps", int_range(0, 2)),
        ("camera_degrade", ParamDistribution::Bernoulli { p: 0.0 }),
        ("action_delay", int_range(0, 0)),
        ("action_noise_scale", ParamDistribution::Fixed { value: 0.0 }),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    for (name, dist) in overrides {
        parameters.insert(name.to_string(), dist.clone());
    }

    RealityProfile {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// Builtin profiles. All share one parameter schema.
pub fn builtin_profiles() -> Vec<RealityProfile> {
    vec![
        profile(
            "default",
            "Default",
            "Nominal lab conditions with light sensor noise",
            &[],
        ),
        profile(
            "noisy",
            "Noisy sensors",
            "Heavier sensor and actuation noise, occasional camera dropouts",
            &[
                ("noise_scale", uniform(0.02, 0.08)),
                ("latency_steps", int_range(1, 4)),
                ("camera_degrade", ParamDistribution::Bernoulli { p: 0.2 }),
                ("action_delay", int_range(0, 1)),
                ("action_noise_scale", uniform(0.01, 0.05)),
            ],
        ),
        profile(
            "slippery_warehouse",
            "Slippery warehouse",
            "Low friction floor and ~50 ms control latency",
            &[
                ("friction", uniform(0.1, 0.2)),
                ("restitution", uniform(0.0, 0.1)),
                ("latency_steps", int_range(4, 6)),
            ],
        ),
        profile(
            "noisy_outdoor",
            "Noisy outdoor",
            "Uneven payloads, perturbed gravity and degraded cameras",
            &[
                ("mass_scale", uniform(0.9, 1.1)),
                ("friction", uniform(0.6, 0.9)),
                (
                    "gravity_z",
                    ParamDistribution::Normal {
                        mean: -9.81,
                        std: 0.05,
                    },
                ),
                ("noise_scale", uniform(0.03, 0.1)),
                ("latency_steps", int_range(1, 3)),
                ("camera_degrade", ParamDistribution::Bernoulli { p: 0.3 }),
                ("action_noise_scale", uniform(0.02, 0.06)),
            ],
        ),
    ]
}
