//! Domain-randomization sampler.
//!
//! Each episode owns one `ChaCha8Rng` seeded from its derived seed. The
//! realization is drawn first, in sorted parameter order, so the prefix of
//! the stream (and therefore the realization) depends only on
//! `(profile, seed)`. The runner keeps drawing from the same stream for
//! sensor and actuation noise.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::domain::{DrRealization, EpisodeError, ParamDistribution, RealityProfile};

/// Fresh episode-scoped random stream.
pub fn episode_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Draw one value from `dist`.
pub fn sample_param<R: Rng + ?Sized>(
    name: &str,
    dist: &ParamDistribution,
    rng: &mut R,
) -> Result<f64, EpisodeError> {
    let value = match *dist {
        ParamDistribution::Fixed { value } => value,
        ParamDistribution::Uniform { low, high } => {
            if low >= high {
                low
            } else {
                rng.gen_range(low..=high)
            }
        }
        ParamDistribution::Normal { mean, std } => {
            let normal = Normal::new(mean, std).map_err(|e| EpisodeError::InvalidParameter {
                name: name.to_string(),
                value: std,
                reason: e.to_string(),
            })?;
            normal.sample(rng)
        }
        ParamDistribution::IntRange { low, high } => {
            if low >= high {
                low as f64
            } else {
                rng.gen_range(low..=high) as f64
            }
        }
        ParamDistribution::Bernoulli { p } => {
            if rng.gen::<f64>() < p {
                1.0
            } else {
                0.0
            }
        }
    };

    if !value.is_finite() {
        return Err(EpisodeError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: "sampled value is not finite".to_string(),
        });
    }
    Ok(value)
}

/// Draw a full realization for `profile` from `rng`.
pub fn sample_realization_with<R: Rng + ?Sized>(
    profile: &RealityProfile,
    rng: &mut R,
) -> Result<DrRealization, EpisodeError> {
    profile
        .parameters
        .iter()
        .map(|(name, dist)| Ok((name.clone(), sample_param(name, dist, rng)?)))
        .collect()
}

/// Realization an episode with `seed` draws, without running it.
///
/// Used to annotate failed and cancelled episodes for auditing.
pub fn sample_realization(
    profile: &RealityProfile,
    seed: u64,
) -> Result<DrRealization, EpisodeError> {
    sample_realization_with(profile, &mut episode_rng(seed))
}
