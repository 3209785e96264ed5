//! Episode runner and the default physics collaborator.
//!
//! [`EpisodeRunner`] is the seam the batch executor calls. It is synchronous
//! and CPU-bound; the executor runs it on the blocking pool.
//!
//! [`SimEpisodeRunner`] draws the DR realization, then rolls out a
//! [`PhysicsModel`] under a PD controller tracking sinusoidal joint targets,
//! with observation latency, sensor noise, action delay and action noise
//! taken from the realization. Every random draw comes from one
//! `ChaCha8Rng` seeded with the episode seed.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Instant;

use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::domain::{
    DrRealization, EpisodeError, EpisodeTiming, MetricMap, RealityProfile,
};
use crate::dr::{episode_rng, sample_realization_with};

/// Inputs for one episode besides the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeContext {
    pub run_id: String,
    pub episode_index: u32,
    pub seed: u64,
    pub steps: u32,
    pub dt: f64,
    /// Passed through to the physics collaborator; the planar arm ignores it.
    pub urdf_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeOutput {
    pub metrics: MetricMap,
    pub dr_realization: DrRealization,
    pub timing: EpisodeTiming,
}

impl EpisodeOutput {
    /// Reject NaN and infinities, which JSON cannot carry.
    pub fn check_finite(&self) -> Result<(), EpisodeError> {
        let timing = [
            ("timing.avg_step_time_ms", self.timing.avg_step_time_ms),
            ("timing.total_time_s", self.timing.total_time_s),
        ];
        let metrics = self
            .metrics
            .iter()
            .map(|(k, v)| (format!("metrics.{k}"), *v));
        let realization = self
            .dr_realization
            .iter()
            .map(|(k, v)| (format!("dr_realization.{k}"), *v));
        let bad = metrics
            .chain(realization)
            .chain(timing.into_iter().map(|(k, v)| (k.to_string(), v)))
            .find(|(_, v)| !v.is_finite());
        match bad {
            Some((field, value)) => Err(EpisodeError::NonFinite { field, value }),
            None => Ok(()),
        }
    }
}

/// Runs one episode. Must be deterministic in `(profile, ctx.seed)` for
/// everything except `timing`, and must not share mutable state across calls.
pub trait EpisodeRunner: Send + Sync + 'static {
    fn run(
        &self,
        profile: &RealityProfile,
        ctx: &EpisodeContext,
    ) -> Result<EpisodeOutput, EpisodeError>;
}

/// Physical parameters read from a realization. Missing keys take nominal
/// lab values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsEnv {
    pub mass_scale: f64,
    pub friction: f64,
    pub restitution: f64,
    pub gravity_z: f64,
}

impl PhysicsEnv {
    pub fn from_realization(r: &DrRealization) -> Self {
        let get = |k: &str, d: f64| r.get(k).copied().unwrap_or(d);
        Self {
            mass_scale: get("mass_scale", 1.0),
            friction: get("friction", 0.5),
            restitution: get("restitution", 0.0),
            gravity_z: get("gravity_z", -9.81),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JointState {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
}

impl JointState {
    pub fn zeros(n: usize) -> Self {
        Self {
            positions: vec![0.0; n],
            velocities: vec![0.0; n],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.positions
            .iter()
            .chain(self.velocities.iter())
            .all(|v| v.is_finite())
    }
}

/// Physics collaborator advanced by the episode runner.
pub trait PhysicsModel: Send + Sync + 'static {
    fn num_joints(&self) -> usize;

    /// Advance `state` by `dt` under joint `torques`.
    fn step(&self, env: &PhysicsEnv, state: &mut JointState, torques: &[f64], dt: f64);
}

const LINK_LENGTHS: [f64; 4] = [0.15, 0.12, 0.10, 0.08];
const LINK_MASS: f64 = 0.1;
const JOINT_LIMIT: f64 = 2.5;
const JOINT_DAMPING: f64 = 0.3;

/// Four-joint planar arm with gravity torque, friction-scaled damping and
/// joint limits that bounce with the realization's restitution.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarArm;

impl PhysicsModel for PlanarArm {
    fn num_joints(&self) -> usize {
        LINK_LENGTHS.len()
    }

    fn step(&self, env: &PhysicsEnv, state: &mut JointState, torques: &[f64], dt: f64) {
        let damping = JOINT_DAMPING * (0.5 + env.friction);
        for j in 0..self.num_joints() {
            let arm_length: f64 = LINK_LENGTHS[j..].iter().sum();
            let mass = LINK_MASS * env.mass_scale;
            let inertia = mass * arm_length * arm_length + 0.01;

            let gravity = env.gravity_z * mass * arm_length * state.positions[j].sin() * 0.1;
            let drag = -damping * state.velocities[j];
            let torque = torques.get(j).copied().unwrap_or(0.0);

            state.velocities[j] += (torque + gravity + drag) / inertia * dt;
            state.positions[j] += state.velocities[j] * dt;

            if state.positions[j].abs() > JOINT_LIMIT {
                state.positions[j] = JOINT_LIMIT.copysign(state.positions[j]);
                state.velocities[j] = -state.velocities[j] * env.restitution;
            }
        }
    }
}

const TARGET_AMPLITUDE: [f64; 4] = [0.6, 0.45, 0.3, 0.2];
const TARGET_FREQ_HZ: f64 = 0.5;
const KP: f64 = 0.8;
const KD: f64 = 0.08;

/// Sinusoidal target for joint `j` at time `t`.
fn joint_target(j: usize, t: f64) -> f64 {
    let amp = TARGET_AMPLITUDE.get(j).copied().unwrap_or(0.1);
    amp * (2.0 * PI * TARGET_FREQ_HZ * t + j as f64 * PI / 4.0).sin()
}

fn zero_mean_noise(std: f64) -> Option<Normal<f64>> {
    if std > 0.0 {
        Normal::new(0.0, std).ok()
    } else {
        None
    }
}

fn draw(noise: &Option<Normal<f64>>, rng: &mut ChaCha8Rng) -> f64 {
    noise.as_ref().map(|n| n.sample(rng)).unwrap_or(0.0)
}

/// Default runner over any [`PhysicsModel`].
#[derive(Debug, Clone, Default)]
pub struct SimEpisodeRunner<P = PlanarArm> {
    physics: P,
}

impl<P: PhysicsModel> SimEpisodeRunner<P> {
    pub fn new(physics: P) -> Self {
        Self { physics }
    }
}

impl<P: PhysicsModel> EpisodeRunner for SimEpisodeRunner<P> {
    fn run(
        &self,
        profile: &RealityProfile,
        ctx: &EpisodeContext,
    ) -> Result<EpisodeOutput, EpisodeError> {
        let started = Instant::now();
        let mut rng = episode_rng(ctx.seed);
        let realization = sample_realization_with(profile, &mut rng)?;

        let env = PhysicsEnv::from_realization(&realization);
        let param = |k: &str| realization.get(k).copied().unwrap_or(0.0);
        let latency = param("latency_steps").max(0.0) as usize;
        let action_delay = param("action_delay").max(0.0) as usize;
        let camera_degraded = param("camera_degrade") >= 0.5;
        let sensor_std = param("noise_scale").max(0.0) * if camera_degraded { 3.0 } else { 1.0 };
        let sensor_noise = zero_mean_noise(sensor_std);
        let action_noise = zero_mean_noise(param("action_noise_scale").max(0.0));

        let n = self.physics.num_joints();
        let mut state = JointState::zeros(n);
        let mut observations: VecDeque<Vec<f64>> = VecDeque::with_capacity(latency + 1);
        let mut actions: VecDeque<Vec<f64>> =
            std::iter::repeat(vec![0.0; n]).take(action_delay).collect();

        let mut total_reward = 0.0;
        let mut error_sum = 0.0;
        let mut final_error = 0.0;
        let mut travel = 0.0;

        for step in 0..ctx.steps {
            let t = step as f64 * ctx.dt;

            observations.push_back(state.positions.clone());
            if observations.len() > latency + 1 {
                observations.pop_front();
            }
            let observed = &observations[0];

            let command: Vec<f64> = (0..n)
                .map(|j| {
                    let measured = observed[j] + draw(&sensor_noise, &mut rng);
                    KP * (joint_target(j, t) - measured) - KD * state.velocities[j]
                        + draw(&action_noise, &mut rng)
                })
                .collect();
            actions.push_back(command);
            let applied = actions.pop_front().unwrap_or_else(|| vec![0.0; n]);

            let before = state.positions.clone();
            self.physics.step(&env, &mut state, &applied, ctx.dt);
            if !state.is_finite() {
                return Err(EpisodeError::Physics {
                    step,
                    message: "non-finite joint state".to_string(),
                });
            }

            travel += before
                .iter()
                .zip(&state.positions)
                .map(|(a, b)| (b - a).abs())
                .sum::<f64>();

            let t_next = t + ctx.dt;
            let err = (0..n)
                .map(|j| (joint_target(j, t_next) - state.positions[j]).abs())
                .sum::<f64>()
                / n as f64;
            error_sum += err;
            final_error = err;
            total_reward -= err;
        }

        let steps = ctx.steps.max(1) as f64;
        let mut metrics = MetricMap::new();
        metrics.insert("total_reward".to_string(), total_reward);
        metrics.insert("mean_tracking_error".to_string(), error_sum / steps);
        metrics.insert("final_tracking_error".to_string(), final_error);
        metrics.insert("total_joint_travel_rad".to_string(), travel);
        metrics.insert("steps".to_string(), ctx.steps as f64);

        let elapsed = started.elapsed();
        Ok(EpisodeOutput {
            metrics,
            dr_realization: realization,
            timing: EpisodeTiming {
                avg_step_time_ms: elapsed.as_secs_f64() * 1000.0 / steps,
                total_time_s: elapsed.as_secs_f64(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProfileRegistry;

    fn ctx(seed: u64, steps: u32) -> EpisodeContext {
        EpisodeContext {
            run_id: "batch_t__default__ep0".to_string(),
            episode_index: 0,
            seed,
            steps,
            dt: 0.01,
            urdf_path: None,
        }
    }

    #[test]
    fn deterministic_for_same_seed() {
        let reg = ProfileRegistry::builtin();
        let noisy = reg.get("noisy").unwrap();
        let runner = SimEpisodeRunner::new(PlanarArm);

        let a = runner.run(&noisy, &ctx(7, 80)).unwrap();
        let b = runner.run(&noisy, &ctx(7, 80)).unwrap();
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.dr_realization, b.dr_realization);
    }

    #[test]
    fn different_seeds_differ() {
        let reg = ProfileRegistry::builtin();
        let p = reg.get("default").unwrap();
        let runner = SimEpisodeRunner::<PlanarArm>::default();
        let a = runner.run(&p, &ctx(1, 50)).unwrap();
        let b = runner.run(&p, &ctx(2, 50)).unwrap();
        assert_ne!(a.dr_realization, b.dr_realization);
    }

    #[test]
    fn metrics_have_fixed_key_set() {
        let reg = ProfileRegistry::builtin();
        let runner = SimEpisodeRunner::<PlanarArm>::default();
        for id in reg.ids() {
            let p = reg.get(&id).unwrap();
            let out = runner.run(&p, &ctx(3, 20)).unwrap();
            let keys: Vec<&str> = out.metrics.keys().map(String::as_str).collect();
            assert_eq!(
                keys,
                vec![
                    "final_tracking_error",
                    "mean_tracking_error",
                    "steps",
                    "total_joint_travel_rad",
                    "total_reward",
                ]
            );
            assert_eq!(out.metrics["steps"], 20.0);
            assert!(out.metrics["total_reward"] <= 0.0);
        }
    }

    #[test]
    fn realization_matches_standalone_sampler() {
        let reg = ProfileRegistry::builtin();
        let p = reg.get("noisy_outdoor").unwrap();
        let out = SimEpisodeRunner::<PlanarArm>::default()
            .run(&p, &ctx(11, 10))
            .unwrap();
        assert_eq!(out.dr_realization, crate::dr::sample_realization(&p, 11).unwrap());
    }

    struct Exploding;

    impl PhysicsModel for Exploding {
        fn num_joints(&self) -> usize {
            1
        }

        fn step(&self, _env: &PhysicsEnv, state: &mut JointState, _t: &[f64], _dt: f64) {
            state.positions[0] = f64::NAN;
        }
    }

    #[test]
    fn divergence_is_a_physics_error() {
        let reg = ProfileRegistry::builtin();
        let p = reg.get("default").unwrap();
        let err = SimEpisodeRunner::new(Exploding)
            .run(&p, &ctx(0, 5))
            .unwrap_err();
        assert!(matches!(err, EpisodeError::Physics { step: 0, .. }));
    }

    #[test]
    fn arm_respects_joint_limits() {
        let env = PhysicsEnv::from_realization(&DrRealization::new());
        let mut state = JointState::zeros(4);
        for _ in 0..500 {
            PlanarArm.step(&env, &mut state, &[50.0, -50.0, 50.0, -50.0], 0.01);
        }
        assert!(state.positions.iter().all(|p| p.abs() <= JOINT_LIMIT));
    }
}
