//! QERS - batch multi-profile evaluation CLI
//!
//! The `qers` command runs domain-randomization batches across reality
//! profiles and reports the transfer gap between them.
//!
//! ## Commands
//!
//! - `profiles list|show`: inspect the profile registry
//! - `batch run|submit`: run a batch (in-process or on a server)
//! - `batch show|status|evaluate|retry|cancel|list`: work with stored batches
//!
//! Without `--server` everything runs in-process against a filesystem report
//! store (`--store-dir`, default `.qers/reports`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use qers_core::telemetry::level_for;
use qers_core::{
    BatchEval, BatchReport, BatchRequest, BatchService, ExecutorConfig, FsReportStore, JobStatus,
    PlanarArm, ProfileInfo, ProfileRegistry, RealityProfile, Reports, SimEpisodeRunner,
    DEFAULT_PERFORMANCE_METRIC,
};

#[derive(Parser)]
#[command(name = "qers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "QERS batch multi-profile evaluation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Talk to a running qersd instead of running in-process
    #[arg(long, global = true, env = "QERS_SERVER")]
    server: Option<String>,

    /// Report store directory for in-process mode
    #[arg(long, global = true, default_value = ".qers/reports")]
    store_dir: PathBuf,

    /// Extra profiles file (TOML) for in-process mode
    #[arg(long, global = true, env = "QERS_PROFILES")]
    profiles_file: Option<PathBuf>,

    /// Print results as JSON instead of a summary
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect reality profiles
    Profiles {
        #[command(subcommand)]
        action: ProfilesAction,
    },

    /// Run and evaluate batches
    Batch {
        #[command(subcommand)]
        action: BatchAction,
    },
}

#[derive(Subcommand)]
enum ProfilesAction {
    /// List registered profiles
    List,

    /// Show one profile with its parameter distributions
    Show {
        /// Profile id
        id: String,
    },
}

#[derive(clap::Args, Clone)]
struct BatchArgs {
    /// Profile ids, comma separated (default: all registered)
    #[arg(short, long, value_delimiter = ',')]
    profiles: Option<Vec<String>>,

    /// Steps per episode
    #[arg(long, default_value_t = qers_core::domain::batch::DEFAULT_STEPS)]
    steps: u32,

    /// Integration time step in seconds
    #[arg(long, default_value_t = qers_core::domain::batch::DEFAULT_DT)]
    dt: f64,

    /// Base seed
    #[arg(long, default_value_t = qers_core::domain::batch::DEFAULT_SEED)]
    seed: u64,

    /// Episodes per profile
    #[arg(short, long, default_value_t = qers_core::domain::batch::DEFAULT_EPISODES_PER_PROFILE)]
    episodes: u32,

    /// Robot description passed to the physics collaborator
    #[arg(long)]
    urdf: Option<String>,
}

impl BatchArgs {
    fn request(&self) -> BatchRequest {
        BatchRequest {
            urdf_path: self.urdf.clone(),
            profiles: self.profiles.clone(),
            steps: self.steps,
            dt: self.dt,
            seed: self.seed,
            dr_episodes_per_profile: self.episodes,
        }
    }
}

#[derive(Subcommand)]
enum BatchAction {
    /// Run a batch to completion and print its report
    Run {
        #[command(flatten)]
        args: BatchArgs,

        /// Evaluate the batch right after it finishes
        #[arg(long)]
        evaluate: bool,
    },

    /// Submit a batch as a background job
    Submit {
        #[command(flatten)]
        args: BatchArgs,

        /// Wait for the job to finish
        #[arg(long)]
        wait: bool,
    },

    /// Show a stored batch report
    Show { batch_id: String },

    /// Show the job status of a batch
    Status { batch_id: String },

    /// Compute pairwise transfer-gap metrics for a batch
    Evaluate {
        batch_id: String,

        /// Metric to compare (default: the service's configured metric)
        #[arg(short, long)]
        metric: Option<String>,
    },

    /// Re-run the failed episodes of a batch under a new batch id
    Retry { batch_id: String },

    /// Cancel a submitted batch
    Cancel { batch_id: String },

    /// List stored batch ids
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    qers_core::init_tracing(cli.json, level_for(cli.verbose));

    let backend = match &cli.server {
        Some(url) => Backend::Remote(RemoteClient::new(url)?),
        None => Backend::Local(
            local_service(&cli.store_dir, cli.profiles_file.as_deref())
                .context("Failed to open local batch service")?,
        ),
    };

    let out = Output { raw: cli.raw };
    match cli.command {
        Commands::Profiles { action } => match action {
            ProfilesAction::List => out.profiles(&backend.profiles().await?),
            ProfilesAction::Show { id } => out.json(&backend.profile(&id).await?),
        },
        Commands::Batch { action } => run_batch_action(&backend, &out, action).await,
    }
}

async fn run_batch_action(backend: &Backend, out: &Output, action: BatchAction) -> Result<()> {
    match action {
        BatchAction::Run { args, evaluate } => {
            let report = backend.run_batch(&args.request()).await?;
            out.report(&report)?;
            if evaluate {
                let eval = backend.evaluate(&report.batch_id, None).await?;
                out.eval(&eval)?;
            }
            Ok(())
        }
        BatchAction::Submit { args, wait } => {
            let mut job = backend.submit(&args.request()).await?;
            if wait {
                job = backend.wait(&job.batch_id).await?;
            }
            out.job(&job)
        }
        BatchAction::Show { batch_id } => out.report(&backend.report(&batch_id).await?),
        BatchAction::Status { batch_id } => out.job(&backend.status(&batch_id).await?),
        BatchAction::Evaluate { batch_id, metric } => {
            out.eval(&backend.evaluate(&batch_id, metric.as_deref()).await?)
        }
        BatchAction::Retry { batch_id } => out.report(&backend.retry(&batch_id).await?),
        BatchAction::Cancel { batch_id } => out.job(&backend.cancel(&batch_id).await?),
        BatchAction::List => {
            for id in backend.list().await? {
                println!("{id}");
            }
            Ok(())
        }
    }
}

/// In-process service over a filesystem report store.
fn local_service(store_dir: &Path, profiles_file: Option<&Path>) -> Result<BatchService> {
    let store = FsReportStore::new(store_dir)
        .with_context(|| format!("Failed to open report store {}", store_dir.display()))?;
    let registry = ProfileRegistry::load(profiles_file, true)?;
    debug!(store = %store_dir.display(), profiles = registry.len(), "local mode");
    Ok(BatchService::new(
        Arc::new(registry),
        Arc::new(SimEpisodeRunner::new(PlanarArm)),
        Reports::new(Arc::new(store)),
        ExecutorConfig::default(),
        DEFAULT_PERFORMANCE_METRIC,
    ))
}

enum Backend {
    Local(BatchService),
    Remote(RemoteClient),
}

#[derive(Deserialize)]
struct ProfilesBody {
    profiles: Vec<ProfileInfo>,
}

#[derive(Deserialize)]
struct BatchesBody {
    batches: Vec<String>,
}

impl Backend {
    async fn profiles(&self) -> Result<Vec<ProfileInfo>> {
        match self {
            Backend::Local(svc) => Ok(svc.profiles()),
            Backend::Remote(c) => Ok(c.get::<ProfilesBody>("/reality-profiles").await?.profiles),
        }
    }

    async fn profile(&self, id: &str) -> Result<RealityProfile> {
        match self {
            Backend::Local(svc) => Ok(svc.profile(id)?.as_ref().clone()),
            Backend::Remote(c) => c.get(&format!("/reality-profiles/{id}")).await,
        }
    }

    async fn run_batch(&self, request: &BatchRequest) -> Result<BatchReport> {
        match self {
            Backend::Local(svc) => Ok(svc.run_batch(request.clone()).await?),
            Backend::Remote(c) => c.post("/sim/batch", request).await,
        }
    }

    async fn submit(&self, request: &BatchRequest) -> Result<JobStatus> {
        match self {
            Backend::Local(svc) => Ok(svc.submit_batch(request.clone()).await?),
            Backend::Remote(c) => c.post("/sim/batch/jobs", request).await,
        }
    }

    async fn wait(&self, batch_id: &str) -> Result<JobStatus> {
        match self {
            Backend::Local(svc) => Ok(svc.wait(batch_id).await?),
            Backend::Remote(_) => loop {
                let job = self.status(batch_id).await?;
                if job.state.is_terminal() {
                    return Ok(job);
                }
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            },
        }
    }

    async fn report(&self, batch_id: &str) -> Result<BatchReport> {
        match self {
            Backend::Local(svc) => Ok(svc.report(batch_id).await?),
            Backend::Remote(c) => c.get(&format!("/sim/batch/{batch_id}")).await,
        }
    }

    async fn status(&self, batch_id: &str) -> Result<JobStatus> {
        match self {
            Backend::Local(svc) => Ok(svc.job_status(batch_id).await?),
            Backend::Remote(c) => c.get(&format!("/sim/batch/{batch_id}/status")).await,
        }
    }

    async fn evaluate(&self, batch_id: &str, metric: Option<&str>) -> Result<BatchEval> {
        match self {
            Backend::Local(svc) => Ok(svc.evaluate(batch_id, metric).await?),
            Backend::Remote(c) => {
                let path = match metric {
                    Some(m) => format!("/sim/batch/{batch_id}/evaluate?metric={m}"),
                    None => format!("/sim/batch/{batch_id}/evaluate"),
                };
                c.get(&path).await
            }
        }
    }

    async fn retry(&self, batch_id: &str) -> Result<BatchReport> {
        match self {
            Backend::Local(svc) => Ok(svc.retry(batch_id).await?),
            Backend::Remote(c) => {
                c.post(&format!("/sim/batch/{batch_id}/retry"), &serde_json::json!({}))
                    .await
            }
        }
    }

    async fn cancel(&self, batch_id: &str) -> Result<JobStatus> {
        match self {
            Backend::Local(svc) => Ok(svc.cancel(batch_id).await?),
            Backend::Remote(c) => {
                c.post(&format!("/sim/batch/{batch_id}/cancel"), &serde_json::json!({}))
                    .await
            }
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        match self {
            Backend::Local(svc) => Ok(svc.list_batches().await?),
            Backend::Remote(c) => Ok(c.get::<BatchesBody>("/sim/batch").await?.batches),
        }
    }
}

/// Minimal JSON client for the qersd HTTP API.
struct RemoteClient {
    base: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl RemoteClient {
    fn new(base: &str) -> Result<Self> {
        let base = normalize_base(base)?;
        info!(server = %base, "remote mode");
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        decode(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let bytes = resp.bytes().await.context("Failed to read response body")?;
    if !status.is_success() {
        bail!("server returned {status}: {}", error_message(&bytes));
    }
    serde_json::from_slice(&bytes).context("Failed to decode response")
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned())
}

fn normalize_base(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("server url must start with http:// or https://, got {url:?}");
    }
    Ok(url.to_string())
}

/// Printing of results: JSON with `--raw`, otherwise a short summary.
struct Output {
    raw: bool,
}

impl Output {
    fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn profiles(&self, profiles: &[ProfileInfo]) -> Result<()> {
        if self.raw {
            return self.json(&profiles);
        }
        for p in profiles {
            println!("{:<20} {:<22} {}", p.id, p.name, p.description);
        }
        Ok(())
    }

    fn report(&self, report: &BatchReport) -> Result<()> {
        if self.raw {
            return self.json(report);
        }
        println!("batch:   {}", report.batch_id);
        println!("status:  {}", report.status.as_str());
        if let Some(src) = &report.retry_of {
            println!("retry of: {src}");
        }
        println!("time:    {:.3} s", report.total_time_s);
        println!();
        println!("{:<20} {:>9} {:>7} {:>13}", "profile", "completed", "failed", "step ms (avg)");
        for p in &report.per_profile {
            println!(
                "{:<20} {:>9} {:>7} {:>13.4}",
                p.profile_id, p.summary.completed, p.summary.failed, p.summary.avg_step_time_ms
            );
        }
        let c = &report.cross_profile;
        println!();
        println!(
            "step time across {} profiles: mean {:.4} ms, std {:.4}, min {:.4}, max {:.4}",
            c.num_profiles, c.step_time_mean_ms, c.step_time_std_ms, c.step_time_min_ms, c.step_time_max_ms
        );
        Ok(())
    }

    fn eval(&self, eval: &BatchEval) -> Result<()> {
        if self.raw {
            return self.json(eval);
        }
        println!("evaluation of {} on {}", eval.batch_id, eval.performance_metric);
        println!(
            "{:<20} {:<20} {:>12} {:>10} {:>10}",
            "design", "eval", "abs drop", "rel drop", "l2 gap"
        );
        for d in &eval.pairwise_drops {
            println!(
                "{:<20} {:<20} {:>12} {:>10} {:>10}",
                d.design_profile,
                d.eval_profile,
                fmt_opt(d.performance_drop.absolute_drop),
                fmt_opt(d.performance_drop.relative_drop),
                fmt_opt(d.gap_width.l2_distance),
            );
        }
        let s = &eval.summary;
        println!();
        println!(
            "{} profiles, {} comparisons, mean |drop| {:.4}, max |drop| {:.4}",
            s.profiles_evaluated, s.pairwise_comparisons, s.mean_absolute_drop, s.max_absolute_drop
        );
        Ok(())
    }

    fn job(&self, job: &JobStatus) -> Result<()> {
        if self.raw {
            return self.json(job);
        }
        match &job.message {
            Some(msg) => println!("{} {} ({msg})", job.batch_id, job.state),
            None => println!("{} {}", job.batch_id, job.state),
        }
        Ok(())
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qers_core::{BatchStatus, JobState};

    fn request() -> BatchRequest {
        BatchRequest::default()
            .with_profiles(["default", "noisy"])
            .with_steps(20)
            .with_episodes(2)
    }

    #[tokio::test]
    async fn test_local_backend_persists_to_store_dir() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::Local(local_service(dir.path(), None).unwrap());

        let report = backend.run_batch(&request()).await.unwrap();
        assert_eq!(report.status, BatchStatus::Completed);
        assert!(dir
            .path()
            .join("batch_report")
            .join(format!("{}.json", report.batch_id))
            .exists());

        // A second process sees the same store.
        let again = Backend::Local(local_service(dir.path(), None).unwrap());
        assert_eq!(again.report(&report.batch_id).await.unwrap(), report);
        assert_eq!(again.list().await.unwrap(), vec![report.batch_id.clone()]);

        let eval = again.evaluate(&report.batch_id, None).await.unwrap();
        assert_eq!(eval.summary.pairwise_comparisons, 2);

        let status = again.status(&report.batch_id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_local_submit_and_wait() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::Local(local_service(dir.path(), None).unwrap());
        let job = backend.submit(&request()).await.unwrap();
        let done = backend.wait(&job.batch_id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_local_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::Local(local_service(dir.path(), None).unwrap());
        let profiles = backend.profiles().await.unwrap();
        assert_eq!(profiles.len(), 4);
        assert!(backend.profile("nope").await.is_err());
    }

    #[test]
    fn test_batch_args_to_request() {
        let cli = Cli::parse_from([
            "qers", "batch", "run", "--profiles", "default,noisy", "--steps", "50", "-e", "3",
        ]);
        let Commands::Batch {
            action: BatchAction::Run { args, evaluate },
        } = cli.command
        else {
            panic!("expected batch run");
        };
        assert!(!evaluate);
        let req = args.request();
        assert_eq!(req.profiles, Some(vec!["default".to_string(), "noisy".to_string()]));
        assert_eq!(req.steps, 50);
        assert_eq!(req.dr_episodes_per_profile, 3);
        assert_eq!(req.seed, 42);
    }

    #[test]
    fn test_server_url_normalization() {
        assert_eq!(
            normalize_base("http://localhost:8080/").unwrap(),
            "http://localhost:8080"
        );
        assert!(normalize_base("localhost:8080").is_err());
    }

    #[test]
    fn test_error_message_prefers_json_error_field() {
        assert_eq!(error_message(br#"{"error":"unknown batch: b"}"#), "unknown batch: b");
        assert_eq!(error_message(b"gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_fmt_opt() {
        assert_eq!(fmt_opt(None), "-");
        assert_eq!(fmt_opt(Some(1.5)), "1.5000");
    }
}
