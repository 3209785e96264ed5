//! Service configuration.
//!
//! Loaded from an optional TOML file, then overridden by `QERS_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use qers_state::{FsReportStore, MemoryReportStore, ReportStore, SurrealReportStore};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{GapError, Result, DEFAULT_PERFORMANCE_METRIC};
use crate::executor::{default_workers, ExecutorConfig, DEFAULT_MAX_EPISODES_PER_BATCH};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// HTTP listen address for `qersd`.
    pub listen: String,
    /// Worker pool size. Defaults to host parallelism.
    pub max_workers: Option<usize>,
    pub episode_timeout_ms: Option<u64>,
    pub max_episodes_per_batch: u64,
    /// Metric the gap evaluator compares when a request names none.
    pub performance_metric: String,
    /// `memory`, a directory path, `mem://`, `surrealkv://<path>`, or a
    /// `ws://` / `wss://` SurrealDB endpoint.
    pub store: String,
    /// TOML file with extra `[[profiles]]`.
    pub profiles_file: Option<PathBuf>,
    pub include_builtin_profiles: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            max_workers: None,
            episode_timeout_ms: None,
            max_episodes_per_batch: DEFAULT_MAX_EPISODES_PER_BATCH,
            performance_metric: DEFAULT_PERFORMANCE_METRIC.to_string(),
            store: "memory".to_string(),
            profiles_file: None,
            include_builtin_profiles: true,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GapError::Config(format!("invalid config: {e}")))
    }

    /// File (if given) plus process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    GapError::Config(format!("cannot read config {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `QERS_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QERS_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("QERS_MAX_WORKERS") {
            self.max_workers = Some(parse_env("QERS_MAX_WORKERS", &v)?);
        }
        if let Some(v) = lookup("QERS_EPISODE_TIMEOUT_MS") {
            self.episode_timeout_ms = Some(parse_env("QERS_EPISODE_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("QERS_MAX_EPISODES_PER_BATCH") {
            self.max_episodes_per_batch = parse_env("QERS_MAX_EPISODES_PER_BATCH", &v)?;
        }
        if let Some(v) = lookup("QERS_PERFORMANCE_METRIC") {
            self.performance_metric = v;
        }
        if let Some(v) = lookup("QERS_STORE") {
            self.store = v;
        }
        if let Some(v) = lookup("QERS_PROFILES") {
            self.profiles_file = Some(PathBuf::from(v));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == Some(0) {
            return Err(GapError::Config("max_workers must be >= 1".to_string()));
        }
        if self.episode_timeout_ms == Some(0) {
            return Err(GapError::Config("episode_timeout_ms must be >= 1".to_string()));
        }
        if self.max_episodes_per_batch == 0 {
            return Err(GapError::Config(
                "max_episodes_per_batch must be >= 1".to_string(),
            ));
        }
        if self.performance_metric.is_empty() {
            return Err(GapError::Config("performance_metric is empty".to_string()));
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_workers: self.max_workers.unwrap_or_else(default_workers),
            episode_timeout: self.episode_timeout_ms.map(Duration::from_millis),
            max_episodes_per_batch: self.max_episodes_per_batch,
        }
    }

    /// Open the configured report store backend.
    pub async fn open_store(&self) -> Result<Arc<dyn ReportStore>> {
        open_store(&self.store).await
    }
}

/// Open a report store from its location string.
pub async fn open_store(location: &str) -> Result<Arc<dyn ReportStore>> {
    let store: Arc<dyn ReportStore> = match location {
        "" | "memory" => Arc::new(MemoryReportStore::new()),
        "mem://" => Arc::new(SurrealReportStore::in_memory().await?),
        s if s.starts_with("surrealkv://") => {
            Arc::new(SurrealReportStore::open_local(&s["surrealkv://".len()..]).await?)
        }
        s if s.starts_with("ws://") || s.starts_with("wss://") => {
            Arc::new(SurrealReportStore::connect(s).await?)
        }
        path => Arc::new(FsReportStore::new(path)?),
    };
    info!(store = %location, "report store opened");
    Ok(store)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GapError::Config(format!("{key}={value:?}: {e}")))
}
