//! Tracing setup shared by the `qers` and `qersd` binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be installed once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter variables checked in order before falling back to the CLI level.
pub const FILTER_ENV_VARS: [&str; 2] = ["QERS_LOG", "RUST_LOG"];

/// Storage and HTTP internals that log per query or per connection.
const CHATTY_DEPENDENCIES: [&str; 4] = ["surrealdb", "surrealdb_core", "hyper", "hyper_util"];

/// Directives used when neither filter variable is set: `level` for our
/// crates, chatty dependencies capped at `warn`.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    if level > Level::WARN {
        directives.extend(CHATTY_DEPENDENCIES.iter().map(|dep| format!("{dep}=warn")));
    }
    directives.join(",")
}

/// Install the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON records instead of text.
/// * `level`: verbosity used when no filter variable is set.
///
/// `QERS_LOG` wins over `RUST_LOG`, so per-module filters such as
/// `QERS_LOG=qers_core::executor=debug` work in both formats. Targets are
/// printed at debug and below.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = FILTER_ENV_VARS
        .iter()
        .find_map(|var| EnvFilter::try_from_env(var).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)));

    let fmt_layer = fmt::layer().with_target(level >= Level::DEBUG);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    }
}

/// Map the usual `--verbose` switch to a default level.
pub fn level_for(verbose: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}
