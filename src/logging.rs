//! Process-wide logging setup (`SPEC_FULL.md` AMBIENT "logging"):
//! `tracing` + `tracing-subscriber`, the modern equivalent of the teacher's
//! `aptos-logger` (itself a `tracing` wrapper). Initialized once, from
//! [`crate::config::LoggingSection`].
//!
//! Call sites elsewhere in the crate use `tracing::{info,warn,error}!`
//! directly rather than a custom macro layer, matching the teacher's
//! `info!`/`error!` call sites in its storage layer.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingDestination;

/// Installs the global `tracing` subscriber. Idempotent: a second call
/// (e.g. from a test harness that also constructs a `Node`) is a silent
/// no-op rather than a panic, since `tracing`'s global dispatcher can only
/// be set once per process.
pub fn init(config: &crate::config::LoggingSection) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match &config.destination {
        LoggingDestination::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        LoggingDestination::File { path } => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .try_init(),
            Err(err) => {
                eprintln!("lattice_node: could not open log file {}: {err}; falling back to stderr", path.display());
                tracing_subscriber::fmt().with_env_filter(EnvFilter::new("info")).try_init()
            }
        },
    };

    if let Err(err) = result {
        // Already initialized (e.g. by a test, or a second Node in the same
        // process) — not a startup failure.
        tracing::debug!(%err, "tracing subscriber already initialized");
    }
}
