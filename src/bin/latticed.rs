//! `latticed`: the node binary. Loads a TOML config (optionally patched by
//! CLI flags), wires up a [`Node`](lattice_node::node::Node) against the
//! RocksDB store, starts its worker threads, and blocks until interrupted.
//!
//! This binary is deliberately thin: it owns process-level concerns
//! (argument parsing, signal handling, logging init) and nothing else,
//! mirroring the teacher's split between a library crate holding all logic
//! and a slim `bin/` front-end.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use lattice_node::config::NodeConfig;
use lattice_node::node::{Node, NodeDeps};

/// Block-lattice ledger, election, and confirmation-height core node.
#[derive(Parser, Debug)]
#[command(name = "latticed", version, about)]
struct Cli {
    /// Path to a TOML config file. If omitted, compiled-in defaults are used.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `node.data_dir` from the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Overrides `node.network` from the config file (`live` or `test`).
    #[arg(long)]
    network: Option<String>,

    /// Overrides `logging.level` from the config file.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }
    if let Some(network) = &cli.network {
        config.node.network = match network.as_str() {
            "live" => lattice_node::config::NetworkKind::Live,
            "test" => lattice_node::config::NetworkKind::Test,
            other => anyhow::bail!("unknown --network value: {other} (expected `live` or `test`)"),
        };
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    lattice_node::logging::init(&config.logging);

    tracing::info!(data_dir = %config.node.data_dir.display(), network = ?config.node.network, "starting latticed");

    let node = Arc::new(Node::open(config, NodeDeps::default())?);
    node.start();

    // No portable signal-handling crate is in the dependency stack
    // (`SPEC_FULL.md` scopes process supervision out); the process runs
    // until killed, relying on the OS's default `SIGINT`/`SIGTERM`
    // disposition. `Node::stop()` remains available to embedders that do
    // their own signal plumbing and call it directly.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
