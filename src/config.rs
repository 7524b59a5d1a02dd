//! Node configuration (`SPEC_FULL.md` AMBIENT "configuration"): a TOML file
//! loaded via `serde` + the `toml` crate, with `clap`-derived CLI flags
//! overriding file values — the same two-layer shape the teacher's
//! `aptos_config::config::NodeConfig` uses (a serializable config struct,
//! plus a `clap::Parser` front-end in the binary that loads and patches it).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::active_transactions::ActiveTransactionsConfig;
use crate::confirmation_height::ConfirmationHeightConfig;

/// Top-level config, deserialized from the node's TOML config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub active_transactions: ActiveTransactionsSection,
    pub confirmation_height: ConfirmationHeightSection,
    pub store: StoreSection,
    pub logging: LoggingSection,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node: NodeSection::default(),
            active_transactions: ActiveTransactionsSection::default(),
            confirmation_height: ConfirmationHeightSection::default(),
            store: StoreSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

impl NodeConfig {
    /// Loads and deserializes a TOML config file. Unknown fields are
    /// rejected by `serde`'s default (no `#[serde(deny_unknown_fields)]`
    /// here, matching the teacher's forward-compatible stance: an older
    /// binary reading a newer config file should not refuse to start over a
    /// section it doesn't know about yet).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let config: NodeConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn active_transactions_config(&self) -> ActiveTransactionsConfig {
        let mut cfg = ActiveTransactionsConfig::default();
        cfg.soft_cap = self.active_transactions.soft_cap;
        cfg.election_time_to_live_secs = self.active_transactions.election_time_to_live_secs;
        cfg.multiplier_history_window = self.active_transactions.multiplier_history_window;
        cfg.quorum_fraction = self.node.quorum_fraction;
        cfg
    }

    pub fn confirmation_height_config(&self) -> ConfirmationHeightConfig {
        ConfirmationHeightConfig {
            batch_min_time: Duration::from_millis(self.confirmation_height.batch_min_time_ms),
            max_batch_write_size: self.confirmation_height.max_batch_write_size,
            input_queue_capacity: self.confirmation_height.input_queue_capacity,
        }
    }
}

/// `node` section: data directory, online-weight minimum, quorum fraction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub data_dir: PathBuf,
    /// `online_weight_minimum` (`spec.md` §4.2): inactive-votes weight
    /// threshold before a lazy bootstrap is scheduled.
    pub online_weight_minimum: u128,
    /// `quorum_fraction` (`spec.md` §4.3): e.g. `0.67` for 67%.
    pub quorum_fraction: f64,
    pub online_weight_window_secs: u64,
    pub network: NetworkKind,
}

impl Default for NodeSection {
    fn default() -> Self {
        NodeSection {
            data_dir: PathBuf::from("./lattice-data"),
            online_weight_minimum: 60_000_000_000_000_000_000_000_000_000u128,
            quorum_fraction: 0.67,
            online_weight_window_secs: 300,
            network: NetworkKind::Live,
        }
    }
}

/// Which difficulty/work-threshold profile to use; `Test` zeroes out all
/// thresholds (`ledger::work::WorkThresholds::test`) so local networks never
/// spend real CPU time mining work.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    Live,
    Test,
}

/// `active_transactions` section (`spec.md` §4.2 config knobs).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveTransactionsSection {
    /// Soft cap `N`.
    pub soft_cap: usize,
    pub election_time_to_live_secs: u64,
    pub multiplier_history_window: usize,
    pub request_loop_period_ms: u64,
}

impl Default for ActiveTransactionsSection {
    fn default() -> Self {
        let defaults = ActiveTransactionsConfig::default();
        ActiveTransactionsSection {
            soft_cap: defaults.soft_cap,
            election_time_to_live_secs: defaults.election_time_to_live_secs,
            multiplier_history_window: defaults.multiplier_history_window,
            request_loop_period_ms: 3_000,
        }
    }
}

/// `confirmation_height` section (`spec.md` §4.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationHeightSection {
    pub batch_min_time_ms: u64,
    pub max_batch_write_size: usize,
    pub input_queue_capacity: usize,
}

impl Default for ConfirmationHeightSection {
    fn default() -> Self {
        let defaults = ConfirmationHeightConfig::default();
        ConfirmationHeightSection {
            batch_min_time_ms: defaults.batch_min_time.as_millis() as u64,
            max_batch_write_size: defaults.max_batch_write_size,
            input_queue_capacity: defaults.input_queue_capacity,
        }
    }
}

/// `store` section: RocksDB path (relative to `node.data_dir` unless
/// absolute).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub subdirectory: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        StoreSection { subdirectory: "ledger".to_string() }
    }
}

impl StoreSection {
    pub fn resolve(&self, data_dir: &Path) -> PathBuf {
        let sub = Path::new(&self.subdirectory);
        if sub.is_absolute() {
            sub.to_path_buf()
        } else {
            data_dir.join(sub)
        }
    }
}

/// `logging` section: level filter and destination.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"info"` or
    /// `"lattice_node=debug,warn"`.
    pub level: String,
    pub destination: LoggingDestination,
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection { level: "info".to_string(), destination: LoggingDestination::Stderr }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LoggingDestination {
    Stderr,
    File { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let serialized = toml::to_string(&config).expect("default config serializes");
        let parsed: NodeConfig = toml::from_str(&serialized).expect("default config deserializes");
        assert_eq!(parsed.node.quorum_fraction, config.node.quorum_fraction);
        assert_eq!(parsed.active_transactions.soft_cap, config.active_transactions.soft_cap);
    }

    #[test]
    fn store_path_resolves_relative_to_data_dir() {
        let section = StoreSection::default();
        let resolved = section.resolve(Path::new("/var/lib/lattice"));
        assert_eq!(resolved, PathBuf::from("/var/lib/lattice/ledger"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let partial = "[node]\nquorum_fraction = 0.51\n";
        let config: NodeConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.node.quorum_fraction, 0.51);
        assert_eq!(config.active_transactions.soft_cap, ActiveTransactionsConfig::default().soft_cap);
    }
}
