//! Process wiring (`SPEC_FULL.md` AMBIENT "process wiring"): a top-level
//! [`Node`] that owns the [`Store`](crate::store::Store), [`Ledger`], and
//! each worker subsystem, constructs every subsystem with `Arc` handles to
//! only the collaborators it needs, and exposes `start()`/`stop()` that
//! spawn and join worker threads in the fixed order from `spec.md` §5.
//!
//! Per the REDESIGN FLAG in `spec.md` §9 ("Cyclic ownership between node and
//! its subsystems"), no subsystem holds a handle back to `Node` itself:
//! `Node` is the single point of composition, and subsystems only ever see
//! the narrower collaborator handles ([`Ledger`], [`Store`],
//! [`Observers`], [`PeerNetwork`], ...) they declare a dependency on.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;

use crate::active_transactions::{ActiveTransactions, OnlineWeight};
use crate::block_processor::{BlockProcessor, BlockProcessorConfig};
use crate::blocks::{Block, EpochMarkers};
use crate::collaborators::PeerNetwork;
use crate::config::NodeConfig;
use crate::confirmation_height::ConfirmationHeightProcessor;
use crate::ledger::clock::{Clock, SystemClock};
use crate::ledger::work::WorkThresholds;
use crate::ledger::Ledger;
use crate::metrics::Metrics;
use crate::observers::Observers;
use crate::store::rocks::RocksStore;
use crate::store::Store;
use crate::types::Account;

/// A [`PeerNetwork`] that drops everything, for embedders (tests, single-node
/// setups) that never wire a real transport. Named, not anonymous, so a
/// `Node` constructed without an explicit network collaborator is
/// self-documenting in logs and panics rather than silently no-op.
pub struct NullPeerNetwork;

impl PeerNetwork for NullPeerNetwork {
    fn broadcast(&self, _message: crate::collaborators::Message) {}
    fn send_to(&self, _peer: crate::collaborators::PeerId, _message: crate::collaborators::Message) {}
}

/// Everything required to construct a [`Node`] that this crate does not
/// itself implement (`spec.md` §1's external-collaborator carve-out).
pub struct NodeDeps {
    pub peers: Arc<dyn PeerNetwork>,
    pub epochs: EpochMarkers,
    pub clock: Arc<dyn Clock>,
}

impl Default for NodeDeps {
    fn default() -> Self {
        NodeDeps { peers: Arc::new(NullPeerNetwork), epochs: EpochMarkers::new(), clock: Arc::new(SystemClock) }
    }
}

/// Owns the store, ledger, and every worker subsystem named in `spec.md`
/// §2's component table (excluding the vote processor / aggregator and
/// block-wire deserialization, which live upstream of this crate's
/// boundary per the `BlockProcessor::enqueue` / `ActiveTransactions::vote`
/// entry points).
pub struct Node {
    pub store: Arc<dyn Store>,
    pub ledger: Arc<Ledger>,
    pub observers: Arc<Observers>,
    pub metrics: Arc<Metrics>,
    pub online_weight: Arc<OnlineWeight>,
    pub confirmation_height: Arc<ConfirmationHeightProcessor>,
    pub active: Arc<ActiveTransactions>,
    pub block_processor: Arc<BlockProcessor>,
    config: NodeConfig,
    threads: std::sync::Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Node {
    /// Opens (or creates) the on-disk store at `config.node.data_dir` and
    /// wires every subsystem together. Does not start any worker threads;
    /// call [`Node::start`] for that.
    pub fn open(config: NodeConfig, deps: NodeDeps) -> Result<Self> {
        std::fs::create_dir_all(&config.node.data_dir)?;
        let store_path = config.store.resolve(&config.node.data_dir);
        let store: Arc<dyn Store> = Arc::new(RocksStore::open(&store_path)?);
        Self::with_store(config, deps, store)
    }

    /// Same as [`Node::open`] but against a caller-supplied [`Store`] (the
    /// in-memory test double, typically), skipping on-disk setup entirely.
    pub fn with_store(config: NodeConfig, deps: NodeDeps, store: Arc<dyn Store>) -> Result<Self> {
        let work = match config.node.network {
            crate::config::NetworkKind::Live => WorkThresholds::live(),
            crate::config::NetworkKind::Test => WorkThresholds::test(),
        };

        let mut ledger = Ledger::new(deps.epochs, work, deps.clock.clone());
        let metrics = Arc::new(Metrics::new()?);
        ledger.on_epoch_2_started(|| {
            tracing::info!("epoch_2 upgrade latch tripped");
        });
        let ledger = Arc::new(ledger);

        seed_caches(&ledger, store.as_ref())?;

        let observers = Arc::new(Observers::new());
        let online_weight = Arc::new(OnlineWeight::new(
            ledger.clone(),
            store.clone(),
            config.node.online_weight_minimum,
            config.node.online_weight_window_secs,
        ));
        online_weight.load(deps.clock.now_unix())?;

        let confirmation_height = Arc::new(ConfirmationHeightProcessor::new(
            store.clone(),
            ledger.clone(),
            observers.clone(),
            config.confirmation_height_config(),
        ));

        let active = Arc::new(ActiveTransactions::new(
            ledger.clone(),
            store.clone(),
            deps.clock.clone(),
            config.active_transactions_config(),
            online_weight.clone(),
            observers.clone(),
            deps.peers.clone(),
            confirmation_height.clone(),
        ));

        let block_processor = Arc::new(BlockProcessor::new(
            ledger.clone(),
            store.clone(),
            active.clone(),
            observers.clone(),
            deps.clock.clone(),
            BlockProcessorConfig::default(),
        ));

        Ok(Node {
            store,
            ledger,
            observers,
            metrics,
            online_weight,
            confirmation_height,
            active,
            block_processor,
            config,
            threads: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Submits a block for processing (the entry point network I/O hands
    /// parsed messages to, per `spec.md` §2's data-flow diagram).
    pub fn submit_block(&self, block: Block) {
        self.block_processor.enqueue(block);
    }

    /// Spawns the four dedicated worker threads (`spec.md` §5): block
    /// processor, confirmation-height processor, and the active-transactions
    /// request loop. The vote-processor thread pool is an external
    /// collaborator boundary here (`ActiveTransactions::vote` is the entry
    /// point it calls into) and is not spawned by this crate.
    pub fn start(&self) {
        let mut threads = self.threads.lock().unwrap();

        let bp = self.block_processor.clone();
        threads.push(("block_processor", std::thread::spawn(move || bp.run())));

        let ch = self.confirmation_height.clone();
        threads.push(("confirmation_height", std::thread::spawn(move || ch.run())));

        let active = self.active.clone();
        let ch_queue_len = self.confirmation_height.clone();
        let period = std::time::Duration::from_millis(self.config.active_transactions.request_loop_period_ms);
        threads.push((
            "active_transactions",
            std::thread::spawn(move || active.run_request_loop(period, move || ch_queue_len.queue_len())),
        ));
    }

    /// Signals every worker to stop and joins them in the fixed order from
    /// `spec.md` §5 ("network → block processor → confirmation-height →
    /// active transactions → workers"; no network or worker-pool thread is
    /// spawned by this crate, so only the middle two steps apply).
    pub fn stop(&self) {
        self.block_processor.request_stop();
        self.confirmation_height.request_stop();
        self.active.request_stop();

        let mut threads = self.threads.lock().unwrap();
        for (name, handle) in threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!(thread = name, "worker thread panicked");
            }
        }
    }
}

/// Rebuilds the representative-weight cache and the epoch_2-started latch
/// from store state at startup (`spec.md` §4.1: "maintains in-memory
/// representative-weight cache"; the cache itself is not persisted, only
/// derivable from the accounts table).
fn seed_caches(ledger: &Ledger, store: &dyn Store) -> Result<()> {
    let txn = store.tx_begin_read()?;
    let accounts = txn.iter_accounts()?;
    drop(txn);

    let mut weights: std::collections::HashMap<Account, u128> = std::collections::HashMap::new();
    let mut epoch_2_started = false;
    for (_, info) in &accounts {
        *weights.entry(info.representative).or_insert(0) += info.balance;
        if info.epoch >= crate::types::Epoch(2) {
            epoch_2_started = true;
        }
    }
    for (rep, weight) in weights {
        ledger.rep_weights.add(rep, weight);
    }
    ledger.seed_epoch_2_started(epoch_2_started);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn test_config(data_dir: &Path) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.data_dir = data_dir.to_path_buf();
        config.node.network = crate::config::NetworkKind::Test;
        config
    }

    #[test]
    fn node_wires_subsystems_against_an_in_memory_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let node = Node::with_store(config, NodeDeps::default(), store).unwrap();
        assert_eq!(node.active.len(), 0);
        assert_eq!(node.block_processor.queue_len(), 0);
        assert_eq!(node.confirmation_height.queue_len(), 0);
    }

    #[test]
    fn start_and_stop_join_worker_threads_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let node = Node::with_store(config, NodeDeps::default(), store).unwrap();
        node.start();
        std::thread::sleep(std::time::Duration::from_millis(20));
        node.stop();
    }
}
