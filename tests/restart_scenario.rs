//! End-to-end coverage of `spec.md` §8 scenario 6 ("Restart a dropped
//! election"): an election ages out and is dropped, and a resubmission of
//! the same block with strictly higher work picks the election back up
//! instead of starting cold, entirely through `ActiveTransactions`'s public
//! surface.

use std::sync::Arc;

use lattice_node::active_transactions::{ActiveTransactions, ActiveTransactionsConfig, OnlineWeight};
use lattice_node::blocks::{Block, EpochMarkers, StateBlock};
use lattice_node::collaborators::{Message, PeerId, PeerNetwork};
use lattice_node::confirmation_height::{ConfirmationHeightConfig, ConfirmationHeightProcessor};
use lattice_node::crypto::KeyPair;
use lattice_node::ledger::clock::FixedClock;
use lattice_node::ledger::work::WorkThresholds;
use lattice_node::ledger::Ledger;
use lattice_node::observers::Observers;
use lattice_node::store::memory::MemoryStore;
use lattice_node::store::Store;
use lattice_node::types::{BlockHash, Link, Work};

struct NullPeers;
impl PeerNetwork for NullPeers {
    fn broadcast(&self, _message: Message) {}
    fn send_to(&self, _peer: PeerId, _message: Message) {}
}

fn signed_state_block(kp: &KeyPair, work: u64) -> StateBlock {
    let mut block = StateBlock::new(kp.account(), BlockHash::ZERO, kp.account(), 1_000, Link::ZERO);
    block.work = Work(work);
    block.signature = kp.sign(&block.hashable_bytes());
    block
}

#[test]
fn higher_work_resubmission_restarts_a_dropped_election() {
    let clock = Arc::new(FixedClock::new(1_000));
    let ledger = Arc::new(Ledger::new(EpochMarkers::new(), WorkThresholds::test(), clock.clone()));
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let observers = Arc::new(Observers::new());
    let online_weight = Arc::new(OnlineWeight::new(ledger.clone(), 1, 300));
    let peers: Arc<dyn PeerNetwork> = Arc::new(NullPeers);
    let confirmation_height =
        Arc::new(ConfirmationHeightProcessor::new(store.clone(), ledger.clone(), observers.clone(), ConfirmationHeightConfig::default()));

    let config = ActiveTransactionsConfig {
        max_election_age_secs: 10,
        passive_grace_period_secs: 0,
        restart_window_secs: 120,
        ..ActiveTransactionsConfig::default()
    };
    let active = Arc::new(ActiveTransactions::new(
        ledger,
        store,
        clock.clone(),
        config,
        online_weight,
        observers,
        peers,
        confirmation_height,
    ));

    let mut rng = rand::thread_rng();
    let kp = KeyPair::generate(&mut rng);
    let account = kp.account();

    let original = signed_state_block(&kp, 1);
    let original_hash = Block::State(original.clone()).hash();
    assert!(active.insert(account, Block::State(original)).inserted);
    assert_eq!(active.len(), 1);

    // Age the election past `max_election_age_secs` and let a tick evict it.
    clock.advance(11);
    active.tick(0).unwrap();
    assert_eq!(active.len(), 0, "an unconfirmed prioritized election expires once it exceeds max_election_age_secs");

    // A resubmission differing only by a strictly higher work value hashes
    // identically (state-block hashable bytes exclude `work`).
    let higher_work = signed_state_block(&kp, 2);
    assert_eq!(Block::State(higher_work.clone()).hash(), original_hash);

    let restarted = active.restart(account, Work(1), &Block::State(higher_work));
    assert_eq!(restarted, Some(Work(2)));
    assert_eq!(active.len(), 1, "restart reinserts the election rather than requiring a cold activation");
}

#[test]
fn stale_work_does_not_restart_a_dropped_election() {
    let clock = Arc::new(FixedClock::new(1_000));
    let ledger = Arc::new(Ledger::new(EpochMarkers::new(), WorkThresholds::test(), clock.clone()));
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let observers = Arc::new(Observers::new());
    let online_weight = Arc::new(OnlineWeight::new(ledger.clone(), 1, 300));
    let peers: Arc<dyn PeerNetwork> = Arc::new(NullPeers);
    let confirmation_height =
        Arc::new(ConfirmationHeightProcessor::new(store.clone(), ledger.clone(), observers.clone(), ConfirmationHeightConfig::default()));
    let config = ActiveTransactionsConfig { max_election_age_secs: 10, passive_grace_period_secs: 0, ..ActiveTransactionsConfig::default() };
    let active = Arc::new(ActiveTransactions::new(ledger, store, clock.clone(), config, online_weight, observers, peers, confirmation_height));

    let mut rng = rand::thread_rng();
    let kp = KeyPair::generate(&mut rng);
    let account = kp.account();
    let original = signed_state_block(&kp, 5);
    active.insert(account, Block::State(original));
    clock.advance(11);
    active.tick(0).unwrap();
    assert_eq!(active.len(), 0);

    let same_work = signed_state_block(&kp, 5);
    let restarted = active.restart(account, Work(5), &Block::State(same_work));
    assert_eq!(restarted, None, "equal work must not restart the election (spec requires strictly higher work)");
    assert_eq!(active.len(), 0);
}
