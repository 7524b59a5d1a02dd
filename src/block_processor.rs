//! The Block Processor (`spec.md` §2): "Single-threaded pipeline that pulls
//! unvalidated blocks from an input queue, calls Ledger.process, and emits
//! post-events (observers, fork detection)."
//!
//! Gap handling and fork routing follow `spec.md` §7 literally: `gap_*`
//! codes buffer the block in the unchecked table keyed by the missing
//! dependency and re-queue it once that dependency commits; `fork` hands the
//! block to [`ActiveTransactions::insert`] rather than mutating the store.
//! Local recovery (`spec.md` §7 "rollbacks on the same account are attempted
//! when a fork is resolved in favor of the remote side and the local head is
//! on the losing chain") is driven from the same thread by subscribing to
//! the `block_confirmed` observer channel, grounded on the teacher's
//! dedicated-thread-per-subsystem shape in `block_buffer_manager.rs`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::active_transactions::ActiveTransactions;
use crate::blocks::Block;
use crate::ledger::clock::Clock;
use crate::ledger::{Ledger, ProcessCode};
use crate::observers::{BlockConfirmed, Observers};
use crate::store::{Store, UncheckedInfo, UncheckedKey};
use crate::types::{Account, BlockHash};

#[derive(Clone, Copy, Debug)]
pub struct BlockProcessorConfig {
    pub input_queue_capacity: usize,
    /// How many recently-seen blocks are kept in memory so a confirmed
    /// winner that lost the local ledger race can be recommitted without a
    /// bootstrap round-trip (`spec.md` §7 local recovery).
    pub recent_blocks_capacity: usize,
}

impl Default for BlockProcessorConfig {
    fn default() -> Self {
        BlockProcessorConfig { input_queue_capacity: 8_192, recent_blocks_capacity: 4_096 }
    }
}

/// Bounded LRU of blocks this process has itself seen arrive, independent of
/// whether they ever committed. Mirrors the eviction shape of
/// `active_transactions::caches::InactiveVotesCache`.
struct RecentBlocks {
    capacity: usize,
    entries: HashMap<BlockHash, Block>,
    order: VecDeque<BlockHash>,
}

impl RecentBlocks {
    fn new(capacity: usize) -> Self {
        RecentBlocks { capacity, entries: HashMap::new(), order: VecDeque::new() }
    }

    fn insert(&mut self, hash: BlockHash, block: Block) {
        if !self.entries.contains_key(&hash) {
            if self.entries.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(hash);
        }
        self.entries.insert(hash, block);
    }

    fn get(&self, hash: &BlockHash) -> Option<Block> {
        self.entries.get(hash).cloned()
    }
}

/// Which dependency a gap code is blocked on, derived from the block's own
/// fields rather than its (not yet committed) sideband.
fn missing_dependency(block: &Block, code: ProcessCode) -> BlockHash {
    match code {
        ProcessCode::GapPrevious => block.previous(),
        ProcessCode::GapSource => match block {
            Block::Open(b) => b.source,
            Block::Receive(b) => b.source,
            Block::State(b) => BlockHash(b.link.0),
            Block::Send(_) | Block::Change(_) => BlockHash::ZERO,
        },
        _ => BlockHash::ZERO,
    }
}

pub struct BlockProcessor {
    ledger: Arc<Ledger>,
    store: Arc<dyn Store>,
    active: Arc<ActiveTransactions>,
    observers: Arc<Observers>,
    clock: Arc<dyn Clock>,
    sender: Sender<Block>,
    receiver: Receiver<Block>,
    confirmed_rx: Receiver<BlockConfirmed>,
    recent_blocks: Mutex<RecentBlocks>,
    stop: AtomicBool,
}

impl BlockProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<dyn Store>,
        active: Arc<ActiveTransactions>,
        observers: Arc<Observers>,
        clock: Arc<dyn Clock>,
        config: BlockProcessorConfig,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(config.input_queue_capacity);
        let confirmed_rx = observers.subscribe_block_confirmed();
        BlockProcessor {
            ledger,
            store,
            active,
            observers,
            clock,
            sender,
            receiver,
            confirmed_rx,
            recent_blocks: Mutex::new(RecentBlocks::new(config.recent_blocks_capacity)),
            stop: AtomicBool::new(false),
        }
    }

    /// Queues `block` for processing. Blocks if the input queue is full —
    /// the bounded channel named in `spec.md` §5 as a backpressure point.
    pub fn enqueue(&self, block: Block) {
        let _ = self.sender.send(block);
    }

    pub fn queue_len(&self) -> usize {
        self.receiver.len()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Applies one block and dispatches on its result code.
    fn process_one(&self, mut block: Block) -> Result<ProcessCode> {
        let hash = block.hash();
        let mut txn = self.store.tx_begin_write()?;
        let output = self.ledger.process(txn.as_mut(), &mut block)?;

        match output.code {
            ProcessCode::Progress => {
                txn.commit()?;
                tracing::info!(hash = %hash, "block committed");
                self.requeue_unblocked(hash)?;
            }
            ProcessCode::GapPrevious | ProcessCode::GapSource => {
                let dependency = missing_dependency(&block, output.code);
                let key = UncheckedKey { dependency, arrival_time: self.clock.now_unix() };
                txn.put_unchecked(&key, &UncheckedInfo { block: block.clone() })?;
                txn.commit()?;
                tracing::debug!(hash = %hash, dependency = %dependency, "gap; buffered in unchecked table");
            }
            ProcessCode::Fork => {
                let account = self.ledger.account(txn.as_ref(), &block.previous())?.unwrap_or(Account::ZERO);
                drop(txn);
                tracing::info!(hash = %hash, "fork detected; routed to active transactions");
                self.active.insert(account, block);
            }
            ProcessCode::Old => {
                self.try_restart(txn, hash, &block)?;
            }
            other => {
                drop(txn);
                tracing::warn!(hash = %hash, code = ?other, "block rejected");
            }
        }
        Ok(output.code)
    }

    /// `spec.md` §4.2 "Restart": a hash collision with an already-stored
    /// block is ordinarily just `old` and dropped, but the hashable fields
    /// exclude `work` — so a block identical to one recently dropped from
    /// active transactions, differing only by a strictly higher work
    /// value, hashes identically and arrives here as `Old` rather than
    /// `Fork`. If its root is still within the restart window, overwrite
    /// the stored block's work field in place and re-insert the election
    /// (`spec.md` §8 scenario 6; `DESIGN.md` Open Question 2).
    fn try_restart(&self, mut txn: Box<dyn crate::store::WriteTransaction + '_>, hash: BlockHash, candidate: &Block) -> Result<()> {
        use crate::store::WriteTransaction;

        let Some(mut stored) = txn.get_block(&hash)? else {
            drop(txn);
            return Ok(());
        };
        if candidate.work().0 <= stored.work().0 {
            drop(txn);
            return Ok(());
        }
        let Some(account) = self.ledger.account(txn.as_ref(), &hash)? else {
            drop(txn);
            return Ok(());
        };

        let stored_work = stored.work();
        match self.active.restart(account, stored_work, candidate) {
            Some(new_work) => {
                stored.set_work(new_work);
                WriteTransaction::put_block(txn.as_mut(), &hash, &stored)?;
                txn.commit()?;
                tracing::info!(hash = %hash, "election restarted with higher-work resubmission");
            }
            None => drop(txn),
        }
        Ok(())
    }

    /// Re-processes every block previously parked in the unchecked table
    /// waiting on `dependency`, now that it has committed (`spec.md` §7:
    /// "when that dependency later commits, the block is re-queued").
    fn requeue_unblocked(&self, dependency: BlockHash) -> Result<()> {
        let waiting = {
            let txn = self.store.tx_begin_read()?;
            txn.iter_unchecked(&dependency)?
        };
        if waiting.is_empty() {
            return Ok(());
        }
        {
            let mut txn = self.store.tx_begin_write()?;
            for (key, _) in &waiting {
                txn.del_unchecked(key)?;
            }
            txn.commit()?;
        }
        for (_, info) in waiting {
            self.process_one(info.block)?;
        }
        Ok(())
    }

    /// Local recovery (`spec.md` §7): a competing block this process
    /// accepted as its local head loses a fork vote. Roll the local chain
    /// back to the fork point and recommit the confirmed winner, provided it
    /// is still buffered in [`RecentBlocks`].
    fn on_confirmed(&self, event: BlockConfirmed) -> Result<()> {
        let already_committed = self.store.tx_begin_read()?.block_exists(&event.hash)?;
        if already_committed {
            return Ok(());
        }
        let Some(winner) = self.recent_blocks.lock().get(&event.hash) else {
            tracing::warn!(hash = %event.hash, "confirmed winner not locally buffered; cannot resolve fork locally");
            return Ok(());
        };

        {
            let mut txn = self.store.tx_begin_write()?;
            if let Some(info) = txn.get_account(&event.account)? {
                let fork_previous = winner.previous();
                let mut cursor = info.head;
                loop {
                    let Some(block) = txn.get_block(&cursor)? else { break };
                    if block.previous() == fork_previous {
                        self.ledger.rollback(txn.as_mut(), &cursor)?;
                        break;
                    }
                    if block.previous().is_zero() {
                        break;
                    }
                    cursor = block.previous();
                }
            }
            txn.commit()?;
        }

        self.process_one(winner)?;
        Ok(())
    }

    /// The dedicated block-processor thread (`spec.md` §5): alternates
    /// between newly-arrived blocks and confirmations that might require
    /// local fork recovery, waking periodically to check for shutdown.
    pub fn run(self: &Arc<Self>) {
        while !self.stopped() {
            crossbeam_channel::select! {
                recv(self.receiver) -> msg => {
                    if let Ok(block) = msg {
                        self.recent_blocks.lock().insert(block.hash(), block.clone());
                        if let Err(err) = self.process_one(block) {
                            tracing::warn!(error = %err, "block processing failed");
                        }
                    }
                }
                recv(self.confirmed_rx) -> msg => {
                    if let Ok(event) = msg {
                        if let Err(err) = self.on_confirmed(event) {
                            tracing::warn!(error = %err, "fork-resolution after confirmation failed");
                        }
                    }
                }
                default(Duration::from_millis(200)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_transactions::{ActiveTransactionsConfig, OnlineWeight};
    use crate::blocks::{EpochMarkers, StateBlock};
    use crate::collaborators::{Message, PeerId, PeerNetwork};
    use crate::confirmation_height::{ConfirmationHeightConfig, ConfirmationHeightProcessor};
    use crate::ledger::clock::FixedClock;
    use crate::ledger::work::WorkThresholds;
    use crate::store::memory::MemoryStore;
    use crate::types::{Amount, Epoch, Link, Signature, Work};

    struct NullPeers;
    impl PeerNetwork for NullPeers {
        fn broadcast(&self, _message: Message) {}
        fn send_to(&self, _peer: PeerId, _message: Message) {}
    }

    fn state_block(account: Account, previous: BlockHash, representative: Account, balance: Amount, link: Link, work: u64) -> Block {
        Block::State(StateBlock {
            account,
            previous,
            representative,
            balance,
            link,
            signature: Signature::ZERO,
            work: Work(work),
            sideband: None,
        })
    }

    fn harness() -> (Arc<BlockProcessor>, Arc<Ledger>, Arc<dyn Store>) {
        let ledger = Arc::new(Ledger::new(EpochMarkers::new(), WorkThresholds::test(), Arc::new(FixedClock::new(1000))));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let observers = Arc::new(Observers::new());
        let online = Arc::new(OnlineWeight::new(ledger.clone(), store.clone(), 1, 300));
        let peers: Arc<dyn PeerNetwork> = Arc::new(NullPeers);
        let confirmation_height = Arc::new(ConfirmationHeightProcessor::new(store.clone(), ledger.clone(), observers.clone(), ConfirmationHeightConfig::default()));
        let active = Arc::new(ActiveTransactions::new(
            ledger.clone(),
            store.clone(),
            Arc::new(FixedClock::new(1000)),
            ActiveTransactionsConfig::default(),
            online,
            observers.clone(),
            peers,
            confirmation_height,
        ));
        let processor = Arc::new(BlockProcessor::new(ledger.clone(), store.clone(), active, observers, Arc::new(FixedClock::new(1000)), BlockProcessorConfig::default()));
        (processor, ledger, store)
    }

    fn genesis_account() -> Account {
        Account([7u8; 32])
    }

    fn seed_genesis(store: &Arc<dyn Store>, ledger: &Arc<Ledger>) -> BlockHash {
        let account = genesis_account();
        let genesis = state_block(account, BlockHash::ZERO, account, u128::MAX, Link::ZERO, 0);
        let hash = genesis.hash();
        let mut txn = store.tx_begin_write().unwrap();
        let mut b = genesis;
        let output = ledger.process(txn.as_mut(), &mut b).unwrap();
        assert!(output.code.is_progress());
        txn.commit().unwrap();
        hash
    }

    #[test]
    fn progress_commits_and_requeues_gap_blocked_child() {
        let (processor, ledger, store) = harness();
        let genesis_hash = seed_genesis(&store, &ledger);
        let account = genesis_account();
        let destination = Account([1u8; 32]);

        let send = state_block(account, genesis_hash, account, u128::MAX - 100, Link(destination.0), 0);
        let send_hash = send.hash();
        let open = state_block(destination, BlockHash::ZERO, destination, 100, Link(send_hash.0), 0);

        // Child arrives before its dependency: buffered as a gap.
        let code = processor.process_one(open).unwrap();
        assert_eq!(code, ProcessCode::GapSource);
        {
            let txn = store.tx_begin_read().unwrap();
            assert!(txn.get_account(&destination).unwrap().is_none());
        }

        // Dependency commits; the buffered child is re-queued and resolves.
        let code = processor.process_one(send).unwrap();
        assert_eq!(code, ProcessCode::Progress);

        let txn = store.tx_begin_read().unwrap();
        let info = txn.get_account(&destination).unwrap().expect("open block should now be committed");
        assert_eq!(info.balance, 100);
    }

    #[test]
    fn fork_is_routed_to_active_transactions_without_mutating_the_store() {
        let (processor, ledger, store) = harness();
        let genesis_hash = seed_genesis(&store, &ledger);
        let account = genesis_account();

        let send_a = state_block(account, genesis_hash, account, u128::MAX - 100, Link::ZERO, 0);
        let send_b = state_block(account, genesis_hash, account, u128::MAX - 200, Link::ZERO, 0);

        assert_eq!(processor.process_one(send_a.clone()).unwrap(), ProcessCode::Progress);
        let code = processor.process_one(send_b).unwrap();
        assert_eq!(code, ProcessCode::Fork);

        let txn = store.tx_begin_read().unwrap();
        let info = txn.get_account(&account).unwrap().unwrap();
        assert_eq!(info.head, send_a.hash(), "the losing fork never gets committed by process_one alone");
    }
}
