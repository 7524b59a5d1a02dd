//! The Confirmation Height Processor (`spec.md` §4.4): a dedicated worker,
//! not on the block-processor thread, that walks an account's chain forward
//! from its current confirmation height to a newly-confirmed block, cascades
//! into any receive's send-side dependency on another account first, and
//! commits per-account height advances in batches bounded by either item
//! count or a minimum grouping window — capping write-transaction duration
//! and observer latency per `spec.md` §4.4 and `spec.md` §5's backpressure
//! rules.
//!
//! Grounded on `original_source/futurehead/node/confirmation_height_*` (the
//! "unbounded" walk variant; the source's separate "bounded" memory-limited
//! variant is an optimization this crate does not need to replicate, since
//! `spec.md` §4.4 specifies only the recursive-stack algorithm, not the
//! memory-bounding heuristic).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::ledger::Ledger;
use crate::observers::{CementationSource, Observers};
use crate::store::{ConfirmationHeightInfo, ReadTransaction, Store};
use crate::types::{Account, BlockHash};

pub use crate::observers::CementationSource as ConfirmationSource;

/// Thiserror-derived error enum for the confirmation-height subsystem
/// (`SPEC_FULL.md` AMBIENT "error handling"). Composed at the boundary with
/// `anyhow::Result`, matching every other worker's error-handling shape.
#[derive(Debug, thiserror::Error)]
pub enum ConfirmationHeightError {
    #[error("confirmation height: block {0} missing from store")]
    MissingBlock(BlockHash),
}

/// Config knobs named in `spec.md` §4.4 ("Batch size is bounded
/// (`conf_height_processor_batch_min_time` drives the grouping)").
#[derive(Clone, Copy, Debug)]
pub struct ConfirmationHeightConfig {
    /// How long the worker waits, after the first item of a batch arrives,
    /// for more items before committing — bounds write-transaction duration
    /// under load while still coalescing a burst of confirmations.
    pub batch_min_time: Duration,
    /// Hard cap on queue items folded into one commit, regardless of
    /// `batch_min_time`.
    pub max_batch_write_size: usize,
    pub input_queue_capacity: usize,
}

impl Default for ConfirmationHeightConfig {
    fn default() -> Self {
        ConfirmationHeightConfig {
            batch_min_time: Duration::from_millis(500),
            max_batch_write_size: 4_096,
            input_queue_capacity: 16_384,
        }
    }
}

struct AccountWrite {
    new_height: u64,
    new_frontier: BlockHash,
    /// Ascending by height; the order cemented-observer events fire in for
    /// this account (`spec.md` §5 ordering guarantee).
    cemented: Vec<(BlockHash, u64, ConfirmationSource)>,
}

/// Heights advanced so far within one [`ConfirmationHeightProcessor::process_batch`]
/// call, read-through to the store for accounts this batch hasn't touched
/// yet. Lets a later stack entry in the same batch see an earlier entry's
/// not-yet-committed progress, which is what makes cross-account cascades
/// (`spec.md` §8 scenario 4) resolve within a single commit.
#[derive(Default)]
struct BatchAccumulator {
    staged_heights: HashMap<Account, u64>,
    writes: HashMap<Account, AccountWrite>,
}

impl BatchAccumulator {
    fn effective_height(&self, account: &Account, txn: &dyn ReadTransaction) -> Result<u64> {
        if let Some(height) = self.staged_heights.get(account) {
            return Ok(*height);
        }
        Ok(txn.get_confirmation_height(account)?.map(|c| c.height).unwrap_or(0))
    }

    fn stage(&mut self, account: Account, frontier: BlockHash, height: u64, cemented: Vec<(BlockHash, u64, ConfirmationSource)>) {
        self.staged_heights.insert(account, height);
        let entry = self.writes.entry(account).or_insert_with(|| AccountWrite { new_height: 0, new_frontier: BlockHash::ZERO, cemented: Vec::new() });
        entry.new_height = height;
        entry.new_frontier = frontier;
        entry.cemented.extend(cemented);
    }
}

/// The Confirmation Height Processor collaborator.
pub struct ConfirmationHeightProcessor {
    store: Arc<dyn Store>,
    ledger: Arc<Ledger>,
    observers: Arc<Observers>,
    config: ConfirmationHeightConfig,
    sender: Sender<(BlockHash, ConfirmationSource)>,
    receiver: Receiver<(BlockHash, ConfirmationSource)>,
    stop: AtomicBool,
}

impl ConfirmationHeightProcessor {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<Ledger>, observers: Arc<Observers>, config: ConfirmationHeightConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(config.input_queue_capacity);
        ConfirmationHeightProcessor { store, ledger, observers, config, sender, receiver, stop: AtomicBool::new(false) }
    }

    /// Queues `hash` for cementation. Blocks if the input queue is full —
    /// one of the deliberate blocking points named in `spec.md` §5.
    pub fn enqueue(&self, hash: BlockHash, source: ConfirmationSource) {
        let _ = self.sender.send((hash, source));
    }

    /// Current queue depth, exposed so [`crate::active_transactions::ActiveTransactions`]
    /// can throttle frontier-confirmation scans per `spec.md` §5
    /// (`confirmed_frontiers_max_pending_size`).
    pub fn queue_len(&self) -> usize {
        self.receiver.len()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Collects every block between `conf_height` (exclusive) and `target`
    /// (inclusive) by walking `previous()` backward, ascending by height.
    fn walk_chain(&self, txn: &dyn ReadTransaction, target: BlockHash, conf_height: u64) -> Result<Vec<BlockHash>> {
        let mut chain = Vec::new();
        let mut cursor = target;
        loop {
            let Some(block) = txn.get_block(&cursor)? else {
                return Err(ConfirmationHeightError::MissingBlock(cursor).into());
            };
            let height = block.sideband().map(|s| s.height).unwrap_or(0);
            if height <= conf_height {
                break;
            }
            chain.push(cursor);
            if block.previous().is_zero() {
                break;
            }
            cursor = block.previous();
        }
        chain.reverse();
        Ok(chain)
    }

    /// Runs the recursive-stack algorithm (`spec.md` §4.4 steps 1-3) for one
    /// queued `target`, staging any resulting account height advances into
    /// `acc` without committing. `explicit_active` marks the exact hashes
    /// this batch was asked to cement (vs. ancestors/dependencies swept
    /// along), for the `ConfirmationSource` tag on each emitted event.
    fn process_one(&self, txn: &dyn ReadTransaction, target: BlockHash, explicit_active: &std::collections::HashSet<BlockHash>, acc: &mut BatchAccumulator) -> Result<()> {
        let mut stack: Vec<BlockHash> = vec![target];

        while let Some(hash) = stack.pop() {
            let Some(account) = self.ledger.account(txn, &hash)? else {
                tracing::warn!(%hash, "confirmation height: block has no resolvable account, dropping");
                continue;
            };
            let Some(block) = txn.get_block(&hash)? else {
                tracing::warn!(%hash, "confirmation height: block missing from store, dropping");
                continue;
            };
            let target_height = block.sideband().map(|s| s.height).unwrap_or(0);
            let conf_height = acc.effective_height(&account, txn)?;
            if target_height <= conf_height {
                tracing::debug!(%hash, %conf_height, "confirmation height: already cemented");
                continue;
            }

            let chain = self.walk_chain(txn, hash, conf_height)?;

            let mut unmet_dependency = None;
            for chain_hash in &chain {
                let deps = self.ledger.dependent_blocks(txn, chain_hash)?;
                let Some(source_hash) = deps[1] else { continue };
                let Some(source_account) = self.ledger.account(txn, &source_hash)? else { continue };
                let Some(source_height) = txn.get_block(&source_hash)?.and_then(|b| b.sideband().map(|s| s.height)) else { continue };
                let source_conf_height = acc.effective_height(&source_account, txn)?;
                if source_height > source_conf_height {
                    unmet_dependency = Some(source_hash);
                    break;
                }
            }

            if let Some(dependency_hash) = unmet_dependency {
                // Revisit this hash once its dependency is cemented; LIFO
                // order means the dependency is processed next.
                stack.push(hash);
                stack.push(dependency_hash);
                continue;
            }

            let mut cemented = Vec::with_capacity(chain.len());
            for chain_hash in &chain {
                let height = txn.get_block(chain_hash)?.and_then(|b| b.sideband().map(|s| s.height)).unwrap_or(0);
                let source = if explicit_active.contains(chain_hash) { ConfirmationSource::Active } else { ConfirmationSource::Inactive };
                cemented.push((*chain_hash, height, source));
            }
            acc.stage(account, hash, target_height, cemented);
        }
        Ok(())
    }

    /// Processes `items` as one batch: every resulting account-height
    /// advance is committed in a single write transaction, and the cemented
    /// observer fires (ascending height, per account) only after that
    /// commit succeeds. Returns the number of blocks cemented.
    ///
    /// A failure processing one hash is logged and skipped rather than
    /// aborting the whole batch (`spec.md` §7: "on storage error, the
    /// processor logs and continues with the next hash... will be retried
    /// when the block is enqueued again").
    pub fn process_batch(&self, items: &[(BlockHash, ConfirmationSource)]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let explicit_active: std::collections::HashSet<BlockHash> =
            items.iter().filter(|(_, source)| *source == ConfirmationSource::Active).map(|(hash, _)| *hash).collect();

        let txn = self.store.tx_begin_read()?;
        let mut acc = BatchAccumulator::default();
        for (hash, _) in items {
            if let Err(err) = self.process_one(txn.as_ref(), *hash, &explicit_active, &mut acc) {
                tracing::error!(error = %err, %hash, "confirmation height: failed to process hash");
            }
        }
        drop(txn);

        if acc.writes.is_empty() {
            return Ok(0);
        }

        let mut write_txn = self.store.tx_begin_write()?;
        for (account, write) in &acc.writes {
            write_txn.put_confirmation_height(account, &ConfirmationHeightInfo { height: write.new_height, frontier: write.new_frontier })?;
        }
        write_txn.commit()?;

        let mut total = 0;
        for (account, write) in acc.writes {
            for (hash, height, source) in write.cemented {
                total += 1;
                self.observers.notify_cemented(hash, account, height, source);
            }
        }
        Ok(total)
    }

    /// Convenience wrapper for a single hash, processed and committed
    /// immediately — used by callers that enqueue synchronously (tests,
    /// and direct calls outside the dedicated worker thread).
    pub fn cement_now(&self, hash: BlockHash, source: ConfirmationSource) -> Result<usize> {
        self.process_batch(&[(hash, source)])
    }

    /// Dedicated worker thread loop (`spec.md` §5: "Confirmation-height
    /// thread (1): only writer to the confirmation-height table"). Drains
    /// the input queue, grouping items that arrive within `batch_min_time`
    /// of the first into one commit, bounded by `max_batch_write_size`.
    pub fn run(self: &Arc<Self>) {
        let mut batch: Vec<(BlockHash, ConfirmationSource)> = Vec::new();
        while !self.stopped() {
            match self.receiver.recv_timeout(self.config.batch_min_time) {
                Ok(item) => {
                    batch.push(item);
                    while batch.len() < self.config.max_batch_write_size {
                        match self.receiver.try_recv() {
                            Ok(item) => batch.push(item),
                            Err(_) => break,
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !batch.is_empty() {
                if let Err(err) = self.process_batch(&batch) {
                    tracing::error!(error = %err, "confirmation height: batch failed outright");
                }
                batch.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{BlockDetails, EpochMarkers, Sideband, StateBlock};
    use crate::ledger::clock::FixedClock;
    use crate::ledger::work::WorkThresholds;
    use crate::store::memory::MemoryStore;
    use crate::store::{AccountInfo, PendingInfo, PendingKey};
    use crate::types::{Amount, Epoch, Link, Signature, Work};

    fn harness() -> (Arc<ConfirmationHeightProcessor>, Arc<dyn Store>, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::new(EpochMarkers::new(), WorkThresholds::test(), Arc::new(FixedClock::new(1000))));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let observers = Arc::new(Observers::new());
        let processor = Arc::new(ConfirmationHeightProcessor::new(store.clone(), ledger.clone(), observers, ConfirmationHeightConfig::default()));
        (processor, store, ledger)
    }

    fn details(is_send: bool, is_receive: bool) -> BlockDetails {
        BlockDetails { epoch: Epoch::ZERO, is_send, is_receive, is_epoch: false }
    }

    fn state_block(account: Account, previous: BlockHash, link: Link, balance: Amount, height: u64, successor: BlockHash, is_send: bool, is_receive: bool) -> (BlockHash, crate::blocks::Block) {
        let mut block = StateBlock {
            account,
            previous,
            representative: account,
            balance,
            link,
            signature: Signature::ZERO,
            work: Work(0),
            sideband: None,
        };
        let hash = crate::crypto::blake2b_256(&[&block.hashable_bytes()]);
        block.sideband = Some(Sideband { successor, account: None, height, balance: None, timestamp: 1000, details: Some(details(is_send, is_receive)) });
        (hash, crate::blocks::Block::State(block))
    }

    /// `spec.md` §8 scenario 4: confirming a receive advances the
    /// destination account only once its send-side dependency is already
    /// cemented, and each account's advance is committed in one batch.
    #[test]
    fn cascades_across_accounts_when_source_already_cemented() {
        let (processor, store, ledger) = harness();
        let g = Account([1u8; 32]);
        let k = Account([2u8; 32]);

        let (s1_hash, s1) = state_block(g, BlockHash::ZERO, Link(k.0), 900, 1, BlockHash::ZERO, true, false);
        let (s2_hash, s2) = state_block(g, s1_hash, Link(k.0), 800, 2, BlockHash::ZERO, true, false);
        let (o1_hash, o1) = state_block(k, BlockHash::ZERO, Link(s1_hash.0), 100, 1, BlockHash::ZERO, false, true);
        let (r2_hash, r2) = state_block(k, o1_hash, Link(s2_hash.0), 200, 2, BlockHash::ZERO, false, true);

        {
            let mut txn = store.tx_begin_write().unwrap();
            txn.put_block(&s1_hash, &s1).unwrap();
            txn.put_block(&s2_hash, &s2).unwrap();
            txn.put_block(&o1_hash, &o1).unwrap();
            txn.put_block(&r2_hash, &r2).unwrap();
            txn.put_account(&g, &AccountInfo { head: s2_hash, representative: g, open_block: BlockHash::ZERO, balance: 800, modified: 1000, block_count: 2, epoch: Epoch::ZERO }).unwrap();
            txn.put_account(&k, &AccountInfo { head: r2_hash, representative: k, open_block: o1_hash, balance: 200, modified: 1000, block_count: 2, epoch: Epoch::ZERO }).unwrap();
            txn.put_pending(&PendingKey { account: k, hash: s1_hash }, &PendingInfo { source: g, amount: 100, epoch: Epoch::ZERO }).unwrap();
            txn.put_pending(&PendingKey { account: k, hash: s2_hash }, &PendingInfo { source: g, amount: 100, epoch: Epoch::ZERO }).unwrap();
            txn.put_confirmation_height(&g, &ConfirmationHeightInfo::zero()).unwrap();
            txn.put_confirmation_height(&k, &ConfirmationHeightInfo::zero()).unwrap();
            txn.commit().unwrap();
        }
        let _ = ledger;

        // Confirm S2 first: G advances 0 -> 2 in one batch; K is untouched.
        let cemented = processor.cement_now(s2_hash, ConfirmationSource::Active).unwrap();
        assert_eq!(cemented, 2);
        let txn = store.tx_begin_read().unwrap();
        assert_eq!(txn.get_confirmation_height(&g).unwrap().unwrap().height, 2);
        assert_eq!(txn.get_confirmation_height(&k).unwrap().unwrap_or_else(ConfirmationHeightInfo::zero).height, 0);
        drop(txn);

        // Now confirm R2: K's dependency (S2) is already cemented, so K
        // advances 0 -> 2 in one batch.
        let cemented = processor.cement_now(r2_hash, ConfirmationSource::Active).unwrap();
        assert_eq!(cemented, 2);
        let txn = store.tx_begin_read().unwrap();
        assert_eq!(txn.get_confirmation_height(&k).unwrap().unwrap().height, 2);
    }

    #[test]
    fn already_cemented_hash_is_a_no_op() {
        let (processor, store, _ledger) = harness();
        let g = Account([1u8; 32]);
        let (s1_hash, s1) = state_block(g, BlockHash::ZERO, Link::ZERO, 900, 1, BlockHash::ZERO, true, false);
        {
            let mut txn = store.tx_begin_write().unwrap();
            txn.put_block(&s1_hash, &s1).unwrap();
            txn.put_account(&g, &AccountInfo { head: s1_hash, representative: g, open_block: BlockHash::ZERO, balance: 900, modified: 1000, block_count: 1, epoch: Epoch::ZERO }).unwrap();
            txn.put_confirmation_height(&g, &ConfirmationHeightInfo { height: 1, frontier: s1_hash }).unwrap();
            txn.commit().unwrap();
        }
        let cemented = processor.cement_now(s1_hash, ConfirmationSource::Active).unwrap();
        assert_eq!(cemented, 0);
    }

    #[test]
    fn queue_len_reflects_enqueued_items_before_processing() {
        let (processor, _store, _ledger) = harness();
        processor.enqueue(BlockHash([9u8; 32]), ConfirmationSource::Active);
        assert_eq!(processor.queue_len(), 1);
    }
}
