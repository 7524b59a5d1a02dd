//! The election scheduler (`spec.md` §4.2): a dual-indexed collection of
//! live [`Election`]s (by qualified root, and by adjusted-difficulty
//! multiplier descending), the soft cap / prioritized-cutoff policy, the
//! adjusted-multiplier DAG pass, the request-loop tick sequence, vote
//! ingress, and the three bounded caches from [`caches`].
//!
//! Owns every election uniquely (REDESIGN FLAG, `spec.md` §9): callers never
//! hold a borrowed `&Election` across a lock release. All mutation goes
//! through `&self` methods that take the single [`parking_lot::Mutex`] for
//! their duration, matching the "acquisition order is always active →
//! election, never the reverse" rule in `spec.md` §5.

pub mod caches;
pub mod election;
pub mod multiplier;
pub mod online_weight;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use rand::Rng;

use crate::blocks::Block;
use crate::collaborators::{Message, PeerNetwork};
use crate::confirmation_height::{ConfirmationHeightProcessor, ConfirmationSource};
use crate::ledger::clock::Clock;
use crate::ledger::Ledger;
use crate::observers::Observers;
use crate::store::{ConfirmationHeightInfo, ReadTransaction, Store};
use crate::types::{Account, Amount, BlockHash, QualifiedRoot};
use crate::vote::Vote;

pub use caches::{InactiveVotesCache, RecentlyConfirmedCache, RecentlyDroppedCache};
pub use election::{Election, ElectionState, TransitionOutcome, VoteCode};
pub use online_weight::OnlineWeight;

/// Config knobs named in `spec.md` §4.2.
#[derive(Clone, Copy, Debug)]
pub struct ActiveTransactionsConfig {
    /// Soft cap `N` (typical 5k).
    pub soft_cap: usize,
    /// Election time-to-live before an unconfirmed, non-prioritized
    /// election is evicted while the cap is exceeded.
    pub election_time_to_live_secs: u64,
    /// Maximum age before any election is force-expired regardless of cap
    /// pressure (`Election::transition_time`'s `max_age_secs`).
    pub max_election_age_secs: u64,
    /// Grace period before a freshly-inserted election moves from `passive`
    /// to `active`.
    pub passive_grace_period_secs: u64,
    /// Ring-buffer length for the trended-multiplier moving average.
    pub multiplier_history_window: usize,
    pub quorum_fraction: f64,
    /// Restart-eligibility window for dropped elections (`spec.md` §4.2
    /// "Restart"): 2 minutes.
    pub restart_window_secs: u64,
    /// Replay/tombstone TTL for the recently-confirmed cache.
    pub recently_confirmed_ttl_secs: u64,
    pub inactive_votes_cache_capacity: usize,
    pub recently_dropped_cache_capacity: usize,
    pub recently_confirmed_cache_capacity: usize,
    /// Confirm-req rounds an election may run without reaching quorum
    /// before its dependencies are queued for proactive activation
    /// (`spec.md` §4.2 step 5).
    pub dependency_activation_threshold: u32,
    /// Accounts scanned per request-loop tick by frontier confirmation
    /// (`spec.md` §4.2 step 3).
    pub frontier_confirmation_budget: usize,
    /// Throttles frontier-confirmation scans once the confirmation-height
    /// queue grows this deep (`spec.md` §5 "backpressure").
    pub confirmed_frontiers_max_pending_size: usize,
    /// Probability (0.0-1.0) of rebroadcasting a vote from a non-principal
    /// representative (`spec.md` §4.2 "Vote ingress").
    pub vote_rebroadcast_probability: f64,
    pub base_difficulty: u64,
    pub entry_threshold: u64,
    pub max_work_generate_difficulty: u64,
}

impl ActiveTransactionsConfig {
    /// `max(1, N/10)`, per `spec.md` §4.2.
    pub fn prioritized_cutoff(&self) -> usize {
        std::cmp::max(1, self.soft_cap / 10)
    }
}

impl Default for ActiveTransactionsConfig {
    fn default() -> Self {
        ActiveTransactionsConfig {
            soft_cap: 5_000,
            election_time_to_live_secs: 120,
            max_election_age_secs: 900,
            passive_grace_period_secs: 5,
            multiplier_history_window: 64,
            quorum_fraction: 0.67,
            restart_window_secs: 120,
            recently_confirmed_ttl_secs: 60,
            inactive_votes_cache_capacity: 16_384,
            recently_dropped_cache_capacity: 16_384,
            recently_confirmed_cache_capacity: 65_536,
            dependency_activation_threshold: 4,
            frontier_confirmation_budget: 128,
            confirmed_frontiers_max_pending_size: 1_000,
            vote_rebroadcast_probability: 0.5,
            base_difficulty: 0xffff_ffc0_0000_0000,
            entry_threshold: 0xffff_ffc0_0000_0000,
            max_work_generate_difficulty: 0xffff_ffff_0000_0000,
        }
    }
}

/// Total ordering over `f64` adjusted multipliers via `total_cmp`, so they
/// can key a `BTreeSet` (`spec.md` §9: "Timestamp-driven caches... ordered
/// maps... O(log n)"; the same shape applies to the multiplier index).
/// NaN never occurs here (multipliers are derived from bounded difficulty
/// ratios), but `total_cmp` still gives a coherent order if it ever did.
#[derive(Clone, Copy, Debug)]
struct OrderedMultiplier(f64);

impl PartialEq for OrderedMultiplier {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}
impl Eq for OrderedMultiplier {}
impl PartialOrd for OrderedMultiplier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedMultiplier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InsertResult {
    pub inserted: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VoteProcessingResult {
    Vote,
    Replay,
    Indeterminate,
}

struct Inner {
    by_root: HashMap<QualifiedRoot, Election>,
    /// Ascending by multiplier; callers iterate `.rev()` for the descending
    /// priority order `spec.md` §4.2 requires.
    by_multiplier: BTreeSet<(OrderedMultiplier, QualifiedRoot)>,
    current_key: HashMap<QualifiedRoot, OrderedMultiplier>,
    hash_to_root: HashMap<BlockHash, QualifiedRoot>,
    worklist: std::collections::HashSet<QualifiedRoot>,
    /// Hash -> sideband height, queued by stuck elections (`spec.md` §4.2
    /// step 5); grounded on `original_source/futurehead/node/
    /// active_transactions.cpp`'s `pending_dependencies` map shape.
    pending_dependencies: HashMap<BlockHash, u64>,
    last_prioritized_multiplier: f64,
    trended_history: VecDeque<f64>,
    trended_active_multiplier: f64,
    recently_confirmed: RecentlyConfirmedCache,
    recently_dropped: RecentlyDroppedCache,
    inactive_votes: InactiveVotesCache,
}

/// The election scheduler itself.
pub struct ActiveTransactions {
    ledger: Arc<Ledger>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: ActiveTransactionsConfig,
    online_weight: Arc<OnlineWeight>,
    observers: Arc<Observers>,
    peers: Arc<dyn PeerNetwork>,
    confirmation_height: Arc<ConfirmationHeightProcessor>,
    inner: parking_lot::Mutex<Inner>,
    stop: AtomicBool,
}

impl ActiveTransactions {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: ActiveTransactionsConfig,
        online_weight: Arc<OnlineWeight>,
        observers: Arc<Observers>,
        peers: Arc<dyn PeerNetwork>,
        confirmation_height: Arc<ConfirmationHeightProcessor>,
    ) -> Self {
        ActiveTransactions {
            ledger,
            store,
            clock,
            online_weight,
            observers,
            peers,
            confirmation_height,
            inner: parking_lot::Mutex::new(Inner {
                by_root: HashMap::new(),
                by_multiplier: BTreeSet::new(),
                current_key: HashMap::new(),
                hash_to_root: HashMap::new(),
                worklist: std::collections::HashSet::new(),
                pending_dependencies: HashMap::new(),
                last_prioritized_multiplier: 0.0,
                trended_history: VecDeque::new(),
                trended_active_multiplier: 1.0,
                recently_confirmed: RecentlyConfirmedCache::new(config.recently_confirmed_cache_capacity, config.recently_confirmed_ttl_secs),
                recently_dropped: RecentlyDroppedCache::new(config.recently_dropped_cache_capacity),
                inactive_votes: InactiveVotesCache::new(config.inactive_votes_cache_capacity),
            }),
            config,
            stop: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn trended_active_multiplier(&self) -> f64 {
        self.inner.lock().trended_active_multiplier
    }

    /// `active_difficulty`, clamped to `[entry_threshold,
    /// max_work_generate_difficulty]` (`spec.md` §4.2 step 2).
    pub fn active_difficulty(&self) -> u64 {
        let multiplier = self.trended_active_multiplier();
        let difficulty = multiplier::from_multiplier(multiplier, self.config.base_difficulty);
        difficulty.clamp(self.config.entry_threshold, self.config.max_work_generate_difficulty)
    }

    fn compute_multiplier(&self, block: &Block) -> f64 {
        let details = block.sideband().and_then(|s| s.details).unwrap_or(crate::blocks::BlockDetails {
            epoch: crate::types::Epoch::ZERO,
            is_send: false,
            is_receive: false,
            is_epoch: false,
        });
        let own_base = self.ledger.work.threshold_for(details);
        let account = block.account().unwrap_or(Account::ZERO);
        let root = crate::ledger::work::pow_root(block.previous(), account);
        let raw_difficulty = crate::crypto::work_value(&root, block.work());
        let raw_multiplier = multiplier::to_multiplier(raw_difficulty, own_base);
        multiplier::normalized_multiplier(raw_multiplier, own_base, self.ledger.work.epoch_1)
    }

    fn index_insert(&self, inner: &mut Inner, root: QualifiedRoot, value: f64) {
        let key = OrderedMultiplier(value);
        inner.by_multiplier.insert((key, root));
        inner.current_key.insert(root, key);
    }

    fn index_remove(&self, inner: &mut Inner, root: &QualifiedRoot) {
        if let Some(key) = inner.current_key.remove(root) {
            inner.by_multiplier.remove(&(key, *root));
        }
    }

    fn index_requeue(&self, inner: &mut Inner, root: QualifiedRoot, value: f64) {
        self.index_remove(inner, &root);
        self.index_insert(inner, root, value);
    }

    /// `last_prioritized_multiplier` update path, matching the original's
    /// `update_active_multiplier`'s heuristic (`original_source/futurehead/
    /// node/active_transactions.cpp`): computed only once the election
    /// count reaches `prioritized_cutoff`, resolving `spec.md` §9's open
    /// question about the publish-threshold edge policy by following the
    /// source's exact gate rather than inventing a new one (see
    /// `DESIGN.md`).
    fn recompute_trended_multiplier(&self, inner: &mut Inner) {
        let cutoff = self.config.prioritized_cutoff();
        let mut prioritized: Vec<f64> = Vec::with_capacity(cutoff);
        if inner.by_root.len() >= cutoff {
            for (key, root) in inner.by_multiplier.iter().rev() {
                if prioritized.len() >= cutoff {
                    break;
                }
                if let Some(election) = inner.by_root.get(root) {
                    if election.state() != ElectionState::ConfirmedQuorum {
                        prioritized.push(key.0);
                    }
                }
            }
        }
        let multiplier = if prioritized.len() > 10 {
            prioritized[prioritized.len() / 2]
        } else {
            1.0
        };
        inner.last_prioritized_multiplier = prioritized.last().copied().unwrap_or(0.0);

        inner.trended_history.push_front(multiplier);
        if inner.trended_history.len() > self.config.multiplier_history_window {
            inner.trended_history.pop_back();
        }
        let avg = inner.trended_history.iter().sum::<f64>() / inner.trended_history.len() as f64;
        inner.trended_active_multiplier = avg;
        self.observers.notify_difficulty(self.active_difficulty());
    }

    /// `update_adjusted_multiplier` (`spec.md` §4.2 "Adjusted multiplier").
    /// Builds the per-election DAG node list from each queued election's
    /// winner dependencies plus its recorded `dependent_blocks` back-edges,
    /// runs the BFS pass in [`multiplier`], and writes the results back.
    fn recompute_adjusted_multipliers(&self, inner: &mut Inner) -> Result<()> {
        if inner.worklist.is_empty() {
            return Ok(());
        }
        let txn = self.store.tx_begin_read()?;
        let mut nodes = HashMap::new();
        for root in inner.worklist.drain().collect::<Vec<_>>() {
            let Some(election) = inner.by_root.get(&root) else { continue };
            let winner = election.winner();
            let deps = self.ledger.dependent_blocks(txn.as_ref(), &winner)?;
            let mut parents: Vec<BlockHash> = deps.into_iter().flatten().collect();
            parents.retain(|h| inner.hash_to_root.contains_key(h));
            let children: Vec<BlockHash> = election.dependent_blocks().iter().copied().filter(|h| inner.hash_to_root.contains_key(h)).collect();
            nodes.insert(winner, multiplier::DagNode { hash: winner, multiplier: election.multiplier(), parents, children });
        }
        let adjusted = multiplier::update_adjusted_multipliers(&nodes);
        for (hash, value) in adjusted {
            let Some(root) = inner.hash_to_root.get(&hash).copied() else { continue };
            if let Some(election) = inner.by_root.get_mut(&root) {
                election.set_adjusted_multiplier(value);
            }
            self.index_requeue(inner, root, value);
        }
        Ok(())
    }

    /// `insert(block, ...)` (`spec.md` §4.2). `account` is the chain this
    /// block belongs to (already resolved by the caller via
    /// `Ledger::account`, typically from `ProcessOutput`).
    pub fn insert(&self, account: Account, block: Block) -> InsertResult {
        let now = self.clock.now_unix();
        let root = block.root(account);
        let hash = block.hash();
        let stake = self.online_weight.stake();
        let mut inner = self.inner.lock();

        if inner.by_root.contains_key(&root) {
            let new_multiplier = self.compute_multiplier(&block);
            let election = inner.by_root.get_mut(&root).expect("just checked contains_key");
            let (inserted_block, quorum_reached) = election.publish(block, stake);
            if inserted_block {
                inner.hash_to_root.insert(hash, root);
            }
            let raised = election.raise_multiplier(new_multiplier);
            if raised {
                inner.worklist.insert(root);
                let value = election.adjusted_multiplier();
                self.index_requeue(&mut inner, root, value);
            }
            if quorum_reached {
                self.confirm_election(&mut inner, root, now);
            }
            return InsertResult { inserted: false };
        }

        inner.recently_confirmed.evict_expired(now);
        if inner.recently_confirmed.contains_root(&root) {
            return InsertResult { inserted: false };
        }

        let multiplier = self.compute_multiplier(&block);
        let cutoff = self.config.prioritized_cutoff();
        let live = inner.by_root.len();
        let prioritized = live < cutoff || multiplier > inner.last_prioritized_multiplier;

        let mut election = Election::new(self.ledger.clone(), self.clock.clone(), account, block, self.config.quorum_fraction, prioritized, multiplier);

        let mut quorum_reached = false;
        if let Some(preloaded) = inner.inactive_votes.take(&hash) {
            for voter in preloaded.voters {
                let outcome = election.vote(voter, 0, hash, stake);
                quorum_reached |= outcome.quorum_reached;
            }
        }

        inner.hash_to_root.insert(hash, root);
        self.index_insert(&mut inner, root, election.adjusted_multiplier());
        inner.by_root.insert(root, election);
        inner.worklist.insert(root);
        inner.recently_dropped.remove(&root);

        // Preloaded inactive votes can already carry quorum the instant the
        // election is constructed (`spec.md` §8 scenario 3: "the vote
        // arrives before the block does... the election constructed on
        // publish() immediately retallies... quorum met").
        if quorum_reached {
            self.confirm_election(&mut inner, root, now);
        }

        InsertResult { inserted: true }
    }

    /// `restart` (`spec.md` §4.2): a block sharing a hash with one recently
    /// dropped, whose work (the only field that can differ without
    /// changing the hash) is now strictly higher, restarts the election in
    /// place.
    pub fn restart(&self, account: Account, stored_work: crate::types::Work, candidate: &Block) -> Option<crate::types::Work> {
        let now = self.clock.now_unix();
        let root = candidate.root(account);
        let mut inner = self.inner.lock();
        if !inner.recently_dropped.eligible_for_restart(&root, now, self.config.restart_window_secs) {
            return None;
        }
        if candidate.work().0 <= stored_work.0 {
            return None;
        }
        inner.recently_dropped.remove(&root);
        drop(inner);
        self.insert(account, candidate.clone());
        Some(candidate.work())
    }

    fn confirm_election(&self, inner: &mut Inner, root: QualifiedRoot, now: u64) {
        let Some(mut election) = inner.by_root.remove(&root) else { return };
        self.index_remove(inner, &root);
        let winner = election.winner();
        for hash in election.cleanup() {
            inner.hash_to_root.remove(&hash);
        }
        inner.recently_confirmed.insert(now, root, winner);
        inner.pending_dependencies.remove(&winner);
        let winner_block = election.winner_block();
        let account = winner_block.account().or_else(|| winner_block.sideband().and_then(|s| s.account)).unwrap_or(Account::ZERO);
        let tally = election.tally().get(&winner).copied().unwrap_or(0);
        self.observers.notify_block_confirmed(winner, account, tally);
        self.confirmation_height.enqueue(winner, ConfirmationSource::Active);
    }

    /// Evicts `root` without confirming it (cap pressure or max-age expiry);
    /// the block stays in `recently_dropped` so a higher-work resubmission
    /// within the restart window (`spec.md` §4.2 "Restart") can pick the
    /// election back up instead of starting cold.
    fn drop_election(&self, inner: &mut Inner, root: QualifiedRoot, now: u64) {
        let Some(mut election) = inner.by_root.remove(&root) else { return };
        self.index_remove(inner, &root);
        for hash in election.cleanup() {
            inner.hash_to_root.remove(&hash);
        }
        inner.recently_dropped.insert(root, now);
        self.observers.notify_active_stopped(election.winner());
    }

    /// `vote(vote) -> {vote | replay | indeterminate}` (`spec.md` §4.2).
    pub fn vote(&self, vote: &Vote, is_principal_representative: bool) -> VoteProcessingResult {
        let now = self.clock.now_unix();
        self.online_weight.observe(vote.account, now);
        let stake = self.online_weight.stake();
        let mut any_vote = false;
        let mut any_non_replay = false;
        let mut inner = self.inner.lock();
        inner.recently_confirmed.evict_expired(now);

        for hash in vote.hashes() {
            if let Some(root) = inner.hash_to_root.get(&hash).copied() {
                any_non_replay = true;
                let outcome = {
                    let election = inner.by_root.get_mut(&root).expect("hash_to_root is consistent with by_root");
                    election.vote(vote.account, vote.sequence, hash, stake)
                };
                if outcome.code == VoteCode::Vote {
                    any_vote = true;
                }
                if outcome.quorum_reached {
                    self.confirm_election(&mut inner, root, now);
                }
            } else if inner.recently_confirmed.contains_hash(&hash) {
                // replay; nothing to do
            } else {
                any_non_replay = true;
                let is_new_signal = inner.inactive_votes.insert(hash, vote.account);
                if is_new_signal {
                    let entry = inner.inactive_votes.get(&hash).expect("just inserted");
                    let summed: Amount = entry.voters.iter().map(|v| self.ledger.weight(v)).fold(0, |a, w| a.saturating_add(w));
                    if summed >= self.online_weight.minimum() && !entry.bootstrap_scheduled {
                        inner.inactive_votes.mark_bootstrap_scheduled(&hash);
                        // Lazy bootstrap request is dispatched by the caller
                        // via the `Bootstrapper` collaborator once this
                        // returns; modeled here only as the scheduling
                        // decision (`spec.md` §4.2, §1 scope carve-out).
                    }
                }
            }
        }
        drop(inner);

        if !is_principal_representative {
            let mut rng = rand::thread_rng();
            if rng.gen_bool(self.config.vote_rebroadcast_probability.clamp(0.0, 1.0)) {
                self.peers.broadcast(Message::Vote(vote.clone()));
            }
        }

        if any_vote {
            VoteProcessingResult::Vote
        } else if !any_non_replay {
            VoteProcessingResult::Replay
        } else {
            VoteProcessingResult::Indeterminate
        }
    }

    fn can_vote(&self, txn: &dyn ReadTransaction, hash: &BlockHash) -> Result<bool> {
        let deps = self.ledger.dependent_blocks(txn, hash)?;
        for dep in deps.into_iter().flatten() {
            let Some(dep_account) = self.ledger.account(txn, &dep)? else { return Ok(false) };
            let dep_height = txn.get_block(&dep)?.and_then(|b| b.sideband().map(|s| s.height)).unwrap_or(0);
            let conf = txn.get_confirmation_height(&dep_account)?.unwrap_or_else(ConfirmationHeightInfo::zero);
            if dep_height > conf.height {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `activate(account)` (`spec.md` §4.2): inserts an election on the
    /// first uncemented block past the account's confirmation height, if
    /// its dependencies are already cemented.
    pub fn activate(&self, txn: &dyn ReadTransaction, account: Account) -> Result<bool> {
        let conf = txn.get_confirmation_height(&account)?.unwrap_or_else(ConfirmationHeightInfo::zero);
        let Some(info) = txn.get_account(&account)? else { return Ok(false) };
        if info.block_count <= conf.height {
            return Ok(false);
        }
        let next_hash = if conf.height == 0 {
            info.open_block
        } else {
            let Some(frontier_block) = txn.get_block(&conf.frontier)? else { return Ok(false) };
            let Some(sideband) = frontier_block.sideband() else { return Ok(false) };
            sideband.successor
        };
        if next_hash.is_zero() {
            return Ok(false);
        }
        if !self.can_vote(txn, &next_hash)? {
            return Ok(false);
        }
        let Some(block) = txn.get_block(&next_hash)? else { return Ok(false) };
        Ok(self.insert(account, block).inserted)
    }

    fn walk_back(&self, txn: &dyn ReadTransaction, start: BlockHash, steps: u64) -> Result<Option<BlockHash>> {
        let mut cursor = start;
        for _ in 0..steps {
            let Some(block) = txn.get_block(&cursor)? else { return Ok(None) };
            if block.previous().is_zero() {
                return Ok(None);
            }
            cursor = block.previous();
        }
        Ok(Some(cursor))
    }

    /// Step 5 ("Activate dependencies") of the request-loop tick.
    fn activate_dependencies(&self) -> Result<()> {
        let pending: Vec<(BlockHash, u64)> = {
            let mut inner = self.inner.lock();
            inner.pending_dependencies.drain().collect()
        };
        if pending.is_empty() {
            return Ok(());
        }
        let txn = self.store.tx_begin_read()?;
        for (hash, height) in pending {
            let Some(block) = txn.get_block(&hash)? else { continue };
            let previous = block.previous();
            if !previous.is_zero() {
                if let Some(account) = self.ledger.account(txn.as_ref(), &hash)? {
                    let conf = txn.get_confirmation_height(&account)?.unwrap_or_else(ConfirmationHeightInfo::zero);
                    if height > conf.height + 1 {
                        let successor_hash = if conf.height == 0 {
                            txn.get_account(&account)?.map(|i| i.open_block)
                        } else {
                            txn.get_block(&conf.frontier)?.and_then(|b| b.sideband().map(|s| s.successor))
                        };
                        if let Some(successor_hash) = successor_hash {
                            if !successor_hash.is_zero() {
                                if self.can_vote(txn.as_ref(), &successor_hash)? {
                                    if let Some(successor_block) = txn.get_block(&successor_hash)? {
                                        let result = self.insert(account, successor_block);
                                        if result.inserted {
                                            self.add_dependent(&successor_hash, hash);
                                        }
                                    }
                                }
                            }
                        }
                    }
                    if height > conf.height + 2 {
                        let jumps = std::cmp::min(128, (height - conf.height) / 2);
                        if let Some(bisect_hash) = self.walk_back(txn.as_ref(), hash, jumps)? {
                            if self.can_vote(txn.as_ref(), &bisect_hash)? {
                                if let Some(bisect_block) = txn.get_block(&bisect_hash)? {
                                    let result = self.insert(account, bisect_block);
                                    if result.inserted {
                                        self.add_dependent(&bisect_hash, hash);
                                    }
                                }
                            }
                        }
                    }
                }
            }
            let deps = self.ledger.dependent_blocks(txn.as_ref(), &hash)?;
            if let Some(source_hash) = deps[1] {
                if source_hash != previous && !self.inner.lock().hash_to_root.contains_key(&source_hash) {
                    if let Some(source_account) = self.ledger.account(txn.as_ref(), &source_hash)? {
                        let conf = txn.get_confirmation_height(&source_account)?.unwrap_or_else(ConfirmationHeightInfo::zero);
                        let source_height = txn.get_block(&source_hash)?.and_then(|b| b.sideband().map(|s| s.height)).unwrap_or(0);
                        if source_height > conf.height {
                            if let Some(source_block) = txn.get_block(&source_hash)? {
                                let result = self.insert(source_account, source_block);
                                if result.inserted {
                                    self.add_dependent(&source_hash, hash);
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn add_dependent(&self, root_hash: &BlockHash, dependent: BlockHash) {
        let mut inner = self.inner.lock();
        if let Some(root) = inner.hash_to_root.get(root_hash).copied() {
            if let Some(election) = inner.by_root.get_mut(&root) {
                election.add_dependent(dependent);
                inner.worklist.insert(root);
            }
        }
    }

    /// Frontier confirmation (`spec.md` §4.2 step 3): with the confirmation
    /// height queue shallow and the node not bootstrapping, activate the
    /// accounts with the most uncemented blocks, up to the configured
    /// budget.
    fn frontier_confirmation(&self, confirmation_height_queue_len: usize) -> Result<()> {
        if confirmation_height_queue_len >= self.config.confirmed_frontiers_max_pending_size {
            return Ok(());
        }
        let txn = self.store.tx_begin_read()?;
        let mut candidates: Vec<(Account, u64)> = Vec::new();
        for (account, info) in txn.iter_accounts()? {
            let conf = txn.get_confirmation_height(&account)?.unwrap_or_else(ConfirmationHeightInfo::zero);
            if info.block_count > conf.height {
                candidates.push((account, info.block_count - conf.height));
            }
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        for (account, _) in candidates.into_iter().take(self.config.frontier_confirmation_budget) {
            self.activate(txn.as_ref(), account)?;
        }
        Ok(())
    }

    /// One request-loop tick (`spec.md` §4.2 "Request loop"). Returns the
    /// set of winner blocks that should be rebroadcast / confirm-req'd this
    /// tick, for the caller to hand to the `PeerNetwork` collaborator.
    pub fn tick(&self, confirmation_height_queue_len: usize) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            self.recompute_adjusted_multipliers(&mut inner)?;
            self.recompute_trended_multiplier(&mut inner);
        }

        self.frontier_confirmation(confirmation_height_queue_len)?;

        let now = self.clock.now_unix();
        let roots_in_order: Vec<QualifiedRoot> = {
            let inner = self.inner.lock();
            inner.by_multiplier.iter().rev().map(|(_, root)| *root).collect()
        };

        let mut expired = Vec::new();
        for root in roots_in_order {
            let mut inner = self.inner.lock();
            let Some(election) = inner.by_root.get_mut(&root) else { continue };
            let outcome = election.transition_time(self.config.passive_grace_period_secs, self.config.max_election_age_secs);
            match outcome {
                TransitionOutcome::Continue => {}
                TransitionOutcome::BroadcastWinner(block) => {
                    let prioritized = election.prioritized;
                    let winner_hash = election.winner();
                    if election.confirmation_request_count >= self.config.dependency_activation_threshold {
                        if let Some(height) = block.sideband().map(|s| s.height) {
                            inner.pending_dependencies.insert(winner_hash, height);
                        }
                    }
                    drop(inner);
                    // Only prioritized elections (top-`cutoff` by adjusted
                    // multiplier) get active rebroadcast/confirm-req;
                    // non-prioritized elections persist and can still be
                    // confirmed by incoming votes (`spec.md` §4.2).
                    if prioritized {
                        self.peers.broadcast(Message::PublishBlock(block.clone()));
                        self.peers.broadcast(Message::ConfirmReq(winner_hash));
                    }
                }
                TransitionOutcome::Expired => {
                    // Non-prioritized elections only get force-evicted once
                    // the soft cap is actually under pressure; prioritized
                    // elections expire outright at `max_election_age_secs`
                    // regardless, matching `spec.md` §4.2's distinction.
                    if election.prioritized || inner.by_root.len() > self.config.soft_cap {
                        expired.push(root);
                    }
                }
            }
        }
        let mut inner = self.inner.lock();
        for root in expired {
            self.drop_election(&mut inner, root, now);
        }
        drop(inner);

        self.activate_dependencies()?;
        Ok(())
    }

    /// Runs `tick()` on `period` until [`Self::request_stop`] is called.
    /// The dedicated request-loop thread per `spec.md` §5.
    pub fn run_request_loop(self: &Arc<Self>, period: std::time::Duration, confirmation_height_queue_len: impl Fn() -> usize) {
        while !self.stopped() {
            if let Err(err) = self.tick(confirmation_height_queue_len()) {
                tracing::warn!(error = %err, "active transactions tick failed");
            }
            std::thread::sleep(period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{EpochMarkers, StateBlock};
    use crate::collaborators::PeerId;
    use crate::ledger::clock::FixedClock;
    use crate::ledger::work::WorkThresholds;
    use crate::observers::Observers;
    use crate::store::memory::MemoryStore;
    use crate::types::{Epoch, Link, Signature, Work};

    struct NullPeers;
    impl PeerNetwork for NullPeers {
        fn broadcast(&self, _message: Message) {}
        fn send_to(&self, _peer: PeerId, _message: Message) {}
    }

    fn harness() -> (Arc<ActiveTransactions>, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::new(EpochMarkers::new(), WorkThresholds::test(), Arc::new(FixedClock::new(1000))));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let online = Arc::new(OnlineWeight::new(ledger.clone(), store.clone(), 1, 300));
        let observers = Arc::new(Observers::new());
        let peers: Arc<dyn PeerNetwork> = Arc::new(NullPeers);
        let confirmation_height = Arc::new(ConfirmationHeightProcessor::new(
            store.clone(),
            ledger.clone(),
            observers.clone(),
            crate::confirmation_height::ConfirmationHeightConfig::default(),
        ));
        let active = Arc::new(ActiveTransactions::new(
            ledger.clone(),
            store,
            Arc::new(FixedClock::new(1000)),
            ActiveTransactionsConfig::default(),
            online,
            observers,
            peers,
            confirmation_height,
        ));
        (active, ledger)
    }

    fn state_block(account: Account, previous: BlockHash, balance: Amount, work: u64) -> Block {
        Block::State(StateBlock {
            account,
            previous,
            representative: account,
            balance,
            link: Link::ZERO,
            signature: Signature::ZERO,
            work: Work(work),
            sideband: Some(crate::blocks::Sideband {
                successor: BlockHash::ZERO,
                account: None,
                height: 1,
                balance: None,
                timestamp: 1000,
                details: Some(crate::blocks::BlockDetails { epoch: Epoch::ZERO, is_send: false, is_receive: false, is_epoch: false }),
            }),
        })
    }

    #[test]
    fn insert_creates_election_and_vote_reaches_quorum() {
        let (active, ledger) = harness();
        let rep = Account([9u8; 32]);
        ledger.rep_weights.add(rep, 1_000);
        active.online_weight.observe(rep, 1000);

        let account = Account([1u8; 32]);
        let block = state_block(account, BlockHash::ZERO, 100, 1);
        let hash = block.hash();
        let result = active.insert(account, block);
        assert!(result.inserted);
        assert_eq!(active.len(), 1);

        let vote = crate::vote::Vote { account: rep, signature: Signature::ZERO, sequence: 1, elements: vec![crate::vote::VoteElement::Hash(hash)] };
        let outcome = active.vote(&vote, true);
        assert_eq!(outcome, VoteProcessingResult::Vote);
        assert_eq!(active.len(), 0, "confirmed election is removed from the active index");
    }

    #[test]
    fn inserting_existing_root_does_not_duplicate_election() {
        let (active, _ledger) = harness();
        let account = Account([1u8; 32]);
        let block_a = state_block(account, BlockHash::ZERO, 100, 1);
        let block_b = state_block(account, BlockHash::ZERO, 200, 1);
        assert!(active.insert(account, block_a).inserted);
        assert!(!active.insert(account, block_b).inserted);
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn unknown_vote_hash_is_cached_inactive() {
        let (active, _ledger) = harness();
        let rep = Account([2u8; 32]);
        let vote = crate::vote::Vote { account: rep, signature: Signature::ZERO, sequence: 1, elements: vec![crate::vote::VoteElement::Hash(BlockHash([7u8; 32]))] };
        let outcome = active.vote(&vote, true);
        assert_eq!(outcome, VoteProcessingResult::Indeterminate);
    }
}
