//! Per-root quorum state machine (`spec.md` §4.3), owned exclusively by
//! [`super::ActiveTransactions`] (REDESIGN FLAG in `spec.md` §9: "model the
//! active-transactions store as owning all elections (unique ownership) and
//! hand out short-lived borrowed references"). Votes arrive through
//! [`Election::vote`] rather than re-entrant callbacks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::blocks::Block;
use crate::ledger::clock::Clock;
use crate::ledger::Ledger;
use crate::types::{Account, Amount, BlockHash, QualifiedRoot};

/// The synthetic representative used to seed `last_votes` with the
/// election's initial block, per `spec.md` §4.3 ("a synthetic 'not-an-
/// account' entry seeded with the initial block, overridable by a
/// higher-sequence real vote"). No real account hashes to the zero key
/// (every valid Ed25519 public key has at least one nonzero byte with
/// overwhelming probability), so it can never collide with a real vote.
pub const NOT_AN_ACCOUNT: Account = Account::ZERO;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ElectionState {
    Passive,
    Active,
    Broadcasting,
    ConfirmedQuorum,
    ExpiredConfirmed,
    ExpiredUnconfirmed,
}

impl ElectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ElectionState::ConfirmedQuorum | ElectionState::ExpiredConfirmed | ElectionState::ExpiredUnconfirmed)
    }
}

#[derive(Clone, Copy, Debug)]
struct VoteEntry {
    hash: BlockHash,
    sequence: u64,
    time: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VoteCode {
    /// The vote advanced this election's tally (accepted, possibly a
    /// winner-changing vote).
    Vote,
    /// Same (rep, sequence, hash) seen before, or a strictly older sequence.
    Replay,
}

pub struct VoteOutcome {
    pub code: VoteCode,
    pub quorum_reached: bool,
}

pub enum TransitionOutcome {
    /// Nothing to do this tick (still in `passive` grace period, or already
    /// terminal).
    Continue,
    /// Rebroadcast the winner and solicit confirm-req from unvoted reps.
    BroadcastWinner(Block),
    /// Exceeded the maximum age without reaching quorum.
    Expired,
}

/// Per-election state (`spec.md` §4.3).
pub struct Election {
    pub qualified_root: QualifiedRoot,
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    blocks: HashMap<BlockHash, Block>,
    winner: BlockHash,
    last_votes: HashMap<Account, VoteEntry>,
    tally: HashMap<BlockHash, Amount>,
    final_tally: Option<HashMap<BlockHash, Amount>>,
    state: ElectionState,
    pub confirmation_request_count: u32,
    pub last_req_time: u64,
    pub election_start: u64,
    pub prioritized: bool,
    /// Hashes of elections that depend on this election's winner, populated
    /// by `ActiveTransactions`'s dependency-activation pass (`spec.md` §4.2
    /// point 5: "Each newly activated election records the original hash as
    /// a dependent"). Forms the forward edges of the adjusted-multiplier DAG.
    dependent_blocks: HashSet<BlockHash>,
    quorum_fraction: f64,
    /// The winner block's own normalized multiplier, fixed at construction
    /// (`spec.md` §4.2 "normalized multiplier").
    multiplier: f64,
    /// The multiplier used for priority ordering and request-loop sorting,
    /// recomputed by the periodic adjusted-multiplier DAG pass
    /// (`spec.md` §4.2 "Adjusted multiplier"). Starts equal to `multiplier`.
    adjusted_multiplier: f64,
}

impl Election {
    pub fn new(
        ledger: Arc<Ledger>,
        clock: Arc<dyn Clock>,
        account: Account,
        block: Block,
        quorum_fraction: f64,
        prioritized: bool,
        multiplier: f64,
    ) -> Self {
        let hash = block.hash();
        let qualified_root = block.root(account);
        let now = clock.now_unix();
        let mut blocks = HashMap::new();
        blocks.insert(hash, block);
        let mut last_votes = HashMap::new();
        last_votes.insert(NOT_AN_ACCOUNT, VoteEntry { hash, sequence: 0, time: now });

        Election {
            qualified_root,
            ledger,
            clock,
            blocks,
            winner: hash,
            last_votes,
            tally: HashMap::new(),
            final_tally: None,
            state: ElectionState::Passive,
            confirmation_request_count: 0,
            last_req_time: 0,
            election_start: now,
            prioritized,
            dependent_blocks: HashSet::new(),
            quorum_fraction,
            multiplier,
            adjusted_multiplier: multiplier,
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn adjusted_multiplier(&self) -> f64 {
        self.adjusted_multiplier
    }

    pub fn set_adjusted_multiplier(&mut self, value: f64) {
        self.adjusted_multiplier = value;
    }

    /// Raises `multiplier` (and, as a starting point, `adjusted_multiplier`)
    /// if `new_multiplier` is higher, mirroring `spec.md` §4.2 "Update on new
    /// block for existing root": "add it to that election's blocks map,
    /// potentially raising the election's multiplier". Returns `true` if the
    /// multiplier was raised, telling the caller to re-queue this root for
    /// the adjusted-multiplier pass.
    pub fn raise_multiplier(&mut self, new_multiplier: f64) -> bool {
        if new_multiplier > self.multiplier {
            self.multiplier = new_multiplier;
            self.adjusted_multiplier = new_multiplier;
            true
        } else {
            false
        }
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn winner(&self) -> BlockHash {
        self.winner
    }

    pub fn winner_block(&self) -> &Block {
        &self.blocks[&self.winner]
    }

    pub fn blocks(&self) -> &HashMap<BlockHash, Block> {
        &self.blocks
    }

    pub fn tally(&self) -> &HashMap<BlockHash, Amount> {
        &self.tally
    }

    pub fn final_tally(&self) -> Option<&HashMap<BlockHash, Amount>> {
        self.final_tally.as_ref()
    }

    pub fn dependent_blocks(&self) -> &HashSet<BlockHash> {
        &self.dependent_blocks
    }

    pub fn add_dependent(&mut self, hash: BlockHash) {
        self.dependent_blocks.insert(hash);
    }

    pub fn mark_prioritized(&mut self) {
        self.prioritized = true;
    }

    /// Recomputes `tally` from `last_votes` and updates `winner` if a
    /// different block now leads. Ties are broken by `BlockHash` ordering so
    /// replaying identical votes always yields the same winner
    /// (`spec.md` §8 invariant 6, determinism).
    fn retally(&mut self) {
        let mut tally: HashMap<BlockHash, Amount> = self.blocks.keys().map(|h| (*h, 0)).collect();
        for (rep, entry) in &self.last_votes {
            if let Some(weight) = tally.get_mut(&entry.hash) {
                *weight = weight.saturating_add(self.ledger.weight(rep));
            }
        }
        let winner = tally
            .iter()
            .max_by(|(h1, w1), (h2, w2)| w1.cmp(w2).then_with(|| h1.cmp(h2)))
            .map(|(h, _)| *h)
            .unwrap_or(self.winner);
        self.tally = tally;
        self.winner = winner;
    }

    fn check_quorum(&mut self, online_weight_stake: Amount) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let delta = (online_weight_stake as f64 * self.quorum_fraction) as Amount;
        let winner_tally = *self.tally.get(&self.winner).unwrap_or(&0);
        if winner_tally > delta {
            self.state = ElectionState::ConfirmedQuorum;
            self.final_tally = Some(self.tally.clone());
            true
        } else {
            false
        }
    }

    /// `vote(rep, sequence, hash)` (`spec.md` §4.3). `online_weight_stake` is
    /// the current total weight of online representatives, supplied by the
    /// caller (tracked outside the election itself, in
    /// `ActiveTransactions`'s online-weight sampler).
    pub fn vote(&mut self, rep: Account, sequence: u64, hash: BlockHash, online_weight_stake: Amount) -> VoteOutcome {
        let now = self.clock.now_unix();
        let accept = match self.last_votes.get(&rep) {
            None => true,
            Some(stored) if sequence > stored.sequence => true,
            Some(stored) if sequence == stored.sequence && stored.hash == hash => false,
            Some(stored) if sequence == stored.sequence => true, // tie on a different hash: newer arrival wins
            Some(_) => false,                                    // strictly stale sequence
        };
        if !accept {
            return VoteOutcome { code: VoteCode::Replay, quorum_reached: false };
        }
        self.last_votes.insert(rep, VoteEntry { hash, sequence, time: now });
        self.retally();
        let quorum_reached = self.check_quorum(online_weight_stake);
        VoteOutcome { code: VoteCode::Vote, quorum_reached }
    }

    /// `publish()` (`spec.md` §4.3): inserts a conflicting block discovered
    /// via ledger processing (`ProcessCode::Fork`) and retallies — existing
    /// votes may already favor the newcomer (`spec.md` §8 scenario 3).
    /// Returns whether the block was new and whether the retally reached
    /// quorum.
    pub fn publish(&mut self, block: Block, online_weight_stake: Amount) -> (bool, bool) {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return (false, false);
        }
        self.blocks.insert(hash, block);
        self.retally();
        let quorum_reached = self.check_quorum(online_weight_stake);
        (true, quorum_reached)
    }

    /// `transition_time()` (`spec.md` §4.3), called once per request-loop
    /// tick.
    pub fn transition_time(&mut self, passive_grace_period_secs: u64, max_age_secs: u64) -> TransitionOutcome {
        if self.state.is_terminal() {
            return TransitionOutcome::Continue;
        }
        let now = self.clock.now_unix();
        let age = now.saturating_sub(self.election_start);

        if self.state == ElectionState::Passive {
            if age < passive_grace_period_secs {
                return TransitionOutcome::Continue;
            }
            self.state = ElectionState::Active;
        }

        if age > max_age_secs {
            self.state = ElectionState::ExpiredUnconfirmed;
            return TransitionOutcome::Expired;
        }

        // `active` and `broadcasting` share the same per-tick action:
        // rebroadcast the winner and bump the confirm-req counters.
        self.state = ElectionState::Broadcasting;
        self.confirmation_request_count += 1;
        self.last_req_time = now;
        TransitionOutcome::BroadcastWinner(self.winner_block().clone())
    }

    /// `cleanup()` (`spec.md` §4.3): returns every block hash this election
    /// held (so the caller can clear them from its publish-filter) and
    /// drains the dependent-block back-edges.
    pub fn cleanup(&mut self) -> Vec<BlockHash> {
        self.dependent_blocks.clear();
        self.blocks.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::StateBlock;
    use crate::ledger::clock::FixedClock;
    use crate::ledger::work::WorkThresholds;
    use crate::types::{Epoch, Link, Signature, Work};

    fn ledger() -> Arc<Ledger> {
        Arc::new(Ledger::new(Default::default(), WorkThresholds::test(), Arc::new(FixedClock::new(1000))))
    }

    fn state_block(account: Account, previous: BlockHash, balance: Amount) -> Block {
        Block::State(StateBlock {
            account,
            previous,
            representative: account,
            balance,
            link: Link::ZERO,
            signature: Signature::ZERO,
            work: Work(0),
            sideband: None,
        })
    }

    #[test]
    fn winner_changes_when_a_later_vote_outweighs_the_seed() {
        let ledger = ledger();
        let rep = Account([9u8; 32]);
        ledger.rep_weights.add(rep, 1000);
        let account = Account([1u8; 32]);
        let block = state_block(account, BlockHash::ZERO, 100);
        let hash = block.hash();
        let mut election = Election::new(ledger, Arc::new(FixedClock::new(1000)), account, block, 0.67, true, 1.0);

        let outcome = election.vote(rep, 1, hash, 1000);
        assert_eq!(outcome.code, VoteCode::Vote);
        assert!(outcome.quorum_reached);
        assert_eq!(election.state(), ElectionState::ConfirmedQuorum);
    }

    #[test]
    fn replayed_vote_is_not_reprocessed() {
        let ledger = ledger();
        let rep = Account([9u8; 32]);
        ledger.rep_weights.add(rep, 10);
        let account = Account([1u8; 32]);
        let block = state_block(account, BlockHash::ZERO, 100);
        let hash = block.hash();
        let mut election = Election::new(ledger, Arc::new(FixedClock::new(1000)), account, block, 0.67, true, 1.0);

        assert_eq!(election.vote(rep, 1, hash, 1000).code, VoteCode::Vote);
        assert_eq!(election.vote(rep, 1, hash, 1000).code, VoteCode::Replay);
        assert_eq!(election.vote(rep, 0, hash, 1000).code, VoteCode::Replay, "a stale sequence must not override the stored vote");
    }

    #[test]
    fn publish_retally_can_immediately_flip_the_winner() {
        // spec.md §8 scenario 3: a vote for the not-yet-seen block arrives
        // first (modeled here by voting for a hash before it's published),
        // then publish() brings that block in and retally flips the winner.
        let ledger = ledger();
        let rep = Account([9u8; 32]);
        ledger.rep_weights.add(rep, 1000);
        let account = Account([1u8; 32]);
        let block_a = state_block(account, BlockHash::ZERO, 100);
        let mut election = Election::new(ledger, Arc::new(FixedClock::new(1000)), account, block_a, 0.67, true, 1.0);

        let block_b = state_block(account, BlockHash::ZERO, 200);
        let hash_b = block_b.hash();
        election.last_votes.insert(rep, VoteEntry { hash: hash_b, sequence: 1, time: 1000 });

        let (inserted, quorum_reached) = election.publish(block_b, 1000);
        assert!(inserted);
        assert!(quorum_reached);
        assert_eq!(election.winner(), hash_b);
    }
}
