//! The three bounded, time-aware caches named in `spec.md` §4.2: inactive
//! votes, recently-confirmed, recently-dropped. Modeled as ordered maps by
//! `(timestamp, key)` per the re-architecture note in `spec.md` §9
//! ("Timestamp-driven caches... implement as ordered maps by (timestamp,
//! key) with O(log n) insert/evict").

use std::collections::{BTreeMap, VecDeque};
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::types::{Account, BlockHash, QualifiedRoot};

/// Bounded LRU keyed by block hash, accumulating voter accounts until their
/// summed weight crosses `online_weight_minimum` (`spec.md` §4.2 "Inactive
/// votes cache"). A pure capacity-bounded map with no TTL, so it's backed
/// directly by `lru::LruCache` rather than the timestamp-ordered maps the
/// TTL-driven caches below use.
pub struct InactiveVotesCache {
    entries: LruCache<BlockHash, InactiveVoteEntry>,
}

pub struct InactiveVoteEntry {
    pub voters: Vec<Account>,
    pub bootstrap_scheduled: bool,
}

impl InactiveVotesCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).expect("1 is nonzero"));
        InactiveVotesCache { entries: LruCache::new(capacity) }
    }

    /// Records `voter` against `hash`. Returns `true` the first time this
    /// call causes the summed weight (computed by the caller, which knows
    /// the rep-weight cache) to be worth checking against
    /// `online_weight_minimum` — i.e. whenever a new, previously-unseen
    /// voter is added.
    pub fn insert(&mut self, hash: BlockHash, voter: Account) -> bool {
        if let Some(entry) = self.entries.get_mut(&hash) {
            if entry.voters.contains(&voter) {
                return false;
            }
            entry.voters.push(voter);
            return true;
        }
        self.entries.put(hash, InactiveVoteEntry { voters: vec![voter], bootstrap_scheduled: false });
        true
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&InactiveVoteEntry> {
        self.entries.peek(hash)
    }

    /// Marks `hash`'s lazy bootstrap as scheduled so repeated weight crossings
    /// don't requeue it.
    pub fn mark_bootstrap_scheduled(&mut self, hash: &BlockHash) {
        if let Some(entry) = self.entries.get_mut(hash) {
            entry.bootstrap_scheduled = true;
        }
    }

    /// Removes and returns the accumulated voters for `hash`, called once an
    /// election is created for it so the votes can be preloaded
    /// (`spec.md` §4.2: "When the block eventually arrives and an election
    /// is created, preload the accumulated voters").
    pub fn take(&mut self, hash: &BlockHash) -> Option<InactiveVoteEntry> {
        self.entries.pop(hash)
    }
}

/// Bounded FIFO of `(qualified_root, winner_hash)`, acting as a replay/
/// tombstone filter for `ttl_secs` after confirmation (`spec.md` §4.2
/// "Recently-confirmed cache").
pub struct RecentlyConfirmedCache {
    capacity: usize,
    ttl_secs: u64,
    by_root: std::collections::HashMap<QualifiedRoot, BlockHash>,
    /// Reverse index used by vote ingress, which only has the voted-for
    /// hash in hand, not the qualified root it belonged to (`spec.md` §4.2
    /// vote(): "if the hash is in recently-confirmed, count as replay").
    by_hash: std::collections::HashMap<BlockHash, QualifiedRoot>,
    order: VecDeque<(u64, QualifiedRoot)>,
}

impl RecentlyConfirmedCache {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        RecentlyConfirmedCache {
            capacity,
            ttl_secs,
            by_root: std::collections::HashMap::new(),
            by_hash: std::collections::HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, now: u64, root: QualifiedRoot, winner: BlockHash) {
        self.evict_expired(now);
        if self.by_root.len() >= self.capacity {
            if let Some((_, oldest_root)) = self.order.pop_front() {
                if let Some(oldest_hash) = self.by_root.remove(&oldest_root) {
                    self.by_hash.remove(&oldest_hash);
                }
            }
        }
        self.by_root.insert(root, winner);
        self.by_hash.insert(winner, root);
        self.order.push_back((now, root));
    }

    pub fn contains_root(&self, root: &QualifiedRoot) -> bool {
        self.by_root.contains_key(root)
    }

    pub fn contains_hash(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn winner_for(&self, root: &QualifiedRoot) -> Option<BlockHash> {
        self.by_root.get(root).copied()
    }

    pub fn evict_expired(&mut self, now: u64) {
        while let Some(&(time, root)) = self.order.front() {
            if now.saturating_sub(time) <= self.ttl_secs {
                break;
            }
            self.order.pop_front();
            if let Some(hash) = self.by_root.remove(&root) {
                self.by_hash.remove(&hash);
            }
        }
    }
}

/// Bounded LRU of qualified-roots with eviction timestamps, driving restart
/// eligibility within the 2-minute window (`spec.md` §4.2 "Recently-dropped
/// cache", §4.2 "Restart").
pub struct RecentlyDroppedCache {
    capacity: usize,
    dropped_at: BTreeMap<QualifiedRoot, u64>,
    order: VecDeque<QualifiedRoot>,
}

impl RecentlyDroppedCache {
    pub fn new(capacity: usize) -> Self {
        RecentlyDroppedCache { capacity, dropped_at: BTreeMap::new(), order: VecDeque::new() }
    }

    pub fn insert(&mut self, root: QualifiedRoot, now: u64) {
        if !self.dropped_at.contains_key(&root) && self.dropped_at.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.dropped_at.remove(&oldest);
            }
        }
        if self.dropped_at.insert(root, now).is_none() {
            self.order.push_back(root);
        }
    }

    /// `true` iff `root` was dropped within the last `window_secs` (the
    /// restart-eligibility window, 2 minutes per `spec.md` §4.2).
    pub fn eligible_for_restart(&self, root: &QualifiedRoot, now: u64, window_secs: u64) -> bool {
        self.dropped_at.get(root).map(|&dropped_at| now.saturating_sub(dropped_at) <= window_secs).unwrap_or(false)
    }

    pub fn remove(&mut self, root: &QualifiedRoot) {
        self.dropped_at.remove(root);
        if let Some(pos) = self.order.iter().position(|r| r == root) {
            self.order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_votes_cache_accumulates_distinct_voters() {
        let mut cache = InactiveVotesCache::new(4);
        let hash = BlockHash([1u8; 32]);
        let v1 = Account([1u8; 32]);
        let v2 = Account([2u8; 32]);
        assert!(cache.insert(hash, v1));
        assert!(!cache.insert(hash, v1), "duplicate voter is not a new signal");
        assert!(cache.insert(hash, v2));
        assert_eq!(cache.get(&hash).unwrap().voters.len(), 2);
    }

    #[test]
    fn inactive_votes_cache_evicts_oldest_on_overflow() {
        let mut cache = InactiveVotesCache::new(1);
        let h1 = BlockHash([1u8; 32]);
        let h2 = BlockHash([2u8; 32]);
        cache.insert(h1, Account([1u8; 32]));
        cache.insert(h2, Account([1u8; 32]));
        assert!(cache.get(&h1).is_none());
        assert!(cache.get(&h2).is_some());
    }

    #[test]
    fn recently_confirmed_cache_expires_entries() {
        let mut cache = RecentlyConfirmedCache::new(10, 30);
        let root = QualifiedRoot::new(BlockHash::ZERO, Account([1u8; 32]));
        cache.insert(1000, root, BlockHash([2u8; 32]));
        assert!(cache.contains_root(&root));
        cache.evict_expired(1031);
        assert!(!cache.contains_root(&root));
    }

    #[test]
    fn recently_dropped_cache_restart_window() {
        let mut cache = RecentlyDroppedCache::new(10);
        let root = QualifiedRoot::new(BlockHash::ZERO, Account([1u8; 32]));
        cache.insert(root, 1000);
        assert!(cache.eligible_for_restart(&root, 1090, 120));
        assert!(!cache.eligible_for_restart(&root, 1200, 120));
    }
}
