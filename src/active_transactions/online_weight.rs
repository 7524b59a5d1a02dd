//! Online-weight sampling: the `online_weight_stake` input to each
//! election's quorum predicate (`spec.md` §4.3 "delta = online_weight_stake
//! × quorum_fraction") and the `online_weight_minimum` threshold the
//! inactive-votes cache compares against before scheduling a lazy bootstrap
//! (`spec.md` §4.2). Telemetry and peer-list sampling are external
//! collaborators (`spec.md` §1); this tracks only which representatives
//! this process has itself heard a vote or confirm-ack from recently, which
//! is all `Election`/`ActiveTransactions` need.
//!
//! Samples are mirrored into the store's `online_weight` table (`spec.md`
//! §6) as they're observed, so a restarted node's quorum delta is seeded
//! from the last-seen times the previous run recorded rather than starting
//! from an empty cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ledger::Ledger;
use crate::store::Store;
use crate::types::{Account, Amount};

pub struct OnlineWeight {
    ledger: Arc<Ledger>,
    store: Arc<dyn Store>,
    minimum: Amount,
    window_secs: u64,
    last_seen: Mutex<HashMap<Account, u64>>,
}

impl OnlineWeight {
    pub fn new(ledger: Arc<Ledger>, store: Arc<dyn Store>, minimum: Amount, window_secs: u64) -> Self {
        OnlineWeight { ledger, store, minimum, window_secs, last_seen: Mutex::new(HashMap::new()) }
    }

    /// Loads last-seen times persisted by a prior run, dropping any already
    /// stale against `now` before they ever enter the in-memory map.
    pub fn load(&self, now: u64) -> anyhow::Result<()> {
        let mut last_seen = self.last_seen.lock();
        for (rep, seen) in self.store.iter_online_weight_samples()? {
            if now.saturating_sub(seen) <= self.window_secs {
                last_seen.insert(rep, seen);
            }
        }
        Ok(())
    }

    /// Records that `rep` was seen (voted, or acked a confirm-req) at `now`.
    pub fn observe(&self, rep: Account, now: u64) {
        self.last_seen.lock().insert(rep, now);
        if let Err(err) = self.store.put_online_weight_sample(&rep, now) {
            tracing::warn!(error = %err, rep = ?rep, "failed to persist online weight sample");
        }
    }

    /// Drops any representative not seen within `window_secs`.
    pub fn trim(&self, now: u64) {
        let mut last_seen = self.last_seen.lock();
        let stale: Vec<Account> = last_seen
            .iter()
            .filter(|(_, &seen)| now.saturating_sub(seen) > self.window_secs)
            .map(|(&rep, _)| rep)
            .collect();
        for rep in &stale {
            last_seen.remove(rep);
        }
        drop(last_seen);
        for rep in stale {
            if let Err(err) = self.store.del_online_weight_sample(&rep) {
                tracing::warn!(error = %err, rep = ?rep, "failed to drop stale online weight sample");
            }
        }
    }

    /// Sum of representative weight for every rep seen within the window:
    /// the `online_weight_stake` quorum-delta input.
    pub fn stake(&self) -> Amount {
        self.last_seen.lock().keys().map(|rep| self.ledger.weight(rep)).fold(0u128, |acc, w| acc.saturating_add(w))
    }

    pub fn minimum(&self) -> Amount {
        self.minimum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::EpochMarkers;
    use crate::ledger::clock::FixedClock;
    use crate::ledger::work::WorkThresholds;
    use crate::store::memory::MemoryStore;

    fn ledger() -> Arc<Ledger> {
        Arc::new(Ledger::new(EpochMarkers::new(), WorkThresholds::test(), Arc::new(FixedClock::new(1000))))
    }

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn stake_sums_only_recently_seen_representatives() {
        let ledger = ledger();
        let rep_a = Account([1u8; 32]);
        let rep_b = Account([2u8; 32]);
        ledger.rep_weights.add(rep_a, 100);
        ledger.rep_weights.add(rep_b, 200);
        let online = OnlineWeight::new(ledger, store(), 50, 300);
        online.observe(rep_a, 1000);
        assert_eq!(online.stake(), 100);
        online.observe(rep_b, 1000);
        assert_eq!(online.stake(), 300);
    }

    #[test]
    fn trim_drops_stale_entries() {
        let ledger = ledger();
        let rep = Account([1u8; 32]);
        ledger.rep_weights.add(rep, 100);
        let online = OnlineWeight::new(ledger, store(), 50, 100);
        online.observe(rep, 1000);
        online.trim(1200);
        assert_eq!(online.stake(), 0);
    }

    #[test]
    fn observe_persists_through_store_and_survives_reload() {
        let ledger = ledger();
        let rep = Account([1u8; 32]);
        ledger.rep_weights.add(rep, 100);
        let store = store();
        let online = OnlineWeight::new(ledger.clone(), store.clone(), 50, 300);
        online.observe(rep, 1000);

        let reloaded = OnlineWeight::new(ledger, store, 50, 300);
        reloaded.load(1000).unwrap();
        assert_eq!(reloaded.stake(), 100);
    }

    #[test]
    fn load_drops_samples_already_stale_against_now() {
        let ledger = ledger();
        let rep = Account([1u8; 32]);
        ledger.rep_weights.add(rep, 100);
        let store = store();
        let online = OnlineWeight::new(ledger.clone(), store.clone(), 50, 100);
        online.observe(rep, 1000);

        let reloaded = OnlineWeight::new(ledger, store, 50, 100);
        reloaded.load(1200).unwrap();
        assert_eq!(reloaded.stake(), 0);
    }
}
