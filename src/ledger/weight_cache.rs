//! The representative-weight cache: "sharded-atomic map" per `spec.md` §5,
//! backed by `dashmap` per `SPEC_FULL.md` §4.1 AMBIENT note. Additions from
//! ledger commits and reads from election tallies are lock-free at the shard
//! level, since `DashMap` only locks the shard a given key hashes into.

use dashmap::DashMap;

use crate::types::{Account, Amount};

#[derive(Default)]
pub struct RepWeightCache {
    weights: DashMap<Account, Amount>,
}

impl RepWeightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight(&self, representative: &Account) -> Amount {
        self.weights.get(representative).map(|v| *v).unwrap_or(0)
    }

    pub fn add(&self, representative: Account, amount: Amount) {
        if amount == 0 {
            return;
        }
        *self.weights.entry(representative).or_insert(0) += amount;
    }

    /// Subtracts `amount` from `representative`'s weight, removing the entry
    /// entirely once it reaches zero so the map does not grow unboundedly
    /// with long-closed representatives.
    pub fn subtract(&self, representative: Account, amount: Amount) {
        if amount == 0 {
            return;
        }
        let mut remove = false;
        if let Some(mut entry) = self.weights.get_mut(&representative) {
            *entry = entry.saturating_sub(amount);
            remove = *entry == 0;
        }
        if remove {
            self.weights.remove(&representative);
        }
    }

    /// Moves `amount` of weight from `old_rep` to `new_rep` in one call,
    /// matching `spec.md` §4.1's commit-time update: "(a) subtracting old
    /// balance from old representative, (b) adding new balance to new
    /// representative".
    pub fn transfer(&self, old_rep: Option<(Account, Amount)>, new_rep: (Account, Amount)) {
        if let Some((account, amount)) = old_rep {
            self.subtract(account, amount);
        }
        self.add(new_rep.0, new_rep.1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_subtract_round_trip() {
        let cache = RepWeightCache::new();
        let rep = Account([1u8; 32]);
        cache.add(rep, 100);
        assert_eq!(cache.weight(&rep), 100);
        cache.subtract(rep, 40);
        assert_eq!(cache.weight(&rep), 60);
    }

    #[test]
    fn subtract_to_zero_removes_entry() {
        let cache = RepWeightCache::new();
        let rep = Account([2u8; 32]);
        cache.add(rep, 50);
        cache.subtract(rep, 50);
        assert_eq!(cache.weight(&rep), 0);
        assert!(cache.weights.get(&rep).is_none());
    }

    #[test]
    fn transfer_moves_weight_between_representatives() {
        let cache = RepWeightCache::new();
        let old_rep = Account([3u8; 32]);
        let new_rep = Account([4u8; 32]);
        cache.add(old_rep, 100);
        cache.transfer(Some((old_rep, 100)), (new_rep, 100));
        assert_eq!(cache.weight(&old_rep), 0);
        assert_eq!(cache.weight(&new_rep), 100);
    }
}
