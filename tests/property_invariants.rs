//! Property-based coverage of `spec.md` §8's quantified invariants and
//! round-trip laws, driven directly through `Ledger::process`/`rollback`
//! against a fresh `MemoryStore` per case.

use std::sync::Arc;

use proptest::prelude::*;

use lattice_node::blocks::{Block, BlockDetails, EpochMarkers, Sideband, StateBlock};
use lattice_node::crypto::KeyPair;
use lattice_node::ledger::clock::FixedClock;
use lattice_node::ledger::work::WorkThresholds;
use lattice_node::ledger::{Ledger, ProcessCode};
use lattice_node::store::memory::MemoryStore;
use lattice_node::store::{AccountInfo, PendingKey, Store};
use lattice_node::types::{Account, BlockHash, Epoch, Link, Work};

/// Seeds `account` as already-opened with `balance`, bypassing `process`
/// (the same fixture shape used by `ledger::state`'s own unit tests) so
/// later blocks in the chain can be built purely through the public
/// `Ledger::process` surface.
fn seed_genesis(store: &MemoryStore, ledger: &Ledger, account: Account, balance: u128) -> BlockHash {
    let hash = BlockHash([9u8; 32]);
    let mut txn = store.tx_begin_write().unwrap();
    txn.put_account(
        &account,
        &AccountInfo { head: hash, representative: account, open_block: hash, balance, modified: 0, block_count: 1, epoch: Epoch::ZERO },
    )
    .unwrap();
    txn.put_block(
        &hash,
        &Block::State(StateBlock {
            account,
            previous: BlockHash::ZERO,
            representative: account,
            balance,
            link: Link::ZERO,
            signature: lattice_node::types::Signature::ZERO,
            work: Work(0),
            sideband: Some(Sideband {
                successor: BlockHash::ZERO,
                account: None,
                height: 1,
                balance: None,
                timestamp: 0,
                details: Some(BlockDetails { epoch: Epoch::ZERO, is_send: false, is_receive: false, is_epoch: false }),
            }),
        }),
    )
    .unwrap();
    txn.commit().unwrap();
    ledger.rep_weights.add(account, balance);
    hash
}

fn fresh_ledger() -> Ledger {
    Ledger::new(EpochMarkers::new(), WorkThresholds::test(), Arc::new(FixedClock::new(1_000)))
}

/// Builds and commits a change block (no pending/rep-weight cross-account
/// interaction) moving the account's representative to `new_rep`.
fn signed_change(kp: &KeyPair, previous: BlockHash, balance: u128, new_rep: Account) -> StateBlock {
    let mut block = StateBlock::new(kp.account(), previous, new_rep, balance, Link::ZERO);
    block.signature = kp.sign(&block.hashable_bytes());
    block
}

fn run_change_chain(reps: &[[u8; 32]]) -> (AccountInfo, u128) {
    let ledger = fresh_ledger();
    let store = MemoryStore::new();
    let mut rng = rand::thread_rng();
    let kp = KeyPair::generate(&mut rng);
    let account = kp.account();
    let balance = 1_000u128;
    let mut head = seed_genesis(&store, &ledger, account, balance);

    for rep_bytes in reps {
        let rep = Account(*rep_bytes);
        let mut block = signed_change(&kp, head, balance, rep);
        let mut txn = store.tx_begin_write().unwrap();
        let result = ledger.process(txn.as_mut(), &mut Block::State(block.clone())).unwrap();
        assert_eq!(result.code, ProcessCode::Progress);
        txn.commit().unwrap();
        block.work = Work(0);
        head = Block::State(block).hash();
    }

    let info = store.tx_begin_read().unwrap().get_account(&account).unwrap().unwrap();
    let weight = ledger.weight(&info.representative);
    (info, weight)
}

proptest! {
    /// `spec.md` §8 "Determinism: replaying the same block sequence on an
    /// empty store yields identical ledger state byte-for-byte". Two
    /// independent `Ledger`+`MemoryStore` pairs driven by the identical
    /// sequence of signed change-blocks (same keypair, same representative
    /// sequence) must converge on identical `AccountInfo` and weight-cache
    /// state.
    #[test]
    fn replaying_same_chain_is_deterministic(reps in proptest::collection::vec(any::<[u8; 32]>(), 0..8)) {
        // Run the exact same keypair-signed chain twice by fixing the
        // keypair instead of relying on `run_change_chain`'s own rng for
        // the second run.
        let ledger_a = fresh_ledger();
        let store_a = MemoryStore::new();
        let ledger_b = fresh_ledger();
        let store_b = MemoryStore::new();
        let mut rng = rand::thread_rng();
        let kp = KeyPair::generate(&mut rng);
        let account = kp.account();
        let balance = 1_000u128;

        let mut head_a = seed_genesis(&store_a, &ledger_a, account, balance);
        let mut head_b = seed_genesis(&store_b, &ledger_b, account, balance);

        for rep_bytes in &reps {
            let rep = Account(*rep_bytes);

            let mut block_a = signed_change(&kp, head_a, balance, rep);
            let mut txn_a = store_a.tx_begin_write().unwrap();
            let result_a = ledger_a.process(txn_a.as_mut(), &mut Block::State(block_a.clone())).unwrap();
            prop_assert_eq!(result_a.code, ProcessCode::Progress);
            txn_a.commit().unwrap();
            block_a.work = Work(0);
            head_a = Block::State(block_a).hash();

            let mut block_b = signed_change(&kp, head_b, balance, rep);
            let mut txn_b = store_b.tx_begin_write().unwrap();
            let result_b = ledger_b.process(txn_b.as_mut(), &mut Block::State(block_b.clone())).unwrap();
            prop_assert_eq!(result_b.code, ProcessCode::Progress);
            txn_b.commit().unwrap();
            block_b.work = Work(0);
            head_b = Block::State(block_b).hash();

            prop_assert_eq!(head_a, head_b, "identical inputs must hash identically at every step");
        }

        let info_a = store_a.tx_begin_read().unwrap().get_account(&account).unwrap().unwrap();
        let info_b = store_b.tx_begin_read().unwrap().get_account(&account).unwrap().unwrap();
        prop_assert_eq!(info_a, info_b);
        prop_assert_eq!(ledger_a.weight(&info_a.representative), ledger_b.weight(&info_b.representative));
    }

    /// `spec.md` §8 round-trip law: "Commit then rollback (if no confirmed
    /// block intervenes) returns to byte-identical state", applied to a
    /// send block — also covers invariant 3 ("exactly one pending entry
    /// exists iff its receive has not yet committed").
    #[test]
    fn commit_then_rollback_send_restores_prior_state(amount in 1u128..1_000) {
        let ledger = fresh_ledger();
        let store = MemoryStore::new();
        let mut rng = rand::thread_rng();
        let kp = KeyPair::generate(&mut rng);
        let account = kp.account();
        let balance = 1_000u128;
        let head = seed_genesis(&store, &ledger, account, balance);
        let destination = Account([7u8; 32]);

        let info_before = store.tx_begin_read().unwrap().get_account(&account).unwrap().unwrap();
        let weight_before = ledger.weight(&account);

        let mut send = StateBlock::new(account, head, account, balance - amount, Link(destination.0));
        send.signature = kp.sign(&send.hashable_bytes());
        let send_hash;
        {
            let mut txn = store.tx_begin_write().unwrap();
            let result = ledger.process(txn.as_mut(), &mut Block::State(send.clone())).unwrap();
            prop_assert_eq!(result.code, ProcessCode::Progress);
            prop_assert_eq!(result.amount, Some(amount));
            txn.commit().unwrap();
            send_hash = Block::State(send.clone()).hash();
        }

        // Invariant 3: exactly one pending entry now exists for this send.
        {
            let txn = store.tx_begin_read().unwrap();
            let pending = txn.get_pending(&PendingKey { account: destination, hash: send_hash }).unwrap();
            prop_assert!(pending.is_some());
            prop_assert_eq!(pending.unwrap().amount, amount);
        }
        prop_assert_eq!(ledger.weight(&account), balance - amount);

        {
            let mut txn = store.tx_begin_write().unwrap();
            ledger.rollback(txn.as_mut(), &send_hash).unwrap();
            txn.commit().unwrap();
        }

        let info_after = store.tx_begin_read().unwrap().get_account(&account).unwrap().unwrap();
        prop_assert_eq!(info_before, info_after, "rollback must restore byte-identical account_info");
        prop_assert_eq!(ledger.weight(&account), weight_before);
        let pending_after = store.tx_begin_read().unwrap().get_pending(&PendingKey { account: destination, hash: send_hash }).unwrap();
        prop_assert!(pending_after.is_none(), "rollback must remove the pending entry the send created");
    }
}

#[test]
fn change_chain_converges_regardless_of_length() {
    // Smoke-check the helper itself (used structurally by the proptest
    // above) for the empty-chain base case: no blocks beyond genesis means
    // the representative is unchanged and the full genesis balance is
    // still weighted to it.
    let (info, weight) = run_change_chain(&[]);
    assert_eq!(weight, 1_000);
    assert_eq!(info.block_count, 1);
}
