//! Validation for the four legacy block shapes (`spec.md` §4.1, "Send /
//! Receive / Open / Change (legacy)"). Each mirrors the state-block
//! validators in [`super::state`] but resolves the owning account through
//! the frontiers table (`spec.md` §6: "only for legacy non-state blocks")
//! rather than carrying it as a field, and always validates at the
//! `epoch_0` work threshold.

use anyhow::Result;

use crate::blocks::{Block, BlockDetails, ChangeBlock, OpenBlock, ReceiveBlock, Sideband, SendBlock};
use crate::crypto;
use crate::store::{AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey, WriteTransaction};
use crate::types::{Account, Amount, BlockHash, Epoch};

use super::work::pow_root;
use super::{Ledger, ProcessCode, ProcessOutput};

const LEGACY_DETAILS: BlockDetails = BlockDetails { epoch: Epoch::ZERO, is_send: false, is_receive: false, is_epoch: false };

/// Resolves the account owning the chain whose current head is `previous`.
/// `Ok(None)` distinguishes "no such block" (`gap_previous`) from "block
/// exists but is no longer any account's head" (`fork`: something was
/// already built on top of it, or it belongs to a state-headed account,
/// which never has a frontier entry).
fn resolve_owner(txn: &mut dyn WriteTransaction, previous: &BlockHash) -> Result<ResolvedOwner> {
    if !txn.block_exists(previous)? {
        return Ok(ResolvedOwner::GapPrevious);
    }
    match txn.get_frontier(previous)? {
        Some(account) => Ok(ResolvedOwner::Account(account)),
        None => Ok(ResolvedOwner::Fork),
    }
}

enum ResolvedOwner {
    Account(Account),
    GapPrevious,
    Fork,
}

pub fn process_send(ledger: &Ledger, txn: &mut dyn WriteTransaction, block: &mut SendBlock) -> Result<ProcessOutput> {
    let hash = crypto::blake2b_256(&[&block.hashable_bytes()]);
    if txn.block_exists(&hash)? {
        return Ok(ProcessOutput::code(ProcessCode::Old));
    }
    let account = match resolve_owner(txn, &block.previous)? {
        ResolvedOwner::Account(a) => a,
        ResolvedOwner::GapPrevious => return Ok(ProcessOutput::code(ProcessCode::GapPrevious)),
        ResolvedOwner::Fork => return Ok(ProcessOutput::code(ProcessCode::Fork)),
    };
    if !crypto::verify(&account, &block.hashable_bytes(), &block.signature) {
        return Ok(ProcessOutput::code(ProcessCode::BadSignature));
    }
    let info = txn.get_account(&account)?.expect("frontier pointed at a known account");
    if block.balance >= info.balance {
        return Ok(ProcessOutput::code(ProcessCode::NegativeSpend));
    }
    let amount = info.balance - block.balance;

    let root = pow_root(block.previous, account);
    if !ledger.work.validate(&root, block.work, LEGACY_DETAILS) {
        return Ok(ProcessOutput::code(ProcessCode::InsufficientWork));
    }

    block.sideband = Some(Sideband {
        successor: BlockHash::ZERO,
        account: Some(account),
        height: info.block_count + 1,
        balance: None,
        timestamp: ledger.clock.now_unix(),
        details: None,
    });
    txn.put_block(&hash, &Block::Send(block.clone()))?;
    super::rollback::link_successor(txn, &block.previous, hash)?;
    txn.del_frontier(&block.previous)?;
    txn.put_frontier(&hash, &account)?;

    txn.put_pending(
        &PendingKey { account: block.destination, hash },
        &PendingInfo { source: account, amount, epoch: Epoch::ZERO },
    )?;

    ledger.rep_weights.transfer(Some((info.representative, info.balance)), (info.representative, block.balance));

    let new_info = AccountInfo {
        head: hash,
        representative: info.representative,
        open_block: info.open_block,
        balance: block.balance,
        modified: ledger.clock.now_unix(),
        block_count: info.block_count + 1,
        epoch: info.epoch,
    };
    txn.put_account(&account, &new_info)?;

    Ok(ProcessOutput {
        code: ProcessCode::Progress,
        account: Some(account),
        amount: Some(amount),
        previous_balance: Some(info.balance),
        pending_account: None,
        verified: true,
    })
}

pub fn process_receive(ledger: &Ledger, txn: &mut dyn WriteTransaction, block: &mut ReceiveBlock) -> Result<ProcessOutput> {
    let hash = crypto::blake2b_256(&[&block.hashable_bytes()]);
    if txn.block_exists(&hash)? {
        return Ok(ProcessOutput::code(ProcessCode::Old));
    }
    let account = match resolve_owner(txn, &block.previous)? {
        ResolvedOwner::Account(a) => a,
        ResolvedOwner::GapPrevious => return Ok(ProcessOutput::code(ProcessCode::GapPrevious)),
        ResolvedOwner::Fork => return Ok(ProcessOutput::code(ProcessCode::Fork)),
    };
    if !crypto::verify(&account, &block.hashable_bytes(), &block.signature) {
        return Ok(ProcessOutput::code(ProcessCode::BadSignature));
    }
    if !txn.block_exists(&block.source)? {
        return Ok(ProcessOutput::code(ProcessCode::GapSource));
    }
    let pending_key = PendingKey { account, hash: block.source };
    let pending = match txn.get_pending(&pending_key)? {
        Some(p) => p,
        None => return Ok(ProcessOutput::code(ProcessCode::Unreceivable)),
    };
    // Legacy receive can only consume a pending entry created by an
    // epoch_0 send: an epoch-upgraded sender's pending is only
    // receivable by a state block (`spec.md` §8 scenario 2).
    if pending.epoch != Epoch::ZERO {
        return Ok(ProcessOutput::code(ProcessCode::Unreceivable));
    }

    let info = txn.get_account(&account)?.expect("frontier pointed at a known account");
    let root = pow_root(block.previous, account);
    if !ledger.work.validate(&root, block.work, LEGACY_DETAILS) {
        return Ok(ProcessOutput::code(ProcessCode::InsufficientWork));
    }

    let new_balance = info.balance + pending.amount;
    block.sideband = Some(Sideband {
        successor: BlockHash::ZERO,
        account: Some(account),
        height: info.block_count + 1,
        balance: Some(new_balance),
        timestamp: ledger.clock.now_unix(),
        details: None,
    });
    txn.put_block(&hash, &Block::Receive(block.clone()))?;
    super::rollback::link_successor(txn, &block.previous, hash)?;
    txn.del_frontier(&block.previous)?;
    txn.put_frontier(&hash, &account)?;
    txn.del_pending(&pending_key)?;

    ledger.rep_weights.transfer(Some((info.representative, info.balance)), (info.representative, new_balance));

    let new_info = AccountInfo {
        head: hash,
        representative: info.representative,
        open_block: info.open_block,
        balance: new_balance,
        modified: ledger.clock.now_unix(),
        block_count: info.block_count + 1,
        epoch: info.epoch,
    };
    txn.put_account(&account, &new_info)?;

    Ok(ProcessOutput {
        code: ProcessCode::Progress,
        account: Some(account),
        amount: Some(pending.amount),
        previous_balance: Some(info.balance),
        pending_account: Some(pending.source),
        verified: true,
    })
}

pub fn process_open(ledger: &Ledger, txn: &mut dyn WriteTransaction, block: &mut OpenBlock) -> Result<ProcessOutput> {
    let hash = crypto::blake2b_256(&[&block.hashable_bytes()]);
    if txn.block_exists(&hash)? {
        return Ok(ProcessOutput::code(ProcessCode::Old));
    }
    if block.account.is_zero() {
        return Ok(ProcessOutput::code(ProcessCode::OpenedBurnAccount));
    }
    if txn.get_account(&block.account)?.is_some() {
        return Ok(ProcessOutput::code(ProcessCode::Fork));
    }
    if !crypto::verify(&block.account, &block.hashable_bytes(), &block.signature) {
        return Ok(ProcessOutput::code(ProcessCode::BadSignature));
    }
    if !txn.block_exists(&block.source)? {
        return Ok(ProcessOutput::code(ProcessCode::GapSource));
    }
    let pending_key = PendingKey { account: block.account, hash: block.source };
    let pending = match txn.get_pending(&pending_key)? {
        Some(p) => p,
        None => return Ok(ProcessOutput::code(ProcessCode::Unreceivable)),
    };
    if pending.epoch != Epoch::ZERO {
        return Ok(ProcessOutput::code(ProcessCode::Unreceivable));
    }

    let root = pow_root(BlockHash::ZERO, block.account);
    if !ledger.work.validate(&root, block.work, LEGACY_DETAILS) {
        return Ok(ProcessOutput::code(ProcessCode::InsufficientWork));
    }

    let amount: Amount = pending.amount;
    block.sideband = Some(Sideband {
        successor: BlockHash::ZERO,
        account: None,
        height: 1,
        balance: Some(amount),
        timestamp: ledger.clock.now_unix(),
        details: None,
    });
    txn.put_block(&hash, &Block::Open(block.clone()))?;
    txn.del_pending(&pending_key)?;
    txn.put_frontier(&hash, &block.account)?;

    ledger.rep_weights.add(block.representative, amount);

    let new_info = AccountInfo {
        head: hash,
        representative: block.representative,
        open_block: hash,
        balance: amount,
        modified: ledger.clock.now_unix(),
        block_count: 1,
        epoch: Epoch::ZERO,
    };
    txn.put_account(&block.account, &new_info)?;
    txn.put_confirmation_height(&block.account, &ConfirmationHeightInfo::zero())?;

    Ok(ProcessOutput {
        code: ProcessCode::Progress,
        account: Some(block.account),
        amount: Some(amount),
        previous_balance: Some(0),
        pending_account: Some(pending.source),
        verified: true,
    })
}

pub fn process_change(ledger: &Ledger, txn: &mut dyn WriteTransaction, block: &mut ChangeBlock) -> Result<ProcessOutput> {
    let hash = crypto::blake2b_256(&[&block.hashable_bytes()]);
    if txn.block_exists(&hash)? {
        return Ok(ProcessOutput::code(ProcessCode::Old));
    }
    let account = match resolve_owner(txn, &block.previous)? {
        ResolvedOwner::Account(a) => a,
        ResolvedOwner::GapPrevious => return Ok(ProcessOutput::code(ProcessCode::GapPrevious)),
        ResolvedOwner::Fork => return Ok(ProcessOutput::code(ProcessCode::Fork)),
    };
    if !crypto::verify(&account, &block.hashable_bytes(), &block.signature) {
        return Ok(ProcessOutput::code(ProcessCode::BadSignature));
    }
    let info = txn.get_account(&account)?.expect("frontier pointed at a known account");

    let root = pow_root(block.previous, account);
    if !ledger.work.validate(&root, block.work, LEGACY_DETAILS) {
        return Ok(ProcessOutput::code(ProcessCode::InsufficientWork));
    }

    block.sideband = Some(Sideband {
        successor: BlockHash::ZERO,
        account: Some(account),
        height: info.block_count + 1,
        balance: Some(info.balance),
        timestamp: ledger.clock.now_unix(),
        details: None,
    });
    txn.put_block(&hash, &Block::Change(block.clone()))?;
    super::rollback::link_successor(txn, &block.previous, hash)?;
    txn.del_frontier(&block.previous)?;
    txn.put_frontier(&hash, &account)?;

    ledger.rep_weights.transfer(Some((info.representative, info.balance)), (block.representative, info.balance));

    let new_info = AccountInfo {
        head: hash,
        representative: block.representative,
        open_block: info.open_block,
        balance: info.balance,
        modified: ledger.clock.now_unix(),
        block_count: info.block_count + 1,
        epoch: info.epoch,
    };
    txn.put_account(&account, &new_info)?;

    Ok(ProcessOutput {
        code: ProcessCode::Progress,
        account: Some(account),
        amount: Some(0),
        previous_balance: Some(info.balance),
        pending_account: None,
        verified: true,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::blocks::EpochMarkers;
    use crate::ledger::clock::FixedClock;
    use crate::ledger::work::WorkThresholds;
    use crate::store::memory::MemoryStore;
    use crate::store::Store;
    use crate::types::{Link, Signature, Work};

    use super::*;

    fn test_ledger() -> Ledger {
        Ledger::new(EpochMarkers::new(), WorkThresholds::test(), Arc::new(FixedClock::new(1_000)))
    }

    fn seed_open_account(store: &MemoryStore, account: Account, balance: Amount) -> BlockHash {
        let open_hash = crypto::blake2b_256(&[&[account.0.as_slice(), b"open"].concat()]);
        let mut txn = store.tx_begin_write().unwrap();
        txn.put_account(
            &account,
            &AccountInfo {
                head: open_hash,
                representative: account,
                open_block: open_hash,
                balance,
                modified: 0,
                block_count: 1,
                epoch: Epoch::ZERO,
            },
        )
        .unwrap();
        txn.put_block(
            &open_hash,
            &Block::Open(OpenBlock {
                source: BlockHash::ZERO,
                representative: account,
                account,
                signature: Signature::ZERO,
                work: Work(0),
                sideband: Some(Sideband { successor: BlockHash::ZERO, account: None, height: 1, balance: Some(balance), timestamp: 0, details: None }),
            }),
        )
        .unwrap();
        txn.put_frontier(&open_hash, &account).unwrap();
        txn.commit().unwrap();
        open_hash
    }

    #[test]
    fn simple_send_then_open_matches_scenario_1() {
        let ledger = test_ledger();
        let store = MemoryStore::new();
        let genesis = Account([1u8; 32]);
        let recipient = Account([2u8; 32]);
        let genesis_head = seed_open_account(&store, genesis, u128::MAX);

        let mut send = SendBlock::new(genesis_head, recipient, u128::MAX - 100);
        let mut txn = store.tx_begin_write().unwrap();
        let result = process_send(&ledger, txn.as_mut(), &mut send).unwrap();
        assert_eq!(result.code, ProcessCode::Progress);
        assert_eq!(result.amount, Some(100));
        txn.commit().unwrap();

        let send_hash = crypto::blake2b_256(&[&send.hashable_bytes()]);
        let pending = store.tx_begin_read().unwrap().get_pending(&PendingKey { account: recipient, hash: send_hash }).unwrap();
        assert_eq!(pending, Some(PendingInfo { source: genesis, amount: 100, epoch: Epoch::ZERO }));

        let mut open = OpenBlock::new(send_hash, recipient, recipient);
        let mut txn = store.tx_begin_write().unwrap();
        let result = process_open(&ledger, txn.as_mut(), &mut open).unwrap();
        assert_eq!(result.code, ProcessCode::Progress);
        txn.commit().unwrap();

        let info = store.tx_begin_read().unwrap().get_account(&recipient).unwrap().unwrap();
        assert_eq!(info.balance, 100);
        assert_eq!(ledger.weight(&recipient), 100);
        assert!(store.tx_begin_read().unwrap().get_pending(&PendingKey { account: recipient, hash: send_hash }).unwrap().is_none());
    }

    #[test]
    fn legacy_receive_from_epoch_upgraded_send_is_unreceivable() {
        let ledger = test_ledger();
        let store = MemoryStore::new();
        let genesis = Account([3u8; 32]);
        let recipient = Account([4u8; 32]);
        seed_open_account(&store, genesis, 1_000);
        seed_open_account(&store, recipient, 50);

        let send_hash = BlockHash([9u8; 32]);
        {
            let mut txn = store.tx_begin_write().unwrap();
            txn.put_pending(
                &PendingKey { account: recipient, hash: send_hash },
                &PendingInfo { source: genesis, amount: 200, epoch: Epoch(1) },
            )
            .unwrap();
            txn.put_block(
                &send_hash,
                &Block::State(crate::blocks::StateBlock {
                    account: genesis,
                    previous: BlockHash::ZERO,
                    representative: genesis,
                    balance: 800,
                    link: Link(recipient.0),
                    signature: Signature::ZERO,
                    work: Work(0),
                    sideband: Some(Sideband {
                        successor: BlockHash::ZERO,
                        account: None,
                        height: 2,
                        balance: None,
                        timestamp: 0,
                        details: Some(BlockDetails { epoch: Epoch(1), is_send: true, is_receive: false, is_epoch: false }),
                    }),
                }),
            )
            .unwrap();
            txn.commit().unwrap();
        }

        let recipient_head = store.tx_begin_read().unwrap().get_account(&recipient).unwrap().unwrap().head;
        let mut receive = ReceiveBlock::new(recipient_head, send_hash);
        let mut txn = store.tx_begin_write().unwrap();
        let result = process_receive(&ledger, txn.as_mut(), &mut receive).unwrap();
        assert_eq!(result.code, ProcessCode::Unreceivable);
    }

    #[test]
    fn change_block_moves_representative_weight() {
        let ledger = test_ledger();
        let store = MemoryStore::new();
        let account = Account([5u8; 32]);
        let new_rep = Account([6u8; 32]);
        let head = seed_open_account(&store, account, 500);
        ledger.rep_weights.add(account, 500);

        let mut change = ChangeBlock::new(head, new_rep);
        let mut txn = store.tx_begin_write().unwrap();
        let result = process_change(&ledger, txn.as_mut(), &mut change).unwrap();
        assert_eq!(result.code, ProcessCode::Progress);
        txn.commit().unwrap();

        assert_eq!(ledger.weight(&account), 0);
        assert_eq!(ledger.weight(&new_rep), 500);
    }
}
