//! State-block validation, covering both the regular (send/receive/change)
//! path and the epoch-upgrade path (`spec.md` §4.1). A state block is only
//! ever routed to the epoch path when its link matches a registered epoch
//! marker, its balance is unchanged, and it verifies under the epoch
//! signer's key; any other combination — including a coincidental epoch
//! link whose signature only verifies under the account key — falls
//! through to the regular path, per the explicit fallback rule in
//! `spec.md` §4.1.

use anyhow::Result;

use crate::blocks::{Block, BlockDetails, Sideband, StateBlock};
use crate::crypto;
use crate::store::{AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey, WriteTransaction};
use crate::types::{Account, BlockHash, Epoch};

use super::work::pow_root;
use super::{Ledger, ProcessCode, ProcessOutput};

pub fn process(ledger: &Ledger, txn: &mut dyn WriteTransaction, block: &mut StateBlock) -> Result<ProcessOutput> {
    let hash = crypto::blake2b_256(&[&block.hashable_bytes()]);
    if txn.block_exists(&hash)? {
        return Ok(ProcessOutput::code(ProcessCode::Old));
    }

    let info = txn.get_account(&block.account)?;
    let opened = info.is_some();
    let previous_balance = info.as_ref().map(|i| i.balance).unwrap_or(0);
    let is_epoch_link = ledger.epochs.is_epoch_link(block.link);

    if is_epoch_link && block.balance == previous_balance {
        if let Some(epoch) = ledger.epochs.epoch_for_link(block.link) {
            if let Some(signer) = ledger.epochs.signer(epoch) {
                if crypto::verify(&signer, &block.hashable_bytes(), &block.signature) {
                    return process_epoch(ledger, txn, block, hash, info, opened, previous_balance, epoch);
                }
            }
        }
    }

    // Non-epoch path: old -> bad_signature -> opened_burn_account -> fork/gap_previous,
    // matching `state_block_impl`'s check order (`spec.md` §4.1).
    if !crypto::verify(&block.account, &block.hashable_bytes(), &block.signature) {
        return Ok(ProcessOutput::code(ProcessCode::BadSignature));
    }
    if block.account.is_zero() {
        return Ok(ProcessOutput::code(ProcessCode::OpenedBurnAccount));
    }

    if opened {
        let head = info.as_ref().unwrap().head;
        if block.previous.is_zero() {
            return Ok(ProcessOutput::code(ProcessCode::Fork));
        }
        if !txn.block_exists(&block.previous)? {
            return Ok(ProcessOutput::code(ProcessCode::GapPrevious));
        }
        if block.previous != head {
            return Ok(ProcessOutput::code(ProcessCode::Fork));
        }
    } else if !block.previous.is_zero() {
        return Ok(ProcessOutput::code(ProcessCode::GapPrevious));
    }

    process_regular(ledger, txn, block, hash, info, opened, previous_balance)
}

#[allow(clippy::too_many_arguments)]
fn process_epoch(
    ledger: &Ledger,
    txn: &mut dyn WriteTransaction,
    block: &mut StateBlock,
    hash: BlockHash,
    info: Option<AccountInfo>,
    opened: bool,
    previous_balance: u128,
    epoch: Epoch,
) -> Result<ProcessOutput> {
    if opened {
        let info = info.as_ref().unwrap();
        if block.previous != info.head || block.representative != info.representative {
            return Ok(ProcessOutput::code(ProcessCode::RepresentativeMismatch));
        }
        if epoch != info.epoch.next() {
            return Ok(ProcessOutput::code(ProcessCode::BlockPosition));
        }
    } else {
        if !block.previous.is_zero() || !block.representative.is_zero() {
            return Ok(ProcessOutput::code(ProcessCode::BlockPosition));
        }
        if !txn.pending_any(&block.account)? {
            return Ok(ProcessOutput::code(ProcessCode::BlockPosition));
        }
        if epoch <= Epoch::ZERO {
            return Ok(ProcessOutput::code(ProcessCode::BlockPosition));
        }
    }

    let details = BlockDetails { epoch, is_send: false, is_receive: false, is_epoch: true };
    let root = pow_root(block.previous, block.account);
    if !ledger.work.validate(&root, block.work, details) {
        return Ok(ProcessOutput::code(ProcessCode::InsufficientWork));
    }

    let height = info.as_ref().map(|i| i.block_count + 1).unwrap_or(1);
    block.sideband = Some(Sideband {
        successor: BlockHash::ZERO,
        account: None,
        height,
        balance: None,
        timestamp: ledger.clock.now_unix(),
        details: Some(details),
    });
    txn.put_block(&hash, &Block::State(block.clone()))?;
    super::rollback::link_successor(txn, &block.previous, hash)?;
    // A legacy-headed account moving to its first state block leaves a
    // stale frontier entry pointing at the old (no-longer-current) head;
    // state-headed chains never have frontier entries (`spec.md` §4.1).
    if !block.previous.is_zero() {
        txn.del_frontier(&block.previous)?;
    }

    let new_info = AccountInfo {
        head: hash,
        representative: block.representative,
        open_block: info.as_ref().map(|i| i.open_block).unwrap_or(hash),
        balance: block.balance,
        modified: ledger.clock.now_unix(),
        block_count: height,
        epoch,
    };
    txn.put_account(&block.account, &new_info)?;

    if !opened {
        txn.put_confirmation_height(&block.account, &ConfirmationHeightInfo::zero())?;
    }

    if epoch == Epoch(2) {
        ledger.mark_epoch_2_started();
    }

    Ok(ProcessOutput {
        code: ProcessCode::Progress,
        account: Some(block.account),
        amount: Some(0),
        previous_balance: Some(previous_balance),
        pending_account: None,
        verified: true,
    })
}

#[allow(clippy::too_many_arguments)]
fn process_regular(
    ledger: &Ledger,
    txn: &mut dyn WriteTransaction,
    block: &mut StateBlock,
    hash: BlockHash,
    info: Option<AccountInfo>,
    opened: bool,
    previous_balance: u128,
) -> Result<ProcessOutput> {
    if !opened && block.link.is_zero() {
        return Ok(ProcessOutput::code(ProcessCode::GapSource));
    }

    let (amount, pending_account, epoch, is_send, is_receive);

    if block.balance < previous_balance {
        amount = previous_balance - block.balance;
        pending_account = None;
        epoch = info.as_ref().unwrap().epoch;
        is_send = true;
        is_receive = false;
    } else if !block.link.is_zero() {
        let source_hash = BlockHash(block.link.0);
        if !txn.block_exists(&source_hash)? {
            return Ok(ProcessOutput::code(ProcessCode::GapSource));
        }
        let pending_key = PendingKey { account: block.account, hash: source_hash };
        let pending = match txn.get_pending(&pending_key)? {
            Some(p) => p,
            None => return Ok(ProcessOutput::code(ProcessCode::Unreceivable)),
        };
        let received = block.balance - previous_balance;
        if received != pending.amount {
            return Ok(ProcessOutput::code(ProcessCode::BalanceMismatch));
        }
        amount = received;
        pending_account = Some(pending.source);
        epoch = std::cmp::max(info.as_ref().map(|i| i.epoch).unwrap_or(Epoch::ZERO), pending.epoch);
        is_send = false;
        is_receive = true;
    } else {
        if block.balance != previous_balance {
            return Ok(ProcessOutput::code(ProcessCode::BalanceMismatch));
        }
        amount = 0;
        pending_account = None;
        epoch = info.as_ref().map(|i| i.epoch).unwrap_or(Epoch::ZERO);
        is_send = false;
        is_receive = false;
    }

    let details = BlockDetails { epoch, is_send, is_receive, is_epoch: false };
    let root = pow_root(block.previous, block.account);
    if !ledger.work.validate(&root, block.work, details) {
        return Ok(ProcessOutput::code(ProcessCode::InsufficientWork));
    }

    let height = info.as_ref().map(|i| i.block_count + 1).unwrap_or(1);
    block.sideband = Some(Sideband {
        successor: BlockHash::ZERO,
        account: None,
        height,
        balance: None,
        timestamp: ledger.clock.now_unix(),
        details: Some(details),
    });
    txn.put_block(&hash, &Block::State(block.clone()))?;
    super::rollback::link_successor(txn, &block.previous, hash)?;
    // A legacy-headed account moving to its first state block leaves a
    // stale frontier entry pointing at the old (no-longer-current) head;
    // state-headed chains never have frontier entries (`spec.md` §4.1).
    if !block.previous.is_zero() {
        txn.del_frontier(&block.previous)?;
    }

    if is_send {
        let send_pending_key = PendingKey { account: Account(block.link.0), hash };
        txn.put_pending(&send_pending_key, &PendingInfo { source: block.account, amount, epoch })?;
    } else if is_receive {
        let consumed_key = PendingKey { account: block.account, hash: BlockHash(block.link.0) };
        txn.del_pending(&consumed_key)?;
    }

    let old_rep = info.as_ref().map(|i| (i.representative, i.balance));
    ledger.rep_weights.transfer(old_rep, (block.representative, block.balance));

    let new_info = AccountInfo {
        head: hash,
        representative: block.representative,
        open_block: info.as_ref().map(|i| i.open_block).unwrap_or(hash),
        balance: block.balance,
        modified: ledger.clock.now_unix(),
        block_count: height,
        epoch,
    };
    txn.put_account(&block.account, &new_info)?;

    if !opened {
        txn.put_confirmation_height(&block.account, &ConfirmationHeightInfo::zero())?;
    }

    Ok(ProcessOutput {
        code: ProcessCode::Progress,
        account: Some(block.account),
        amount: Some(amount),
        previous_balance: Some(previous_balance),
        pending_account,
        verified: true,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::blocks::EpochMarkers;
    use crate::ledger::clock::FixedClock;
    use crate::ledger::work::WorkThresholds;
    use crate::ledger::Ledger;
    use crate::store::memory::MemoryStore;
    use crate::store::Store;
    use crate::types::{Account, BlockHash, Link};

    use super::*;

    fn test_ledger() -> Ledger {
        Ledger::new(EpochMarkers::new(), WorkThresholds::test(), Arc::new(FixedClock::new(1_000)))
    }

    #[test]
    fn open_via_state_block_succeeds_and_updates_weight() {
        let ledger = test_ledger();
        let store = MemoryStore::new();
        let genesis = Account([1u8; 32]);
        let recipient = Account([2u8; 32]);

        // Seed a send from genesis so the recipient has something pending.
        {
            let mut txn = store.tx_begin_write().unwrap();
            txn.put_account(
                &genesis,
                &AccountInfo {
                    head: BlockHash([9u8; 32]),
                    representative: genesis,
                    open_block: BlockHash([9u8; 32]),
                    balance: 1_000,
                    modified: 0,
                    block_count: 1,
                    epoch: Epoch::ZERO,
                },
            )
            .unwrap();
            txn.put_block(
                &BlockHash([9u8; 32]),
                &Block::State(crate::blocks::StateBlock {
                    account: genesis,
                    previous: BlockHash::ZERO,
                    representative: genesis,
                    balance: 1_000,
                    link: Link::ZERO,
                    signature: crate::types::Signature::ZERO,
                    work: crate::types::Work(0),
                    sideband: Some(Sideband {
                        successor: BlockHash::ZERO,
                        account: None,
                        height: 1,
                        balance: None,
                        timestamp: 1,
                        details: Some(BlockDetails { epoch: Epoch::ZERO, is_send: false, is_receive: false, is_epoch: false }),
                    }),
                }),
            )
            .unwrap();
            txn.put_pending(
                &PendingKey { account: recipient, hash: BlockHash([9u8; 32]) },
                &PendingInfo { source: genesis, amount: 100, epoch: Epoch::ZERO },
            )
            .unwrap();
            txn.commit().unwrap();
        }

        let mut open_block = crate::blocks::StateBlock::new(recipient, BlockHash::ZERO, recipient, 100, Link(BlockHash([9u8; 32]).0));
        let mut txn = store.tx_begin_write().unwrap();
        let result = process(&ledger, txn.as_mut(), &mut open_block).unwrap();
        assert_eq!(result.code, ProcessCode::Progress);
        assert_eq!(result.amount, Some(100));
        txn.commit().unwrap();

        assert_eq!(ledger.weight(&recipient), 100);
        let account_info = store.tx_begin_read().unwrap().get_account(&recipient).unwrap().unwrap();
        assert_eq!(account_info.balance, 100);
        assert_eq!(account_info.block_count, 1);
    }

    #[test]
    fn replaying_same_block_twice_yields_old() {
        let ledger = test_ledger();
        let store = MemoryStore::new();
        let account = Account([3u8; 32]);
        let mut block = crate::blocks::StateBlock::new(account, BlockHash::ZERO, account, 0, Link::ZERO);
        // link==0 on an unopened account is gap_source, not old; use this
        // purely to confirm double-processing of an already-stored hash is
        // rejected once the hash exists regardless of validity otherwise.
        let hash = crypto::blake2b_256(&[&block.hashable_bytes()]);
        {
            let mut txn = store.tx_begin_write().unwrap();
            txn.put_block(&hash, &Block::State(block.clone())).unwrap();
            txn.commit().unwrap();
        }
        let mut txn = store.tx_begin_write().unwrap();
        let result = process(&ledger, txn.as_mut(), &mut block).unwrap();
        assert_eq!(result.code, ProcessCode::Old);
    }
}
