//! Reverse-application of committed blocks (`spec.md` §4.1 "Rollback").
//!
//! A rollback walks an account's chain backward from its head down to (and
//! including) the target hash, undoing each block's effect on the pending
//! table, the representative-weight cache, and `account_info`. Rolling back
//! a send whose pending entry has already been consumed by a receive on the
//! destination account requires rolling back that receive (and anything
//! built on top of it) first, which may itself cascade across further
//! accounts — hence the whole operation is planned in one pass and only
//! executed once every block on the plan is confirmed to sit above its
//! account's confirmation height, so a refusal never leaves partial state
//! (`spec.md` §4.1: "Rollback refuses to cross a confirmed block... the
//! whole rollback fails and no state changes").

use std::collections::HashSet;

use anyhow::Result;

use crate::blocks::{Block, Sideband};
use crate::store::{ConfirmationHeightInfo, PendingInfo, PendingKey, WriteTransaction};
use crate::types::{Account, BlockHash, Epoch};

use super::{Ledger, LedgerError};

/// Sets `predecessor`'s sideband successor pointer to `successor`. A no-op
/// for the zero hash (the account's first block has no predecessor).
pub(crate) fn link_successor(txn: &mut dyn WriteTransaction, predecessor: &BlockHash, successor: BlockHash) -> Result<()> {
    if predecessor.is_zero() {
        return Ok(());
    }
    let mut block = txn.get_block(predecessor)?.ok_or(LedgerError::MissingBlock(*predecessor))?;
    if let Some(sideband) = block.sideband().cloned() {
        block.set_sideband(Sideband { successor, ..sideband });
    }
    txn.put_block(predecessor, &block)
}

fn unlink_successor(txn: &mut dyn WriteTransaction, predecessor: &BlockHash) -> Result<()> {
    if predecessor.is_zero() {
        return Ok(());
    }
    let mut block = txn.get_block(predecessor)?.ok_or(LedgerError::MissingBlock(*predecessor))?;
    if let Some(sideband) = block.sideband().cloned() {
        block.set_sideband(Sideband { successor: BlockHash::ZERO, ..sideband });
    }
    txn.put_block(predecessor, &block)
}

/// Representative in effect immediately after `hash` committed. Legacy
/// send/receive blocks don't carry a representative field, so this walks
/// backward to the nearest open/change/state block.
fn representative_as_of(txn: &mut dyn WriteTransaction, hash: BlockHash) -> Result<Account> {
    let block = txn.get_block(&hash)?.ok_or(LedgerError::MissingBlock(hash))?;
    match &block {
        Block::Open(b) => Ok(b.representative),
        Block::Change(b) => Ok(b.representative),
        Block::State(b) => Ok(b.representative),
        Block::Send(_) | Block::Receive(_) => representative_as_of(txn, block.previous()),
    }
}

/// Epoch in effect immediately after `hash` committed. Legacy blocks are
/// always epoch_0 unless they build on an account a state block already
/// upgraded, in which case the upgrade is visible only on the state block
/// itself.
fn epoch_as_of(txn: &mut dyn WriteTransaction, hash: BlockHash) -> Result<Epoch> {
    let block = txn.get_block(&hash)?.ok_or(LedgerError::MissingBlock(hash))?;
    match &block {
        Block::Open(_) => Ok(Epoch::ZERO),
        Block::State(b) => Ok(b.sideband.as_ref().and_then(|s| s.details).map(|d| d.epoch).unwrap_or(Epoch::ZERO)),
        Block::Send(_) | Block::Receive(_) | Block::Change(_) => epoch_as_of(txn, block.previous()),
    }
}

/// Walks `destination`'s chain backward from its head looking for the block
/// whose second dependent-block slot (the receive source) is `source_hash`.
fn find_receiving_block(ledger: &Ledger, txn: &mut dyn WriteTransaction, destination: Account, source_hash: BlockHash) -> Result<BlockHash> {
    let info = txn.get_account(&destination)?.ok_or(LedgerError::UnknownAccount(destination))?;
    let mut cursor = info.head;
    loop {
        let deps = ledger.dependent_blocks(txn, &cursor)?;
        if deps[1] == Some(source_hash) {
            return Ok(cursor);
        }
        let block = txn.get_block(&cursor)?.ok_or(LedgerError::MissingBlock(cursor))?;
        if block.previous().is_zero() {
            return Err(LedgerError::NoReceivingBlock { destination, source: source_hash }.into());
        }
        cursor = block.previous();
    }
}

/// `true` iff `block` is a send under any shape, per the sideband's
/// `is_send` flag (state) or the block type itself (legacy `send`).
fn is_send(block: &Block) -> bool {
    match block {
        Block::Send(_) => true,
        Block::State(b) => b.sideband.as_ref().map(|s| s.is_send()).unwrap_or(false),
        _ => false,
    }
}

/// Appends the plan (account, hash) pairs, head-first, needed to roll
/// `account` back from its current head down to and including `target`.
/// Cascades into other accounts' plans wherever a send's pending entry has
/// already been consumed.
fn collect_plan(
    ledger: &Ledger,
    txn: &mut dyn WriteTransaction,
    plan: &mut Vec<(Account, BlockHash)>,
    visiting: &mut HashSet<(Account, BlockHash)>,
    account: Account,
    target: BlockHash,
) -> Result<()> {
    let info = txn.get_account(&account)?.ok_or(LedgerError::UnknownAccount(account))?;
    let conf = txn.get_confirmation_height(&account)?.unwrap_or_else(ConfirmationHeightInfo::zero);
    let mut cursor = info.head;
    loop {
        if !visiting.insert((account, cursor)) {
            return Err(LedgerError::CyclicRollback(cursor).into());
        }
        let block = txn.get_block(&cursor)?.ok_or(LedgerError::MissingBlock(cursor))?;
        let height = block.sideband().map(|s| s.height).unwrap_or(0);
        if height <= conf.height {
            return Err(LedgerError::RollbackConfirmed { hash: cursor, height, confirmed_height: conf.height }.into());
        }
        if is_send(&block) {
            let destination = ledger.block_destination(txn, &cursor)?.ok_or(LedgerError::NoDestination(cursor))?;
            let pending_exists = txn.get_pending(&PendingKey { account: destination, hash: cursor })?.is_some();
            if !pending_exists {
                let receiving_hash = find_receiving_block(ledger, txn, destination, cursor)?;
                collect_plan(ledger, txn, plan, visiting, destination, receiving_hash)?;
            }
        }
        plan.push((account, cursor));
        if cursor == target {
            return Ok(());
        }
        if block.previous().is_zero() {
            return Err(LedgerError::RollbackTargetNotFound { account, target }.into());
        }
        cursor = block.previous();
    }
}

/// Reverses exactly one already-plan-validated block.
fn rollback_one(ledger: &Ledger, txn: &mut dyn WriteTransaction, account: Account, hash: BlockHash) -> Result<()> {
    let block = txn.get_block(&hash)?.ok_or(LedgerError::MissingBlock(hash))?;
    let info = txn.get_account(&account)?.ok_or(LedgerError::UnknownAccount(account))?;
    let previous = block.previous();
    let previous_balance = ledger.balance(txn, &previous)?.unwrap_or(0);

    match &block {
        Block::State(b) => {
            let details = b.sideband.as_ref().and_then(|s| s.details);
            if details.map(|d| d.is_epoch).unwrap_or(false) {
                // Epoch blocks never touch pending or rep weights.
            } else if details.map(|d| d.is_send).unwrap_or(false) {
                let destination = Account(b.link.0);
                txn.del_pending(&PendingKey { account: destination, hash })?;
                ledger.rep_weights.transfer(Some((b.representative, b.balance)), (previous_representative(txn, previous)?, previous_balance));
            } else if details.map(|d| d.is_receive).unwrap_or(false) {
                let source_hash = BlockHash(b.link.0);
                let source_account = ledger.account(txn, &source_hash)?.ok_or(LedgerError::NoSourceAccount(source_hash))?;
                let source_epoch = epoch_as_of(txn, source_hash)?;
                txn.put_pending(
                    &PendingKey { account, hash: source_hash },
                    &PendingInfo { source: source_account, amount: b.balance - previous_balance, epoch: source_epoch },
                )?;
                ledger.rep_weights.transfer(Some((b.representative, b.balance)), (previous_representative(txn, previous)?, previous_balance));
            } else {
                ledger.rep_weights.transfer(Some((b.representative, b.balance)), (previous_representative(txn, previous)?, previous_balance));
            }
        }
        Block::Send(b) => {
            txn.del_pending(&PendingKey { account: b.destination, hash })?;
            ledger.rep_weights.transfer(Some((info.representative, info.balance)), (info.representative, previous_balance));
            unlink_successor(txn, &previous)?;
            txn.del_frontier(&hash)?;
            if !previous.is_zero() {
                txn.put_frontier(&previous, &account)?;
            }
        }
        Block::Receive(b) => {
            let source_account = ledger.account(txn, &b.source)?.ok_or(LedgerError::NoSourceAccount(b.source))?;
            txn.put_pending(&PendingKey { account, hash: b.source }, &PendingInfo { source: source_account, amount: info.balance - previous_balance, epoch: Epoch::ZERO })?;
            ledger.rep_weights.transfer(Some((info.representative, info.balance)), (info.representative, previous_balance));
            unlink_successor(txn, &previous)?;
            txn.del_frontier(&hash)?;
            if !previous.is_zero() {
                txn.put_frontier(&previous, &account)?;
            }
        }
        Block::Open(b) => {
            let source_account = ledger.account(txn, &b.source)?.ok_or(LedgerError::NoSourceAccount(b.source))?;
            txn.put_pending(&PendingKey { account, hash: b.source }, &PendingInfo { source: source_account, amount: info.balance, epoch: Epoch::ZERO })?;
            ledger.rep_weights.subtract(info.representative, info.balance);
            txn.del_frontier(&hash)?;
        }
        Block::Change(b) => {
            let restored_rep = previous_representative(txn, previous)?;
            ledger.rep_weights.transfer(Some((b.representative, info.balance)), (restored_rep, previous_balance));
            unlink_successor(txn, &previous)?;
            txn.del_frontier(&hash)?;
            if !previous.is_zero() {
                txn.put_frontier(&previous, &account)?;
            }
        }
    }

    if previous.is_zero() {
        txn.del_account(&account)?;
    } else {
        let new_info = crate::store::AccountInfo {
            head: previous,
            representative: previous_representative(txn, previous)?,
            open_block: info.open_block,
            balance: previous_balance,
            modified: ledger.clock.now_unix(),
            block_count: info.block_count - 1,
            epoch: epoch_as_of(txn, previous)?,
        };
        txn.put_account(&account, &new_info)?;
    }

    Ok(())
}

fn previous_representative(txn: &mut dyn WriteTransaction, previous: BlockHash) -> Result<Account> {
    if previous.is_zero() {
        return Ok(Account::ZERO);
    }
    representative_as_of(txn, previous)
}

/// Reverse-applies the block at `hash`, cascading into any other account
/// whose chain must be partially rolled back first. Returns `Err` without
/// any staged mutation surviving (the caller must not commit `txn` on
/// error) if any block on the plan sits at or below its account's
/// confirmation height.
pub fn rollback(ledger: &Ledger, txn: &mut dyn WriteTransaction, hash: &BlockHash) -> Result<()> {
    let account = ledger.account(txn, hash)?.ok_or(LedgerError::MissingBlock(*hash))?;
    let mut plan = Vec::new();
    let mut visiting = HashSet::new();
    collect_plan(ledger, txn, &mut plan, &mut visiting, account, *hash)?;
    for (acc, h) in plan {
        rollback_one(ledger, txn, acc, h)?;
    }
    Ok(())
}
