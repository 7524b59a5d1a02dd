//! The polymorphic block model (`spec.md` §3): five concrete shapes sharing
//! a common set of accessors, modeled as a tagged variant per the REDESIGN
//! FLAGS in `spec.md` §9 ("Block polymorphism").

mod change;
mod open;
mod receive;
mod send;
mod state;

pub use change::ChangeBlock;
pub use open::OpenBlock;
pub use receive::ReceiveBlock;
pub use send::SendBlock;
pub use state::{EpochMarkers, StateBlock};

use serde::{Deserialize, Serialize};

use crate::types::{Account, Amount, BlockHash, Epoch, Link, Signature, Work};

/// Discriminant used only for BCS/in-memory tagging; the on-the-wire hash
/// preamble for state blocks is the fixed constant in [`state::STATE_BLOCK_PREAMBLE`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BlockType {
    Send,
    Receive,
    Open,
    Change,
    State,
}

/// The `details` byte on a state block's sideband (`spec.md` §6):
/// bit7=is_send, bit6=is_receive, bit5=is_epoch, bits4-0=epoch ordinal.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BlockDetails {
    pub epoch: Epoch,
    pub is_send: bool,
    pub is_receive: bool,
    pub is_epoch: bool,
}

impl BlockDetails {
    pub fn to_byte(self) -> u8 {
        let mut b = self.epoch.0 & 0x1F;
        if self.is_send {
            b |= 1 << 7;
        }
        if self.is_receive {
            b |= 1 << 6;
        }
        if self.is_epoch {
            b |= 1 << 5;
        }
        b
    }

    pub fn from_byte(b: u8) -> Self {
        BlockDetails {
            epoch: Epoch(b & 0x1F),
            is_send: b & (1 << 7) != 0,
            is_receive: b & (1 << 6) != 0,
            is_epoch: b & (1 << 5) != 0,
        }
    }
}

/// Per-block metadata computed at commit time and persisted alongside the
/// block body (`spec.md` §3, §6). Required for O(1) balance/amount/account
/// lookup once a block is committed.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Sideband {
    pub successor: BlockHash,
    /// Present for non-state, non-open blocks (legacy send/receive/change),
    /// which don't carry `account` in their hashable fields.
    pub account: Option<Account>,
    pub height: u64,
    /// Present for receive/change/open legacy blocks, whose hashable fields
    /// don't carry `balance` directly.
    pub balance: Option<Amount>,
    pub timestamp: u64,
    /// Present only on state blocks.
    pub details: Option<BlockDetails>,
}

impl Sideband {
    pub fn is_send(&self) -> bool {
        self.details.map(|d| d.is_send).unwrap_or(false)
    }

    pub fn is_receive(&self) -> bool {
        self.details.map(|d| d.is_receive).unwrap_or(false)
    }

    pub fn is_epoch(&self) -> bool {
        self.details.map(|d| d.is_epoch).unwrap_or(false)
    }
}

/// A polymorphic ledger block. Variants correspond 1:1 to the five shapes in
/// `spec.md` §3.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Block {
    Open(OpenBlock),
    Send(SendBlock),
    Receive(ReceiveBlock),
    Change(ChangeBlock),
    State(StateBlock),
}

/// Common accessors over the block shapes, matching the trait surface named
/// in `spec.md` §9 ("Block polymorphism"). Implemented by matching on the
/// tag rather than duplicating logic per struct.
impl Block {
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Open(_) => BlockType::Open,
            Block::Send(_) => BlockType::Send,
            Block::Receive(_) => BlockType::Receive,
            Block::Change(_) => BlockType::Change,
            Block::State(_) => BlockType::State,
        }
    }

    /// Hashable-field bytes (excludes signature and work), per `spec.md` §6.
    pub fn hashable_bytes(&self) -> Vec<u8> {
        match self {
            Block::Open(b) => b.hashable_bytes(),
            Block::Send(b) => b.hashable_bytes(),
            Block::Receive(b) => b.hashable_bytes(),
            Block::Change(b) => b.hashable_bytes(),
            Block::State(b) => b.hashable_bytes(),
        }
    }

    pub fn hash(&self) -> BlockHash {
        crate::crypto::blake2b_256(&[&self.hashable_bytes()])
    }

    pub fn previous(&self) -> BlockHash {
        match self {
            Block::Open(_) => BlockHash::ZERO,
            Block::Send(b) => b.previous,
            Block::Receive(b) => b.previous,
            Block::Change(b) => b.previous,
            Block::State(b) => b.previous,
        }
    }

    /// `root` = previous if non-zero, else account (`spec.md` §3).
    pub fn root(&self, account_hint: Account) -> crate::types::QualifiedRoot {
        crate::types::QualifiedRoot::new(self.previous(), self.account().unwrap_or(account_hint))
    }

    /// Only state and open blocks carry `account` directly; other shapes
    /// rely on the sideband once committed (`Ledger::account`).
    pub fn account(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.account),
            Block::State(b) => Some(b.account),
            _ => None,
        }
    }

    pub fn representative(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.representative),
            Block::Change(b) => Some(b.representative),
            Block::State(b) => Some(b.representative),
            _ => None,
        }
    }

    /// Polymorphic link field (`spec.md` §3): receive-source for legacy
    /// receive/open, destination for legacy send, the universal `link` for
    /// state blocks. `None` for change (no link semantics).
    pub fn link(&self) -> Option<Link> {
        match self {
            Block::Open(b) => Some(Link(b.source.0)),
            Block::Send(b) => Some(Link(b.destination.0)),
            Block::Receive(b) => Some(Link(b.source.0)),
            Block::Change(_) => None,
            Block::State(b) => Some(b.link),
        }
    }

    /// Balance carried directly by state/send blocks; `None` for shapes that
    /// need the sideband (legacy receive/change/open) to know their balance.
    pub fn balance(&self) -> Option<Amount> {
        match self {
            Block::Send(b) => Some(b.balance),
            Block::State(b) => Some(b.balance),
            _ => None,
        }
    }

    pub fn signature(&self) -> Signature {
        match self {
            Block::Open(b) => b.signature,
            Block::Send(b) => b.signature,
            Block::Receive(b) => b.signature,
            Block::Change(b) => b.signature,
            Block::State(b) => b.signature,
        }
    }

    pub fn set_signature(&mut self, signature: Signature) {
        match self {
            Block::Open(b) => b.signature = signature,
            Block::Send(b) => b.signature = signature,
            Block::Receive(b) => b.signature = signature,
            Block::Change(b) => b.signature = signature,
            Block::State(b) => b.signature = signature,
        }
    }

    pub fn work(&self) -> Work {
        match self {
            Block::Open(b) => b.work,
            Block::Send(b) => b.work,
            Block::Receive(b) => b.work,
            Block::Change(b) => b.work,
            Block::State(b) => b.work,
        }
    }

    pub fn set_work(&mut self, work: Work) {
        match self {
            Block::Open(b) => b.work = work,
            Block::Send(b) => b.work = work,
            Block::Receive(b) => b.work = work,
            Block::Change(b) => b.work = work,
            Block::State(b) => b.work = work,
        }
    }

    pub fn sideband(&self) -> Option<&Sideband> {
        match self {
            Block::Open(b) => b.sideband.as_ref(),
            Block::Send(b) => b.sideband.as_ref(),
            Block::Receive(b) => b.sideband.as_ref(),
            Block::Change(b) => b.sideband.as_ref(),
            Block::State(b) => b.sideband.as_ref(),
        }
    }

    pub fn set_sideband(&mut self, sideband: Sideband) {
        match self {
            Block::Open(b) => b.sideband = Some(sideband),
            Block::Send(b) => b.sideband = Some(sideband),
            Block::Receive(b) => b.sideband = Some(sideband),
            Block::Change(b) => b.sideband = Some(sideband),
            Block::State(b) => b.sideband = Some(sideband),
        }
    }

    /// `true` iff `link` equals any registered epoch marker (`spec.md` §4.1
    /// `is_epoch_link`). Only meaningful for state blocks.
    pub fn is_epoch_link(&self, epochs: &EpochMarkers) -> bool {
        match self.link() {
            Some(link) => epochs.is_epoch_link(link),
            None => false,
        }
    }

    /// Full wire encoding (hashable fields ++ signature ++ work), per
    /// `spec.md` §6.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        match self {
            Block::Open(b) => b.to_wire_bytes(),
            Block::Send(b) => b.to_wire_bytes(),
            Block::Receive(b) => b.to_wire_bytes(),
            Block::Change(b) => b.to_wire_bytes(),
            Block::State(b) => b.to_wire_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_byte_round_trips() {
        let d = BlockDetails { epoch: Epoch(2), is_send: true, is_receive: false, is_epoch: false };
        assert_eq!(BlockDetails::from_byte(d.to_byte()), d);

        let d2 = BlockDetails { epoch: Epoch(0), is_send: false, is_receive: true, is_epoch: false };
        assert_eq!(BlockDetails::from_byte(d2.to_byte()), d2);

        let d3 = BlockDetails { epoch: Epoch(31), is_send: false, is_receive: false, is_epoch: true };
        assert_eq!(BlockDetails::from_byte(d3.to_byte()), d3);
    }
}
