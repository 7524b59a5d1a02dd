use std::collections::HashMap;

use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::Sideband;
use crate::types::{Account, Amount, BlockHash, Epoch, Link, Signature, Work};

/// Fixed 8-byte little-endian preamble prepended to a state block's hashable
/// bytes before hashing (`spec.md` §6). The specific constant only needs to
/// be stable within one ledger instance and distinct from other block-type
/// preambles, since it is never compared across implementations here.
pub const STATE_BLOCK_PREAMBLE: u64 = 0x6;

/// `state`: {account, previous, representative, balance, link}. Universal;
/// link is either a send-source hash (receive), destination (send), or an
/// epoch marker (`spec.md` §3).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StateBlock {
    pub account: Account,
    pub previous: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    pub link: Link,
    pub signature: Signature,
    pub work: Work,
    pub sideband: Option<Sideband>,
}

impl StateBlock {
    pub fn new(
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: Link,
    ) -> Self {
        StateBlock {
            account,
            previous,
            representative,
            balance,
            link,
            signature: Signature::ZERO,
            work: Work(0),
            sideband: None,
        }
    }

    /// preamble(8 LE) ++ account(32) ++ previous(32) ++ representative(32)
    /// ++ balance(16 BE) ++ link(32), per `spec.md` §6.
    pub fn hashable_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(8 + 32 * 4 + 16);
        v.extend_from_slice(&STATE_BLOCK_PREAMBLE.to_le_bytes());
        v.extend_from_slice(&self.account.0);
        v.extend_from_slice(&self.previous.0);
        v.extend_from_slice(&self.representative.0);
        v.extend_from_slice(&self.balance.to_be_bytes());
        v.extend_from_slice(&self.link.0);
        v
    }

    /// hashable bytes ++ signature(64) ++ work(8 BE). State block work is
    /// big-endian, unlike the legacy shapes (`spec.md` §6, historical quirk).
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut v = self.hashable_bytes();
        v.extend_from_slice(&self.signature.0);
        v.write_u64::<BigEndian>(self.work.0).expect("vec write never fails");
        v
    }
}

/// Registry of well-known per-epoch link markers (`spec.md` §3, §4.1
/// `is_epoch_link`). A state block whose `link` equals a registered marker
/// (and whose balance is unchanged from `previous`) is an epoch block.
#[derive(Clone, Debug, Default)]
pub struct EpochMarkers {
    markers: HashMap<Link, Epoch>,
    signers: HashMap<Epoch, Account>,
}

impl EpochMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, epoch: Epoch, marker: Link, signer: Account) {
        self.markers.insert(marker, epoch);
        self.signers.insert(epoch, signer);
    }

    pub fn is_epoch_link(&self, link: Link) -> bool {
        self.markers.contains_key(&link)
    }

    pub fn epoch_for_link(&self, link: Link) -> Option<Epoch> {
        self.markers.get(&link).copied()
    }

    /// The network-configured key that must sign an epoch block for `epoch`
    /// (`spec.md` §4.1: "Signature must verify against the epoch signer").
    pub fn signer(&self, epoch: Epoch) -> Option<Account> {
        self.signers.get(&epoch).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_markers_round_trip() {
        let mut markers = EpochMarkers::new();
        let link = Link([1u8; 32]);
        let signer = Account([2u8; 32]);
        markers.register(Epoch(1), link, signer);
        assert!(markers.is_epoch_link(link));
        assert_eq!(markers.epoch_for_link(link), Some(Epoch(1)));
        assert_eq!(markers.signer(Epoch(1)), Some(signer));
        assert!(!markers.is_epoch_link(Link([3u8; 32])));
    }
}
