use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::Sideband;
use crate::types::{Account, Amount, BlockHash, Signature, Work};

/// `send`: {previous, destination, balance-after}. Legacy; balance decreases
/// (`spec.md` §3).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SendBlock {
    pub previous: BlockHash,
    pub destination: Account,
    pub balance: Amount,
    pub signature: Signature,
    pub work: Work,
    pub sideband: Option<Sideband>,
}

impl SendBlock {
    pub fn new(previous: BlockHash, destination: Account, balance: Amount) -> Self {
        SendBlock {
            previous,
            destination,
            balance,
            signature: Signature::ZERO,
            work: Work(0),
            sideband: None,
        }
    }

    /// previous(32) ++ destination(32) ++ balance(16 BE), per `spec.md` §6.
    pub fn hashable_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(80);
        v.extend_from_slice(&self.previous.0);
        v.extend_from_slice(&self.destination.0);
        v.extend_from_slice(&self.balance.to_be_bytes());
        v
    }

    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut v = self.hashable_bytes();
        v.extend_from_slice(&self.signature.0);
        v.write_u64::<LittleEndian>(self.work.0).expect("vec write never fails");
        v
    }
}
