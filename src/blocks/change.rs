use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::Sideband;
use crate::types::{Account, BlockHash, Signature, Work};

/// `change`: {previous, representative}. Same balance, new delegate
/// (`spec.md` §3).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChangeBlock {
    pub previous: BlockHash,
    pub representative: Account,
    pub signature: Signature,
    pub work: Work,
    pub sideband: Option<Sideband>,
}

impl ChangeBlock {
    pub fn new(previous: BlockHash, representative: Account) -> Self {
        ChangeBlock {
            previous,
            representative,
            signature: Signature::ZERO,
            work: Work(0),
            sideband: None,
        }
    }

    /// previous(32) ++ representative(32), per `spec.md` §6.
    pub fn hashable_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(64);
        v.extend_from_slice(&self.previous.0);
        v.extend_from_slice(&self.representative.0);
        v
    }

    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut v = self.hashable_bytes();
        v.extend_from_slice(&self.signature.0);
        v.write_u64::<LittleEndian>(self.work.0).expect("vec write never fails");
        v
    }
}
