use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::Sideband;
use crate::types::{Account, BlockHash, Signature, Work};

/// `open`: {account, source (a send hash), representative}. Must be
/// account's first block (`spec.md` §3).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct OpenBlock {
    pub source: BlockHash,
    pub representative: Account,
    pub account: Account,
    pub signature: Signature,
    pub work: Work,
    pub sideband: Option<Sideband>,
}

impl OpenBlock {
    pub fn new(source: BlockHash, representative: Account, account: Account) -> Self {
        OpenBlock {
            source,
            representative,
            account,
            signature: Signature::ZERO,
            work: Work(0),
            sideband: None,
        }
    }

    /// source(32) ++ representative(32) ++ account(32), per `spec.md` §6.
    pub fn hashable_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(96);
        v.extend_from_slice(&self.source.0);
        v.extend_from_slice(&self.representative.0);
        v.extend_from_slice(&self.account.0);
        v
    }

    /// source(32) ++ representative(32) ++ account(32) ++ signature(64) ++ work(8 LE).
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut v = self.hashable_bytes();
        v.extend_from_slice(&self.signature.0);
        v.write_u64::<LittleEndian>(self.work.0).expect("vec write never fails");
        v
    }
}
