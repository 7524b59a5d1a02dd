//! The vote wire type (`spec.md` §6): `account(32) || signature(64) ||
//! sequence(8) || N × (block_hash(32) or full_block)`. Sequence numbers are
//! unsigned; a strictly higher sequence always wins over a stored vote from
//! the same representative (`spec.md` §4.3 "Voting").

use byteorder::{LittleEndian, WriteBytesExt};

use crate::blocks::Block;
use crate::crypto::{blake2b_256, verify};
use crate::types::{Account, BlockHash, Signature};

/// One referenced block in a vote: either a bare hash (the common case, once
/// the block is already known) or the full body (first-hand propagation,
/// letting an election learn about a competing block it has never seen).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteElement {
    Hash(BlockHash),
    Full(Box<Block>),
}

impl VoteElement {
    pub fn hash(&self) -> BlockHash {
        match self {
            VoteElement::Hash(h) => *h,
            VoteElement::Full(b) => b.hash(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub account: Account,
    pub signature: Signature,
    pub sequence: u64,
    pub elements: Vec<VoteElement>,
}

impl Vote {
    /// The bytes a representative signs: sequence ++ each referenced hash, in
    /// order. Full blocks are signed by their hash, not their wire bytes, so
    /// a vote's signature is independent of whether a given element arrived
    /// as a hash or a full block.
    fn signable_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.elements.len() * 32);
        out.write_u64::<LittleEndian>(self.sequence).expect("Vec<u8> writes never fail");
        for element in &self.elements {
            out.extend_from_slice(&element.hash().0);
        }
        out
    }

    pub fn hash(&self) -> BlockHash {
        blake2b_256(&[&self.signable_bytes()])
    }

    pub fn verify(&self) -> bool {
        verify(&self.account, &self.signable_bytes(), &self.signature)
    }

    pub fn hashes(&self) -> Vec<BlockHash> {
        self.elements.iter().map(VoteElement::hash).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn signed_vote_verifies_and_detects_tampering() {
        let mut rng = rand::thread_rng();
        let kp = KeyPair::generate(&mut rng);
        let elements = vec![VoteElement::Hash(BlockHash([1u8; 32])), VoteElement::Hash(BlockHash([2u8; 32]))];
        let mut vote = Vote { account: kp.account(), signature: Signature([0u8; 64]), sequence: 5, elements };
        vote.signature = kp.sign(&vote.signable_bytes());
        assert!(vote.verify());

        vote.sequence = 6;
        assert!(!vote.verify(), "signature must not verify once the signed payload changes");
    }

    #[test]
    fn hashes_unwraps_full_block_elements() {
        let h = BlockHash([3u8; 32]);
        let element = VoteElement::Hash(h);
        assert_eq!(element.hash(), h);
    }
}
