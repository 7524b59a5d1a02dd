//! Fixed-size primitive types shared across the ledger: account identifiers,
//! block hashes, balances, proof-of-work, and signatures.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! fixed_bytes_newtype {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;
            pub const ZERO: $name = $name([0u8; $len]);

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn from_slice(data: &[u8]) -> Option<Self> {
                if data.len() != $len {
                    return None;
                }
                let mut buf = [0u8; $len];
                buf.copy_from_slice(data);
                Some($name(buf))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode_upper(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode_upper(self.0))
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s)?;
                Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
            }
        }
    };
}

fixed_bytes_newtype!(Account, 32);
fixed_bytes_newtype!(BlockHash, 32);
fixed_bytes_newtype!(Link, 32);
fixed_bytes_newtype!(Signature, 64);

/// 128-bit unsigned balance/amount, as required by `spec.md` §3.
pub type Amount = u128;

/// Genesis total supply, `2^128 - 1`, matching the literal used throughout
/// `spec.md` §8's end-to-end scenarios.
pub const MAX_AMOUNT: Amount = u128::MAX;

/// Proof-of-work solution nonce. Stored little-endian for legacy blocks and
/// big-endian for `state` blocks per `spec.md` §6; this type is endianness
/// agnostic and callers pick the encoding at (de)serialization time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Work(pub u64);

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Work({:016x})", self.0)
    }
}

/// Linearly ordered protocol upgrade level. `Epoch(0)` is the legacy-block
/// era; `Epoch(n>0)` blocks are state blocks whose link is a registered
/// epoch marker.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Epoch(pub u8);

impl Epoch {
    pub const ZERO: Epoch = Epoch(0);

    pub fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch_{}", self.0)
    }
}

/// (previous-hash, root) pair identifying the election slot a block competes
/// in. `root` is `previous` when non-zero, else the account (first block).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct QualifiedRoot {
    pub previous: BlockHash,
    pub root: Account,
}

impl QualifiedRoot {
    pub fn new(previous: BlockHash, account: Account) -> Self {
        let root = if previous.is_zero() {
            account
        } else {
            Account(previous.0)
        };
        QualifiedRoot { previous, root }
    }
}

impl fmt::Display for QualifiedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{prev: {}, root: {}}}", self.previous, self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_root_uses_account_when_unopened() {
        let account = Account([7u8; 32]);
        let q = QualifiedRoot::new(BlockHash::ZERO, account);
        assert_eq!(q.root, account);
    }

    #[test]
    fn qualified_root_uses_previous_when_opened() {
        let prev = BlockHash([9u8; 32]);
        let account = Account([7u8; 32]);
        let q = QualifiedRoot::new(prev, account);
        assert_eq!(q.root.0, prev.0);
    }

    #[test]
    fn hex_round_trip() {
        let h = BlockHash([0xABu8; 32]);
        let s = h.to_string();
        let parsed: BlockHash = s.parse().unwrap();
        assert_eq!(h, parsed);
    }
}
