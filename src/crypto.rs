//! Hashing and signature primitives.
//!
//! Block hashes are BLAKE2b-256 digests (`spec.md` §6); block and vote
//! signatures are Ed25519.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use ed25519_dalek::Verifier;

use crate::types::{Account, BlockHash, Signature, Work};

/// Computes the BLAKE2b-256 digest of the concatenation of `parts`.
pub fn blake2b_256(parts: &[&[u8]]) -> BlockHash {
    let mut hasher = Blake2bVar::new(32).expect("32 is a valid BLAKE2b output length");
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    hasher.finalize_variable(&mut out).expect("output buffer is sized correctly");
    BlockHash(out)
}

/// Computes the proof-of-work "difficulty" value for a work solution against
/// a root hash: BLAKE2b-64 of `work` (little-endian) ++ `root`, read back as
/// a little-endian `u64`. A solution is valid iff this value is `>=` the
/// threshold for the block's details (`ledger::work::WorkThresholds`).
pub fn work_value(root: &BlockHash, work: Work) -> u64 {
    let mut hasher = Blake2bVar::new(8).expect("8 is a valid BLAKE2b output length");
    hasher.update(&work.0.to_le_bytes());
    hasher.update(&root.0);
    let mut out = [0u8; 8];
    hasher.finalize_variable(&mut out).expect("output buffer is sized correctly");
    u64::from_le_bytes(out)
}

/// Verifies an Ed25519 signature over `message` under `account`'s public key.
///
/// Returns `false` (never panics) for malformed public keys or signatures:
/// the ledger treats a verification failure identically to an invalid
/// signature (`ProcessResult::BadSignature`).
pub fn verify(account: &Account, message: &[u8], signature: &Signature) -> bool {
    let Ok(public_key) = ed25519_dalek::PublicKey::from_bytes(&account.0) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::from_bytes(&signature.0) else {
        return false;
    };
    public_key.verify(message, &sig).is_ok()
}

/// A signing keypair, used only by tests and by the `Wallet` collaborator
/// interface (`spec.md` AMBIENT §6a) to produce fixtures.
pub struct KeyPair {
    keypair: ed25519_dalek::Keypair,
}

impl KeyPair {
    pub fn generate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        KeyPair { keypair: ed25519_dalek::Keypair::generate(rng) }
    }

    pub fn account(&self) -> Account {
        Account(self.keypair.public.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.keypair.sign(message).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let mut rng = rand::thread_rng();
        let kp = KeyPair::generate(&mut rng);
        let msg = b"hello lattice";
        let sig = kp.sign(msg);
        assert!(verify(&kp.account(), msg, &sig));
    }

    #[test]
    fn tampered_message_fails() {
        let mut rng = rand::thread_rng();
        let kp = KeyPair::generate(&mut rng);
        let sig = kp.sign(b"hello");
        assert!(!verify(&kp.account(), b"goodbye", &sig));
    }

    #[test]
    fn work_value_is_deterministic_and_sensitive_to_root() {
        let root_a = BlockHash([1u8; 32]);
        let root_b = BlockHash([2u8; 32]);
        let work = Work(12345);
        assert_eq!(work_value(&root_a, work), work_value(&root_a, work));
        assert_ne!(work_value(&root_a, work), work_value(&root_b, work));
    }

    #[test]
    fn blake2b_is_deterministic() {
        let a = blake2b_256(&[b"abc", b"def"]);
        let b = blake2b_256(&[b"abc", b"def"]);
        assert_eq!(a, b);
        let c = blake2b_256(&[b"abcd", b"ef"]);
        assert_eq!(a, c, "blake2b hashes the concatenated byte stream, not the part boundaries");
    }
}
