//! External collaborator interfaces (`SPEC_FULL.md` AMBIENT §6a). Transport,
//! bootstrap, PoW generation, wallet custody, and telemetry are out of scope
//! per `spec.md` §1; only the trait surface the core holds handles to is
//! modeled here, grounded on the teacher's pattern of depending on
//! `Arc<dyn DbReader>` / `Arc<dyn RecoveryApi>` trait objects for
//! collaborators it does not itself implement
//! (`persistent_liveness_storage.rs`).

use anyhow::Result;

use crate::blocks::Block;
use crate::types::{Account, BlockHash, Signature, Work};
use crate::vote::Vote;

/// Peer transport and discovery.
pub trait PeerNetwork: Send + Sync {
    fn broadcast(&self, message: Message);
    fn send_to(&self, peer: PeerId, message: Message);
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PeerId(pub [u8; 32]);

/// The subset of wire messages the core hands to `PeerNetwork`, not the full
/// protocol (out of scope per `spec.md` §1).
#[derive(Clone, Debug)]
pub enum Message {
    PublishBlock(Block),
    ConfirmReq(BlockHash),
    Vote(Vote),
}

/// Historical chain fetch, invoked when a gap (`ProcessCode::GapPrevious` /
/// `GapSource`) can't be resolved from locally-buffered unchecked entries.
pub trait Bootstrapper: Send + Sync {
    fn request_chain(&self, account: Account);
    fn request_block(&self, hash: BlockHash);
}

/// Proof-of-work generation/validation. Validation is in-scope (the
/// Ledger's difficulty check, `ledger::work::WorkThresholds`); generation —
/// actually mining a nonce — is not, per `spec.md` §1.
pub trait WorkGenerator: Send + Sync {
    fn generate(&self, root: BlockHash, difficulty: u64) -> Option<Work>;
    fn validate(&self, root: BlockHash, work: Work, difficulty: u64) -> bool;
}

/// Keystore used to produce block/vote signatures. Out of scope beyond this
/// signature, per `spec.md` §1 ("wallet UX").
pub trait Wallet: Send + Sync {
    fn sign(&self, account: Account, hash: BlockHash) -> Result<Signature>;
}

/// A point-in-time snapshot handed to the telemetry collaborator; fields are
/// intentionally coarse since telemetry wire format is out of scope.
#[derive(Clone, Debug)]
pub struct TelemetrySnapshot {
    pub active_elections: usize,
    pub active_difficulty: u64,
    pub confirmation_height_queue_len: usize,
}

pub trait Telemetry: Send + Sync {
    fn record(&self, snapshot: TelemetrySnapshot);
}
