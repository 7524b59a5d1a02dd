//! The Store collaborator: transactional KV tables the Ledger validates
//! against (`spec.md` §6). This module specifies the trait contract plus a
//! RocksDB-backed implementation and an in-memory test double; the actual
//! on-disk engine choice (here, a single RocksDB instance with one column
//! family per table) is itself an AMBIENT implementation decision, not part
//! of the distilled spec, which treats storage as an external collaborator.

pub mod memory;
pub mod rocks;
pub mod schema;

use serde::{Deserialize, Serialize};

use crate::blocks::Block;
use crate::collaborators::PeerId;
use crate::types::{Account, Amount, BlockHash, Epoch};

/// Thiserror-derived error enum for the storage subsystem (`SPEC_FULL.md`
/// AMBIENT "error handling"). Covers the schema-layer consistency
/// assumptions ([`schema::SchemaDb`]'s column-family lookups) and the fixed-
/// width key/value codecs in [`rocks`], composed at the boundary with
/// `anyhow::Result` everywhere a `Store` implementation is used.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("missing column family: {0}")]
    MissingColumnFamily(schema::ColumnFamilyName),
    #[error("bad {table} key length: expected {expected}, got {actual}")]
    InvalidKeyLength { table: &'static str, expected: usize, actual: usize },
    #[error("bad {table} value length: expected {expected}, got {actual}")]
    InvalidValueLength { table: &'static str, expected: usize, actual: usize },
}

/// Per-account row in the accounts table (`spec.md` §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AccountInfo {
    pub head: BlockHash,
    pub representative: Account,
    pub open_block: BlockHash,
    pub balance: Amount,
    pub modified: u64,
    pub block_count: u64,
    pub epoch: Epoch,
}

/// Per-(destination, send-hash) row in the pending table (`spec.md` §3).
/// Created when a send commits; destroyed when its matching receive
/// commits.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PendingKey {
    pub account: Account,
    pub hash: BlockHash,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PendingInfo {
    pub source: Account,
    pub amount: Amount,
    pub epoch: Epoch,
}

/// Per-account row in the confirmation-height table (`spec.md` §3). Strictly
/// monotonic increasing.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ConfirmationHeightInfo {
    pub height: u64,
    pub frontier: BlockHash,
}

impl ConfirmationHeightInfo {
    pub fn zero() -> Self {
        ConfirmationHeightInfo { height: 0, frontier: BlockHash::ZERO }
    }
}

/// A block awaiting a missing dependency, keyed by that dependency's hash
/// and arrival time (`spec.md` §6 unchecked table).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct UncheckedKey {
    pub dependency: BlockHash,
    pub arrival_time: u64,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct UncheckedInfo {
    pub block: Block,
}

/// Schema-version row stored in the `meta` table, driving the upgrade
/// discipline of `spec.md` §6 ("Schema versioning").
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// A read-only snapshot handle. Store implementations may back this with a
/// live RocksDB snapshot (`rocks::RocksStore`) or just direct reads
/// (`memory::MemoryStore`) since the in-memory store is already
/// single-writer-serialized by its own lock.
pub trait ReadTransaction {
    fn get_account(&self, account: &Account) -> anyhow::Result<Option<AccountInfo>>;
    fn get_block(&self, hash: &BlockHash) -> anyhow::Result<Option<Block>>;
    fn block_exists(&self, hash: &BlockHash) -> anyhow::Result<bool>;
    fn get_pending(&self, key: &PendingKey) -> anyhow::Result<Option<PendingInfo>>;
    fn pending_any(&self, account: &Account) -> anyhow::Result<bool>;
    fn get_confirmation_height(&self, account: &Account) -> anyhow::Result<Option<ConfirmationHeightInfo>>;
    fn get_frontier(&self, hash: &BlockHash) -> anyhow::Result<Option<Account>>;
    fn iter_unchecked(&self, dependency: &BlockHash) -> anyhow::Result<Vec<(UncheckedKey, UncheckedInfo)>>;

    /// Every row in the accounts table (`spec.md` §6: "ordered iteration"),
    /// used by the frontier-confirmation scan (`spec.md` §4.2 step 3) to
    /// find the accounts with the most uncemented blocks. A full scan is the
    /// correct baseline for the bounded account sets this crate targets;
    /// production-scale top-K selection is left to the `Bootstrapper`/
    /// wallet collaborators' own indices.
    fn iter_accounts(&self) -> anyhow::Result<Vec<(Account, AccountInfo)>>;
}

/// A write transaction: a batch of table mutations committed atomically.
/// `spec.md` §6: "writes are exclusive per-process" — enforced upstream by
/// the single-writer discipline in `spec.md` §5, not by this trait itself.
pub trait WriteTransaction: ReadTransaction {
    fn put_account(&mut self, account: &Account, info: &AccountInfo) -> anyhow::Result<()>;
    fn del_account(&mut self, account: &Account) -> anyhow::Result<()>;

    fn put_block(&mut self, hash: &BlockHash, block: &Block) -> anyhow::Result<()>;
    fn del_block(&mut self, hash: &BlockHash) -> anyhow::Result<()>;

    fn put_pending(&mut self, key: &PendingKey, info: &PendingInfo) -> anyhow::Result<()>;
    fn del_pending(&mut self, key: &PendingKey) -> anyhow::Result<()>;

    fn put_confirmation_height(&mut self, account: &Account, info: &ConfirmationHeightInfo) -> anyhow::Result<()>;

    fn put_frontier(&mut self, hash: &BlockHash, account: &Account) -> anyhow::Result<()>;
    fn del_frontier(&mut self, hash: &BlockHash) -> anyhow::Result<()>;

    fn put_unchecked(&mut self, key: &UncheckedKey, info: &UncheckedInfo) -> anyhow::Result<()>;
    fn del_unchecked(&mut self, key: &UncheckedKey) -> anyhow::Result<()>;

    /// Commits every mutation made through this handle atomically.
    fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// The Store collaborator itself: opens read and write transactions
/// (`spec.md` §6: `tx_begin_read()`, `tx_begin_write(...)`).
pub trait Store: Send + Sync {
    fn tx_begin_read(&self) -> anyhow::Result<Box<dyn ReadTransaction + '_>>;
    fn tx_begin_write(&self) -> anyhow::Result<Box<dyn WriteTransaction + '_>>;

    fn schema_version(&self) -> anyhow::Result<u32>;
    fn set_schema_version(&self, version: u32) -> anyhow::Result<()>;

    /// Per-representative last-seen-unix-time sample backing
    /// [`crate::active_transactions::OnlineWeight`] (`spec.md` §6 online_weight
    /// table). Non-transactional like `schema_version`: online-weight samples
    /// are a best-effort process-local cache, not part of ledger consensus
    /// state, so they don't need the write-transaction's atomicity guarantee.
    fn get_online_weight_sample(&self, account: &Account) -> anyhow::Result<Option<u64>>;
    fn put_online_weight_sample(&self, account: &Account, last_seen: u64) -> anyhow::Result<()>;
    fn del_online_weight_sample(&self, account: &Account) -> anyhow::Result<()>;
    fn iter_online_weight_samples(&self) -> anyhow::Result<Vec<(Account, u64)>>;

    /// Opaque per-peer blob (`spec.md` §6 peers table), keyed by the peer's
    /// identity. The wire format of the value is the `PeerNetwork`
    /// collaborator's concern; the store only persists what it's given.
    fn get_peer(&self, peer: &PeerId) -> anyhow::Result<Option<Vec<u8>>>;
    fn put_peer(&self, peer: &PeerId, data: &[u8]) -> anyhow::Result<()>;
    fn del_peer(&self, peer: &PeerId) -> anyhow::Result<()>;
    fn iter_peers(&self) -> anyhow::Result<Vec<(PeerId, Vec<u8>)>>;
}
