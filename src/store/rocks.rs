//! The production `Store` implementation: one RocksDB column family per
//! logical table, built on the [`super::schema`] abstraction. Grounded on
//! the teacher's `consensusdb/ledger_db/ledger_metadata_db.rs`, which opens
//! one `DB` with a fixed list of column families and defines a `Schema` type
//! per table.

use std::path::Path;

use anyhow::Result;
use parking_lot::Mutex;

use crate::blocks::Block;
use crate::collaborators::PeerId;
use crate::types::{Account, BlockHash};

use super::schema::{KeyCodec, Schema, SchemaBatchMulti, SchemaDb, ValueCodec};
use super::{
    AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey, ReadTransaction, Store,
    StoreError, UncheckedInfo, UncheckedKey, CURRENT_SCHEMA_VERSION,
};

const CF_ACCOUNTS: &str = "accounts";
const CF_BLOCKS: &str = "blocks";
const CF_PENDING: &str = "pending";
const CF_CONFIRMATION_HEIGHT: &str = "confirmation_height";
const CF_FRONTIERS: &str = "frontiers";
const CF_UNCHECKED: &str = "unchecked";
const CF_META: &str = "meta";
const CF_PEERS: &str = "peers";
const CF_ONLINE_WEIGHT: &str = "online_weight";

pub const COLUMN_FAMILIES: &[&str] = &[
    CF_ACCOUNTS,
    CF_BLOCKS,
    CF_PENDING,
    CF_CONFIRMATION_HEIGHT,
    CF_FRONTIERS,
    CF_UNCHECKED,
    CF_META,
    CF_PEERS,
    CF_ONLINE_WEIGHT,
];

macro_rules! raw_key_codec {
    ($ty:ty, $schema:ty, $len:expr) => {
        impl KeyCodec<$schema> for $ty {
            fn encode_key(&self) -> Result<Vec<u8>> {
                Ok(self.0.to_vec())
            }

            fn decode_key(data: &[u8]) -> Result<Self> {
                Self::from_slice(data)
                    .ok_or(StoreError::InvalidKeyLength {
                        table: <$schema as Schema>::COLUMN_FAMILY_NAME,
                        expected: $len,
                        actual: data.len(),
                    })
                    .map_err(Into::into)
            }
        }
    };
}

macro_rules! bcs_value_codec {
    ($ty:ty, $schema:ty) => {
        impl ValueCodec<$schema> for $ty {
            fn encode_value(&self) -> Result<Vec<u8>> {
                Ok(bcs::to_bytes(self)?)
            }

            fn decode_value(data: &[u8]) -> Result<Self> {
                Ok(bcs::from_bytes(data)?)
            }
        }
    };
}

pub struct AccountsSchema;
impl Schema for AccountsSchema {
    type Key = Account;
    type Value = AccountInfo;
    const COLUMN_FAMILY_NAME: &'static str = CF_ACCOUNTS;
}
raw_key_codec!(Account, AccountsSchema, 32);
bcs_value_codec!(AccountInfo, AccountsSchema);

pub struct BlocksSchema;
impl Schema for BlocksSchema {
    type Key = BlockHash;
    type Value = Block;
    const COLUMN_FAMILY_NAME: &'static str = CF_BLOCKS;
}
raw_key_codec!(BlockHash, BlocksSchema, 32);
bcs_value_codec!(Block, BlocksSchema);

pub struct PendingSchema;
impl Schema for PendingSchema {
    type Key = PendingKey;
    type Value = PendingInfo;
    const COLUMN_FAMILY_NAME: &'static str = CF_PENDING;
}
impl KeyCodec<PendingSchema> for PendingKey {
    fn encode_key(&self) -> Result<Vec<u8>> {
        let mut v = Vec::with_capacity(64);
        v.extend_from_slice(&self.account.0);
        v.extend_from_slice(&self.hash.0);
        Ok(v)
    }

    fn decode_key(data: &[u8]) -> Result<Self> {
        if data.len() != 64 {
            return Err(StoreError::InvalidKeyLength { table: CF_PENDING, expected: 64, actual: data.len() }.into());
        }
        Ok(PendingKey {
            account: Account::from_slice(&data[..32]).expect("checked length"),
            hash: BlockHash::from_slice(&data[32..]).expect("checked length"),
        })
    }
}
bcs_value_codec!(PendingInfo, PendingSchema);

pub struct ConfirmationHeightSchema;
impl Schema for ConfirmationHeightSchema {
    type Key = Account;
    type Value = ConfirmationHeightInfo;
    const COLUMN_FAMILY_NAME: &'static str = CF_CONFIRMATION_HEIGHT;
}
raw_key_codec!(Account, ConfirmationHeightSchema, 32);
bcs_value_codec!(ConfirmationHeightInfo, ConfirmationHeightSchema);

pub struct FrontiersSchema;
impl Schema for FrontiersSchema {
    type Key = BlockHash;
    type Value = Account;
    const COLUMN_FAMILY_NAME: &'static str = CF_FRONTIERS;
}
raw_key_codec!(BlockHash, FrontiersSchema, 32);
impl ValueCodec<FrontiersSchema> for Account {
    fn encode_value(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_vec())
    }

    fn decode_value(data: &[u8]) -> Result<Self> {
        Account::from_slice(data)
            .ok_or(StoreError::InvalidValueLength { table: CF_FRONTIERS, expected: 32, actual: data.len() })
            .map_err(Into::into)
    }
}

pub struct UncheckedSchema;
impl Schema for UncheckedSchema {
    type Key = UncheckedKey;
    type Value = UncheckedInfo;
    const COLUMN_FAMILY_NAME: &'static str = CF_UNCHECKED;
}
impl KeyCodec<UncheckedSchema> for UncheckedKey {
    /// dependency(32) ++ arrival_time(8 BE), so lexicographic byte order
    /// groups every entry for a given dependency contiguously and orders
    /// them by arrival time within that group, matching the range scan
    /// `iter_unchecked` needs.
    fn encode_key(&self) -> Result<Vec<u8>> {
        let mut v = Vec::with_capacity(40);
        v.extend_from_slice(&self.dependency.0);
        v.extend_from_slice(&self.arrival_time.to_be_bytes());
        Ok(v)
    }

    fn decode_key(data: &[u8]) -> Result<Self> {
        if data.len() != 40 {
            return Err(StoreError::InvalidKeyLength { table: CF_UNCHECKED, expected: 40, actual: data.len() }.into());
        }
        let dependency = BlockHash::from_slice(&data[..32]).expect("checked length");
        let arrival_time = u64::from_be_bytes(data[32..40].try_into().expect("checked length"));
        Ok(UncheckedKey { dependency, arrival_time })
    }
}
bcs_value_codec!(UncheckedInfo, UncheckedSchema);

pub struct MetaSchema;
impl Schema for MetaSchema {
    type Key = MetaKey;
    type Value = u32;
    const COLUMN_FAMILY_NAME: &'static str = CF_META;
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MetaKey;

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

impl KeyCodec<MetaSchema> for MetaKey {
    fn encode_key(&self) -> Result<Vec<u8>> {
        Ok(SCHEMA_VERSION_KEY.to_vec())
    }

    fn decode_key(_data: &[u8]) -> Result<Self> {
        Ok(MetaKey)
    }
}

impl ValueCodec<MetaSchema> for u32 {
    fn encode_value(&self) -> Result<Vec<u8>> {
        Ok(self.to_be_bytes().to_vec())
    }

    fn decode_value(data: &[u8]) -> Result<Self> {
        if data.len() != 4 {
            return Err(StoreError::InvalidValueLength { table: CF_META, expected: 4, actual: data.len() }.into());
        }
        Ok(u32::from_be_bytes(data.try_into().expect("checked length")))
    }
}

pub struct PeersSchema;
impl Schema for PeersSchema {
    type Key = PeerId;
    type Value = Vec<u8>;
    const COLUMN_FAMILY_NAME: &'static str = CF_PEERS;
}

impl KeyCodec<PeersSchema> for PeerId {
    fn encode_key(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_vec())
    }

    fn decode_key(data: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| StoreError::InvalidKeyLength { table: CF_PEERS, expected: 32, actual: data.len() })?;
        Ok(PeerId(bytes))
    }
}

impl ValueCodec<PeersSchema> for Vec<u8> {
    fn encode_value(&self) -> Result<Vec<u8>> {
        Ok(self.clone())
    }

    fn decode_value(data: &[u8]) -> Result<Self> {
        Ok(data.to_vec())
    }
}

pub struct OnlineWeightSchema;
impl Schema for OnlineWeightSchema {
    type Key = Account;
    type Value = u64;
    const COLUMN_FAMILY_NAME: &'static str = CF_ONLINE_WEIGHT;
}
raw_key_codec!(Account, OnlineWeightSchema, 32);

impl ValueCodec<OnlineWeightSchema> for u64 {
    fn encode_value(&self) -> Result<Vec<u8>> {
        Ok(self.to_be_bytes().to_vec())
    }

    fn decode_value(data: &[u8]) -> Result<Self> {
        if data.len() != 8 {
            return Err(StoreError::InvalidValueLength { table: CF_ONLINE_WEIGHT, expected: 8, actual: data.len() }.into());
        }
        Ok(u64::from_be_bytes(data.try_into().expect("checked length")))
    }
}

/// RocksDB-backed [`Store`]. Writers are serialized through `write_lock`,
/// matching the single-writer discipline named in `spec.md` §5; readers hit
/// the database directly and never block on it.
pub struct RocksStore {
    db: SchemaDb,
    write_lock: Mutex<()>,
}

impl RocksStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = SchemaDb::open(path, COLUMN_FAMILIES)?;
        let store = RocksStore { db, write_lock: Mutex::new(()) };
        if store.db.get::<MetaSchema>(&MetaKey)?.is_none() {
            store.db.put::<MetaSchema>(&MetaKey, &CURRENT_SCHEMA_VERSION)?;
        }
        Ok(store)
    }
}

pub struct RocksRead<'a> {
    db: &'a SchemaDb,
}

impl<'a> ReadTransaction for RocksRead<'a> {
    fn get_account(&self, account: &Account) -> Result<Option<AccountInfo>> {
        self.db.get::<AccountsSchema>(account)
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>> {
        self.db.get::<BlocksSchema>(hash)
    }

    fn block_exists(&self, hash: &BlockHash) -> Result<bool> {
        Ok(self.get_block(hash)?.is_some())
    }

    fn get_pending(&self, key: &PendingKey) -> Result<Option<PendingInfo>> {
        self.db.get::<PendingSchema>(key)
    }

    fn pending_any(&self, account: &Account) -> Result<bool> {
        // A pending-any check does not need the exact set, only whether the
        // account-prefixed range is non-empty; scanning and filtering by
        // prefix keeps this correct without a dedicated prefix iterator.
        for entry in self.db.iter::<PendingSchema>()? {
            let (key, _) = entry?;
            if &key.account == account {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_confirmation_height(&self, account: &Account) -> Result<Option<ConfirmationHeightInfo>> {
        self.db.get::<ConfirmationHeightSchema>(account)
    }

    fn get_frontier(&self, hash: &BlockHash) -> Result<Option<Account>> {
        self.db.get::<FrontiersSchema>(hash)
    }

    fn iter_unchecked(&self, dependency: &BlockHash) -> Result<Vec<(UncheckedKey, UncheckedInfo)>> {
        let mut result = Vec::new();
        for entry in self.db.iter::<UncheckedSchema>()? {
            let (key, value) = entry?;
            if &key.dependency == dependency {
                result.push((key, value));
            }
        }
        Ok(result)
    }

    fn iter_accounts(&self) -> Result<Vec<(Account, AccountInfo)>> {
        let mut result = Vec::new();
        for entry in self.db.iter::<AccountsSchema>()? {
            result.push(entry?);
        }
        Ok(result)
    }
}

enum Op {
    PutAccount(Account, AccountInfo),
    DelAccount(Account),
    PutBlock(BlockHash, Box<Block>),
    DelBlock(BlockHash),
    PutPending(PendingKey, PendingInfo),
    DelPending(PendingKey),
    PutConfirmationHeight(Account, ConfirmationHeightInfo),
    PutFrontier(BlockHash, Account),
    DelFrontier(BlockHash),
    PutUnchecked(UncheckedKey, UncheckedInfo),
    DelUnchecked(UncheckedKey),
}

/// A write transaction holding the store's single writer-lock for its whole
/// lifetime. Mutations are staged and only touch the database inside
/// [`Self::commit`], so an aborted (dropped) transaction leaves no trace.
pub struct RocksWrite<'a> {
    db: &'a SchemaDb,
    _guard: parking_lot::MutexGuard<'a, ()>,
    staged: Vec<Op>,
}

impl<'a> RocksWrite<'a> {
    fn staged_block(&self, hash: &BlockHash) -> Option<Option<Block>> {
        self.staged.iter().rev().find_map(|op| match op {
            Op::PutBlock(h, b) if h == hash => Some(Some((**b).clone())),
            Op::DelBlock(h) if h == hash => Some(None),
            _ => None,
        })
    }
}

impl<'a> ReadTransaction for RocksWrite<'a> {
    fn get_account(&self, account: &Account) -> Result<Option<AccountInfo>> {
        for op in self.staged.iter().rev() {
            match op {
                Op::PutAccount(a, info) if a == account => return Ok(Some(*info)),
                Op::DelAccount(a) if a == account => return Ok(None),
                _ => {}
            }
        }
        self.db.get::<AccountsSchema>(account)
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>> {
        if let Some(staged) = self.staged_block(hash) {
            return Ok(staged);
        }
        self.db.get::<BlocksSchema>(hash)
    }

    fn block_exists(&self, hash: &BlockHash) -> Result<bool> {
        Ok(self.get_block(hash)?.is_some())
    }

    fn get_pending(&self, key: &PendingKey) -> Result<Option<PendingInfo>> {
        for op in self.staged.iter().rev() {
            match op {
                Op::PutPending(k, info) if k == key => return Ok(Some(*info)),
                Op::DelPending(k) if k == key => return Ok(None),
                _ => {}
            }
        }
        self.db.get::<PendingSchema>(key)
    }

    fn pending_any(&self, account: &Account) -> Result<bool> {
        if self.staged.iter().any(|op| matches!(op, Op::PutPending(k, _) if &k.account == account)) {
            return Ok(true);
        }
        RocksRead { db: self.db }.pending_any(account)
    }

    fn get_confirmation_height(&self, account: &Account) -> Result<Option<ConfirmationHeightInfo>> {
        for op in self.staged.iter().rev() {
            if let Op::PutConfirmationHeight(a, info) = op {
                if a == account {
                    return Ok(Some(*info));
                }
            }
        }
        self.db.get::<ConfirmationHeightSchema>(account)
    }

    fn get_frontier(&self, hash: &BlockHash) -> Result<Option<Account>> {
        for op in self.staged.iter().rev() {
            match op {
                Op::PutFrontier(h, a) if h == hash => return Ok(Some(*a)),
                Op::DelFrontier(h) if h == hash => return Ok(None),
                _ => {}
            }
        }
        self.db.get::<FrontiersSchema>(hash)
    }

    fn iter_unchecked(&self, dependency: &BlockHash) -> Result<Vec<(UncheckedKey, UncheckedInfo)>> {
        let mut result = RocksRead { db: self.db }.iter_unchecked(dependency)?;
        for op in &self.staged {
            match op {
                Op::PutUnchecked(k, info) if &k.dependency == dependency => result.push((k.clone(), info.clone())),
                Op::DelUnchecked(k) if &k.dependency == dependency => {
                    result.retain(|(existing, _)| existing.arrival_time != k.arrival_time);
                }
                _ => {}
            }
        }
        Ok(result)
    }

    fn iter_accounts(&self) -> Result<Vec<(Account, AccountInfo)>> {
        let mut accounts: std::collections::BTreeMap<Account, AccountInfo> =
            RocksRead { db: self.db }.iter_accounts()?.into_iter().collect();
        for op in &self.staged {
            match op {
                Op::PutAccount(a, info) => {
                    accounts.insert(*a, *info);
                }
                Op::DelAccount(a) => {
                    accounts.remove(a);
                }
                _ => {}
            }
        }
        Ok(accounts.into_iter().collect())
    }
}

impl<'a> super::WriteTransaction for RocksWrite<'a> {
    fn put_account(&mut self, account: &Account, info: &AccountInfo) -> Result<()> {
        self.staged.push(Op::PutAccount(*account, *info));
        Ok(())
    }

    fn del_account(&mut self, account: &Account) -> Result<()> {
        self.staged.push(Op::DelAccount(*account));
        Ok(())
    }

    fn put_block(&mut self, hash: &BlockHash, block: &Block) -> Result<()> {
        self.staged.push(Op::PutBlock(*hash, Box::new(block.clone())));
        Ok(())
    }

    fn del_block(&mut self, hash: &BlockHash) -> Result<()> {
        self.staged.push(Op::DelBlock(*hash));
        Ok(())
    }

    fn put_pending(&mut self, key: &PendingKey, info: &PendingInfo) -> Result<()> {
        self.staged.push(Op::PutPending(*key, *info));
        Ok(())
    }

    fn del_pending(&mut self, key: &PendingKey) -> Result<()> {
        self.staged.push(Op::DelPending(*key));
        Ok(())
    }

    fn put_confirmation_height(&mut self, account: &Account, info: &ConfirmationHeightInfo) -> Result<()> {
        self.staged.push(Op::PutConfirmationHeight(*account, *info));
        Ok(())
    }

    fn put_frontier(&mut self, hash: &BlockHash, account: &Account) -> Result<()> {
        self.staged.push(Op::PutFrontier(*hash, *account));
        Ok(())
    }

    fn del_frontier(&mut self, hash: &BlockHash) -> Result<()> {
        self.staged.push(Op::DelFrontier(*hash));
        Ok(())
    }

    fn put_unchecked(&mut self, key: &UncheckedKey, info: &UncheckedInfo) -> Result<()> {
        self.staged.push(Op::PutUnchecked(key.clone(), info.clone()));
        Ok(())
    }

    fn del_unchecked(&mut self, key: &UncheckedKey) -> Result<()> {
        self.staged.push(Op::DelUnchecked(key.clone()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut batch = SchemaBatchMulti::new();
        for op in self.staged {
            match op {
                Op::PutAccount(a, info) => batch.put::<AccountsSchema>(&a, &info)?,
                Op::DelAccount(a) => batch.delete::<AccountsSchema>(&a)?,
                Op::PutBlock(h, b) => batch.put::<BlocksSchema>(&h, &b)?,
                Op::DelBlock(h) => batch.delete::<BlocksSchema>(&h)?,
                Op::PutPending(k, info) => batch.put::<PendingSchema>(&k, &info)?,
                Op::DelPending(k) => batch.delete::<PendingSchema>(&k)?,
                Op::PutConfirmationHeight(a, info) => batch.put::<ConfirmationHeightSchema>(&a, &info)?,
                Op::PutFrontier(h, a) => batch.put::<FrontiersSchema>(&h, &a)?,
                Op::DelFrontier(h) => batch.delete::<FrontiersSchema>(&h)?,
                Op::PutUnchecked(k, info) => batch.put::<UncheckedSchema>(&k, &info)?,
                Op::DelUnchecked(k) => batch.delete::<UncheckedSchema>(&k)?,
            }
        }
        if !batch.is_empty() {
            self.db.write_schemas(batch)?;
        }
        Ok(())
    }
}

impl Store for RocksStore {
    fn tx_begin_read(&self) -> Result<Box<dyn ReadTransaction + '_>> {
        Ok(Box::new(RocksRead { db: &self.db }))
    }

    fn tx_begin_write(&self) -> Result<Box<dyn super::WriteTransaction + '_>> {
        Ok(Box::new(RocksWrite { db: &self.db, _guard: self.write_lock.lock(), staged: Vec::new() }))
    }

    fn schema_version(&self) -> Result<u32> {
        Ok(self.db.get::<MetaSchema>(&MetaKey)?.unwrap_or(0))
    }

    fn set_schema_version(&self, version: u32) -> Result<()> {
        self.db.put::<MetaSchema>(&MetaKey, &version)
    }

    fn get_online_weight_sample(&self, account: &Account) -> Result<Option<u64>> {
        self.db.get::<OnlineWeightSchema>(account)
    }

    fn put_online_weight_sample(&self, account: &Account, last_seen: u64) -> Result<()> {
        self.db.put::<OnlineWeightSchema>(account, &last_seen)
    }

    fn del_online_weight_sample(&self, account: &Account) -> Result<()> {
        self.db.delete::<OnlineWeightSchema>(account)
    }

    fn iter_online_weight_samples(&self) -> Result<Vec<(Account, u64)>> {
        let mut result = Vec::new();
        for entry in self.db.iter::<OnlineWeightSchema>()? {
            result.push(entry?);
        }
        Ok(result)
    }

    fn get_peer(&self, peer: &PeerId) -> Result<Option<Vec<u8>>> {
        self.db.get::<PeersSchema>(peer)
    }

    fn put_peer(&self, peer: &PeerId, data: &[u8]) -> Result<()> {
        self.db.put::<PeersSchema>(peer, &data.to_vec())
    }

    fn del_peer(&self, peer: &PeerId) -> Result<()> {
        self.db.delete::<PeersSchema>(peer)
    }

    fn iter_peers(&self) -> Result<Vec<(PeerId, Vec<u8>)>> {
        let mut result = Vec::new();
        for entry in self.db.iter::<PeersSchema>()? {
            result.push(entry?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WriteTransaction;

    #[test]
    fn open_creates_schema_version_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn write_then_read_account_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let account = Account([4u8; 32]);
        let info = AccountInfo {
            head: BlockHash([5u8; 32]),
            representative: account,
            open_block: BlockHash([5u8; 32]),
            balance: 42,
            modified: 1,
            block_count: 1,
            epoch: crate::types::Epoch::ZERO,
        };
        {
            let store = RocksStore::open(dir.path()).unwrap();
            let mut tx = store.tx_begin_write().unwrap();
            tx.put_account(&account, &info).unwrap();
            tx.commit().unwrap();
        }
        let store = RocksStore::open(dir.path()).unwrap();
        let tx = store.tx_begin_read().unwrap();
        assert_eq!(tx.get_account(&account).unwrap(), Some(info));
    }
}
