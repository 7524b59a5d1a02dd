//! A small `Schema`/`KeyCodec`/`ValueCodec`/`SchemaBatch` abstraction over
//! RocksDB column families, one per logical table named in `spec.md` §6's
//! Store trait contract.
//!
//! Grounded on the teacher's internal `aptos-schemadb` crate (seen through
//! `aptos-core/consensus/src/quorum_store/schema.rs` and
//! `consensusdb/ledger_db/ledger_metadata_db.rs`): that crate is not
//! independently published, so we reimplement the same small interface
//! directly atop the `rocksdb` crate, which the teacher also depends on
//! directly.

use std::marker::PhantomData;

use anyhow::Result;
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use super::StoreError;

pub type ColumnFamilyName = &'static str;

/// A logical table: a column family plus the key/value types stored in it.
pub trait Schema: 'static {
    type Key: KeyCodec<Self>;
    type Value: ValueCodec<Self>;

    const COLUMN_FAMILY_NAME: ColumnFamilyName;
}

pub trait KeyCodec<S: Schema + ?Sized>: Sized {
    fn encode_key(&self) -> Result<Vec<u8>>;
    fn decode_key(data: &[u8]) -> Result<Self>;
}

pub trait ValueCodec<S: Schema + ?Sized>: Sized {
    fn encode_value(&self) -> Result<Vec<u8>>;
    fn decode_value(data: &[u8]) -> Result<Self>;
}

/// Thin RocksDB wrapper exposing schema-typed get/put/delete/iterate, one
/// physical column family per [`Schema`].
pub struct SchemaDb {
    db: DB,
}

impl SchemaDb {
    pub fn open(path: &std::path::Path, column_families: &[ColumnFamilyName]) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let descriptors: Vec<_> = column_families
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;
        Ok(SchemaDb { db })
    }

    fn cf<S: Schema>(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(S::COLUMN_FAMILY_NAME)
            .ok_or(StoreError::MissingColumnFamily(S::COLUMN_FAMILY_NAME))
            .map_err(Into::into)
    }

    pub fn get<S: Schema>(&self, key: &S::Key) -> Result<Option<S::Value>> {
        let cf = self.cf::<S>()?;
        let k = key.encode_key()?;
        match self.db.get_cf(cf, k)? {
            Some(bytes) => Ok(Some(S::Value::decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put<S: Schema>(&self, key: &S::Key, value: &S::Value) -> Result<()> {
        let cf = self.cf::<S>()?;
        let k = key.encode_key()?;
        let v = value.encode_value()?;
        self.db.put_cf(cf, k, v)?;
        Ok(())
    }

    pub fn delete<S: Schema>(&self, key: &S::Key) -> Result<()> {
        let cf = self.cf::<S>()?;
        let k = key.encode_key()?;
        self.db.delete_cf(cf, k)?;
        Ok(())
    }

    pub fn iter<S: Schema>(&self) -> Result<SchemaIter<'_, S>> {
        let cf = self.cf::<S>()?;
        let iter = self.db.iterator_cf(cf, rocksdb::IteratorMode::Start);
        Ok(SchemaIter { iter: Box::new(iter), _marker: PhantomData })
    }

    /// Writes a batch across multiple column families atomically. The batch
    /// is a portable op log (no borrow on `self`) resolved against real
    /// column-family handles right before the write, so callers can build a
    /// batch across several table helpers before committing it once.
    pub fn write_schemas(&self, batch: SchemaBatchMulti) -> Result<()> {
        let mut write_batch = WriteBatch::default();
        for op in batch.ops {
            match op {
                Op::Put { cf, key, value } => {
                    let handle = self.db.cf_handle(cf).ok_or(StoreError::MissingColumnFamily(cf))?;
                    write_batch.put_cf(handle, key, value);
                }
                Op::Delete { cf, key } => {
                    let handle = self.db.cf_handle(cf).ok_or(StoreError::MissingColumnFamily(cf))?;
                    write_batch.delete_cf(handle, key);
                }
            }
        }
        self.db.write(write_batch)?;
        Ok(())
    }
}

/// A multi-column-family batch, resolved against real column-family handles
/// at write time by [`SchemaDb::write_schemas`].
#[derive(Default)]
pub struct SchemaBatchMulti {
    ops: Vec<Op>,
}

enum Op {
    Put { cf: ColumnFamilyName, key: Vec<u8>, value: Vec<u8> },
    Delete { cf: ColumnFamilyName, key: Vec<u8> },
}

impl SchemaBatchMulti {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<S: Schema>(&mut self, key: &S::Key, value: &S::Value) -> Result<()> {
        self.ops.push(Op::Put {
            cf: S::COLUMN_FAMILY_NAME,
            key: key.encode_key()?,
            value: value.encode_value()?,
        });
        Ok(())
    }

    pub fn delete<S: Schema>(&mut self, key: &S::Key) -> Result<()> {
        self.ops.push(Op::Delete { cf: S::COLUMN_FAMILY_NAME, key: key.encode_key()? });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub struct SchemaIter<'a, S: Schema> {
    iter: Box<dyn Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>> + 'a>,
    _marker: PhantomData<S>,
}

impl<'a, S: Schema> Iterator for SchemaIter<'a, S> {
    type Item = Result<(S::Key, S::Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (k, v) = match self.iter.next()? {
            Ok(kv) => kv,
            Err(e) => return Some(Err(e.into())),
        };
        let key = match S::Key::decode_key(&k) {
            Ok(k) => k,
            Err(e) => return Some(Err(e)),
        };
        let value = match S::Value::decode_value(&v) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok((key, value)))
    }
}
