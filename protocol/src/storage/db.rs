//! # TesseraDb: Persistent Storage Engine
//!
//! The persistent backend, built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree         | Key                   | Value                 |
//! |--------------|-----------------------|-----------------------|
//! | `challenges` | subject DID (UTF-8)   | `bincode(Challenge)`  |
//! | `records`    | record id (UTF-8)     | `bincode(VaultRecord)`|
//! | `bundles`    | bundle id (UTF-8)     | `bincode(Bundle)`     |
//!
//! ## Atomicity
//!
//! sled's `compare_and_swap` compares the stored bytes against the expected
//! bytes and swaps in one step, which is exactly the per-key primitive the
//! lifecycle needs. bincode is deterministic for our stored types, so equal
//! values always produce equal bytes.

use sled::{Db, Tree};
use std::marker::PhantomData;
use std::path::Path;

use super::{CasResult, Repository, StoreError, StoreResult, StoredValue};

/// Tree names.
pub const CHALLENGES_TREE: &str = "challenges";
pub const RECORDS_TREE: &str = "records";
pub const BUNDLES_TREE: &str = "bundles";

// ---------------------------------------------------------------------------
// TesseraDb
// ---------------------------------------------------------------------------

/// Handle to the on-disk database. Cheap to clone; sled is internally
/// reference-counted and thread-safe.
#[derive(Debug, Clone)]
pub struct TesseraDb {
    db: Db,
}

impl TesseraDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// A throwaway database, removed when dropped. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Typed repository over the named tree. The tree is created if needed.
    pub fn repository<V: StoredValue>(&self, name: &str) -> StoreResult<SledRepository<V>> {
        let tree = self.db.open_tree(name)?;
        Ok(SledRepository::new(tree))
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SledRepository
// ---------------------------------------------------------------------------

/// `Repository` over one sled tree, values encoded with bincode.
#[derive(Debug, Clone)]
pub struct SledRepository<V> {
    tree: Tree,
    _marker: PhantomData<fn() -> V>,
}

impl<V> SledRepository<V> {
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            _marker: PhantomData,
        }
    }
}

fn encode<V: StoredValue>(value: &V) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<V: StoredValue>(bytes: &[u8]) -> StoreResult<V> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl<V: StoredValue> Repository<V> for SledRepository<V> {
    fn get(&self, key: &str) -> StoreResult<Option<V>> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &V) -> StoreResult<()> {
        self.tree.insert(key.as_bytes(), encode(value)?)?;
        Ok(())
    }

    fn insert_new(&self, key: &str, value: &V) -> StoreResult<bool> {
        let outcome = self
            .tree
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(encode(value)?))?;
        Ok(outcome.is_ok())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&V>,
        new: Option<&V>,
    ) -> StoreResult<CasResult<V>> {
        let expected = expected.map(encode).transpose()?;
        let new = new.map(encode).transpose()?;
        match self.tree.compare_and_swap(key.as_bytes(), expected, new)? {
            Ok(()) => Ok(Ok(())),
            Err(conflict) => {
                let current = conflict.current.map(|bytes| decode(&bytes)).transpose()?;
                Ok(Err(current))
            }
        }
    }

    fn len(&self) -> usize {
        self.tree.len()
    }
}
