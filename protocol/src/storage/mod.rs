//! # Storage Module
//!
//! Keyed repositories for the three pieces of mutable state the protocol
//! keeps: pending challenges (by DID), vault records (by record id) and
//! bundles (by bundle id).
//!
//! ## Architecture
//!
//! ```text
//! mod.rs    - Repository trait, StoreError
//! memory.rs - DashMap-backed repository (per-key locking, the default)
//! db.rs     - sled-backed repository (persistent, native compare-and-swap)
//! ```
//!
//! ## Atomicity
//!
//! Everything that needs read-modify-write goes through
//! [`Repository::compare_and_swap`]. There is no global lock: two different
//! keys never contend, and a CAS on one key either lands entirely or hands
//! back the value that beat it.
//!
//! Values must compare equal exactly when their serialized bytes are equal,
//! since the sled backend compares bytes. Stored types therefore avoid hash
//! maps and other containers with unstable iteration order.

pub mod db;
pub mod memory;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

pub use db::{SledRepository, TesseraDb};
pub use memory::MemoryRepository;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur inside a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }

    pub fn code(&self) -> &'static str {
        "STORAGE_FAILURE"
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a compare-and-swap. `Err` carries the value actually present.
pub type CasResult<V> = Result<(), Option<V>>;

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Bound shared by everything we put in a repository.
pub trait StoredValue:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoredValue for T where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A keyed map with atomic per-key updates.
pub trait Repository<V: StoredValue>: Send + Sync {
    /// Current value under `key`.
    fn get(&self, key: &str) -> StoreResult<Option<V>>;

    /// Unconditional write.
    fn put(&self, key: &str, value: &V) -> StoreResult<()>;

    /// Write only if `key` is absent. Returns `false` if something was there.
    fn insert_new(&self, key: &str, value: &V) -> StoreResult<bool>;

    /// Replace `expected` with `new` as one step. `None` on either side means
    /// "absent", so `(Some(v), None)` is compare-and-delete.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&V>,
        new: Option<&V>,
    ) -> StoreResult<CasResult<V>>;

    /// Number of stored entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
