//! In-process repository on top of `DashMap`.
//!
//! DashMap shards its keys across independently locked buckets; holding an
//! entry guard is what makes compare-and-swap atomic for a key. Guards are
//! never held past the end of a method.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{CasResult, Repository, StoreResult, StoredValue};

/// `Repository` backed by a sharded concurrent hash map.
#[derive(Debug)]
pub struct MemoryRepository<V> {
    map: DashMap<String, V>,
}

impl<V> MemoryRepository<V> {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl<V> Default for MemoryRepository<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: StoredValue> Repository<V> for MemoryRepository<V> {
    fn get(&self, key: &str) -> StoreResult<Option<V>> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &str, value: &V) -> StoreResult<()> {
        self.map.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn insert_new(&self, key: &str, value: &V) -> StoreResult<bool> {
        match self.map.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value.clone());
                Ok(true)
            }
        }
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&V>,
        new: Option<&V>,
    ) -> StoreResult<CasResult<V>> {
        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                if expected != Some(slot.get()) {
                    return Ok(Err(Some(slot.get().clone())));
                }
                match new {
                    Some(value) => {
                        slot.insert(value.clone());
                    }
                    None => {
                        slot.remove();
                    }
                }
                Ok(Ok(()))
            }
            Entry::Vacant(slot) => {
                if expected.is_some() {
                    return Ok(Err(None));
                }
                if let Some(value) = new {
                    slot.insert(value.clone());
                }
                Ok(Ok(()))
            }
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}
