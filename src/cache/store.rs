//! Backing stores for cached entries
//!
//! A store is a plain key-value map scoped per namespace. It knows nothing
//! about TTLs beyond the age cutoff used by the cleanup sweep.

use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A cached payload and the moment it was fetched
///
/// Entries are never mutated in place; a new `set` replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Normalized cache key
    pub key: String,
    /// Raw decoded upstream payload
    pub value: Value,
    /// Milliseconds since the Unix epoch
    pub fetched_at: i64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Value, fetched_at: i64) -> Self {
        Self {
            key: key.into(),
            value,
            fetched_at,
        }
    }

    /// Age of the entry relative to `now_ms`
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.fetched_at
    }
}

/// Errors raised by a backing store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem read/write failed
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored entry could not be (de)serialized
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value storage used by `TtlCache`
pub trait Store: Send + Sync + Debug {
    /// Looks up an entry, returning `None` if absent
    fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Inserts or atomically replaces an entry
    fn put(&self, namespace: &str, entry: CacheEntry) -> Result<(), StoreError>;

    /// Removes the entry for `key` only if it is still the one fetched at
    /// `fetched_at`, returning whether anything was removed
    ///
    /// An entry replaced after the caller read it is left alone.
    fn delete_if(&self, namespace: &str, key: &str, fetched_at: i64) -> Result<bool, StoreError>;

    /// Removes every entry in `namespace` fetched strictly before `cutoff_ms`
    fn remove_older_than(&self, namespace: &str, cutoff_ms: i64) -> Result<usize, StoreError>;

    /// Number of entries currently held in `namespace`
    fn len(&self, namespace: &str) -> Result<usize, StoreError>;
}

/// Process-local store backed by a locked hash map
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, HashMap<String, CacheEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let buckets = self.buckets.read();
        Ok(buckets
            .get(namespace)
            .and_then(|bucket| bucket.get(key))
            .cloned())
    }

    fn put(&self, namespace: &str, entry: CacheEntry) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write();
        buckets
            .entry(namespace.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    fn delete_if(&self, namespace: &str, key: &str, fetched_at: i64) -> Result<bool, StoreError> {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(namespace) else {
            return Ok(false);
        };
        if bucket.get(key).is_some_and(|entry| entry.fetched_at == fetched_at) {
            bucket.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    fn remove_older_than(&self, namespace: &str, cutoff_ms: i64) -> Result<usize, StoreError> {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(namespace) else {
            return Ok(0);
        };
        let before = bucket.len();
        bucket.retain(|_, entry| entry.fetched_at >= cutoff_ms);
        Ok(before - bucket.len())
    }

    fn len(&self, namespace: &str) -> Result<usize, StoreError> {
        Ok(self
            .buckets
            .read()
            .get(namespace)
            .map(HashMap::len)
            .unwrap_or(0))
    }
}
