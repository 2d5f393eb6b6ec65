//! Cache module for storing upstream responses
//!
//! This module provides a namespaced TTL cache over a pluggable backing store
//! (in-memory or JSON files on disk), plus the pure key-derivation helpers that
//! make equivalent requests share one cache entry.

mod clock;
mod file_store;
pub mod key;
mod store;
mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file_store::FileStore;
pub use key::CacheKey;
pub use store::{CacheEntry, MemoryStore, Store, StoreError};
pub use ttl::{CachePolicy, Fill, Lookup, Namespace, TtlCache};
