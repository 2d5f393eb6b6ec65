//! TTL cache over a pluggable store
//!
//! Every namespace owns an independent time-to-live. Reads never return a
//! stale value: an expired entry found by `get` is deleted on the spot unless
//! a newer write replaced it in the meantime. The `cleanup` sweep exists for
//! keys that are never read again.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::store::{CacheEntry, MemoryStore, Store};

/// A named bucket of cache entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(&'static str);

impl Namespace {
    pub const WEATHER: Namespace = Namespace("weather");
    pub const FORECAST: Namespace = Namespace("forecast");
    pub const AIR: Namespace = Namespace("air");
    pub const QUOTES: Namespace = Namespace("quotes");
    pub const SEARCH: Namespace = Namespace("search");
    pub const HISTORY: Namespace = Namespace("history");
    pub const NEWS: Namespace = Namespace("news");
    pub const FUNDAMENTALS: Namespace = Namespace("fundamentals");
    pub const TRENDING: Namespace = Namespace("trending");
    pub const OVERVIEW: Namespace = Namespace("overview");
    pub const HEADLINES: Namespace = Namespace("headlines");

    /// Every namespace the dashboard uses
    pub const ALL: [Namespace; 11] = [
        Namespace::WEATHER,
        Namespace::FORECAST,
        Namespace::AIR,
        Namespace::QUOTES,
        Namespace::SEARCH,
        Namespace::HISTORY,
        Namespace::NEWS,
        Namespace::FUNDAMENTALS,
        Namespace::TRENDING,
        Namespace::OVERVIEW,
        Namespace::HEADLINES,
    ];

    /// Looks up a known namespace by name
    pub fn from_name(name: &str) -> Option<Namespace> {
        Namespace::ALL.into_iter().find(|ns| ns.0 == name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Per-namespace TTL table
#[derive(Debug, Clone, Default)]
pub struct CachePolicy {
    ttls: BTreeMap<Namespace, Duration>,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, namespace: Namespace, ttl: Duration) -> Self {
        self.ttls.insert(namespace, ttl);
        self
    }

    pub fn set_ttl(&mut self, namespace: Namespace, ttl: Duration) {
        self.ttls.insert(namespace, ttl);
    }

    pub fn ttl(&self, namespace: Namespace) -> Option<Duration> {
        self.ttls.get(&namespace).copied()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.ttls.keys().copied()
    }

    /// TTLs used by the proxy server
    ///
    /// Quote-like data stays fresh for a minute, slow-moving data for hours.
    pub fn server_defaults() -> Self {
        Self::new()
            .with_ttl(Namespace::WEATHER, Duration::from_secs(8 * 60))
            .with_ttl(Namespace::FORECAST, Duration::from_secs(45 * 60))
            .with_ttl(Namespace::AIR, Duration::from_secs(30 * 60))
            .with_ttl(Namespace::QUOTES, Duration::from_secs(60))
            .with_ttl(Namespace::SEARCH, Duration::from_secs(30 * 60))
            .with_ttl(Namespace::HISTORY, Duration::from_secs(5 * 60))
            .with_ttl(Namespace::NEWS, Duration::from_secs(10 * 60))
            .with_ttl(Namespace::FUNDAMENTALS, Duration::from_secs(6 * 60 * 60))
            .with_ttl(Namespace::TRENDING, Duration::from_secs(5 * 60))
            .with_ttl(Namespace::OVERVIEW, Duration::from_secs(2 * 60))
            .with_ttl(Namespace::HEADLINES, Duration::from_secs(30 * 60))
    }

    /// TTLs used by the dashboard-side proxy client
    pub fn client_defaults() -> Self {
        Self::new()
            .with_ttl(Namespace::QUOTES, Duration::from_secs(10))
            .with_ttl(Namespace::SEARCH, Duration::from_secs(60))
    }
}

/// A freshly fetched value handed back to `TtlCache::get_or_fetch`
#[derive(Debug, Clone, PartialEq)]
pub struct Fill<T> {
    pub value: T,
    /// Whether the value may be written to the cache
    pub store: bool,
}

impl<T> Fill<T> {
    /// A value that is cached once fetched
    pub fn keep(value: T) -> Self {
        Self { value, store: true }
    }

    /// A value served this once and never cached
    pub fn transient(value: T) -> Self {
        Self {
            value,
            store: false,
        }
    }
}

/// Result of `TtlCache::get_or_fetch`
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<T> {
    pub value: T,
    /// Milliseconds since the Unix epoch
    pub fetched_at: i64,
    /// Whether the value came from the cache rather than a fresh fetch
    pub cached: bool,
}

/// Namespaced key-value cache with lazy expiry
///
/// Cloning is cheap; clones share the same store.
#[derive(Debug, Clone)]
pub struct TtlCache {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
}

impl TtlCache {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// A wall-clock cache over a fresh `MemoryStore`
    pub fn in_memory(policy: CachePolicy) -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock), policy)
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn ttl_ms(&self, namespace: Namespace) -> Option<i64> {
        self.policy
            .ttl(namespace)
            .map(|ttl| i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }

    /// Returns the fresh value for `key`, or `None`
    pub fn get(&self, namespace: Namespace, key: &str) -> Option<Value> {
        self.get_entry(namespace, key).map(|entry| entry.value)
    }

    /// Returns the fresh entry for `key`, purging it if it has expired
    pub fn get_entry(&self, namespace: Namespace, key: &str) -> Option<CacheEntry> {
        let entry = match self.store.get(namespace.as_str(), key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(%namespace, key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        let now = self.clock.now_ms();
        let fresh = match self.ttl_ms(namespace) {
            Some(ttl) => entry.age_ms(now) < ttl,
            None => {
                warn!(%namespace, "no TTL configured for namespace, entry never served");
                false
            }
        };

        if fresh {
            debug!(%namespace, key, "cache hit");
            return Some(entry);
        }

        debug!(%namespace, key, age_ms = entry.age_ms(now), "evicting stale entry");
        match self
            .store
            .delete_if(namespace.as_str(), key, entry.fetched_at)
        {
            Ok(true) => {}
            Ok(false) => debug!(%namespace, key, "stale entry already replaced"),
            Err(e) => warn!(%namespace, key, error = %e, "failed to evict stale entry"),
        }
        None
    }

    /// Stores `value` under `key` with `fetched_at = now`, replacing any prior entry
    ///
    /// Store failures are logged, never returned: a cache that cannot write
    /// degrades into a pass-through.
    pub fn set(&self, namespace: Namespace, key: &str, value: Value) -> CacheEntry {
        let entry = CacheEntry::new(key, value, self.clock.now_ms());
        if let Err(e) = self.store.put(namespace.as_str(), entry.clone()) {
            warn!(%namespace, key, error = %e, "cache write failed");
        }
        entry
    }

    /// Deletes every entry older than `ttl * multiplier` in each configured
    /// namespace and returns how many were removed
    pub fn cleanup(&self, multiplier: u32) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        for namespace in self.policy.namespaces() {
            let Some(ttl) = self.ttl_ms(namespace) else {
                continue;
            };
            let cutoff = now.saturating_sub(ttl.saturating_mul(i64::from(multiplier)));
            match self.store.remove_older_than(namespace.as_str(), cutoff) {
                Ok(n) => removed += n,
                Err(e) => warn!(%namespace, error = %e, "cleanup sweep failed"),
            }
        }

        debug!(removed, multiplier, "cache cleanup finished");
        removed
    }

    /// Serves a fresh value if one exists, otherwise runs `fetch`
    ///
    /// A cached value that no longer decodes as `T` counts as a miss. A failed
    /// fetch leaves the cache untouched and returns the error as-is.
    pub async fn get_or_fetch<T, F, Fut, E>(
        &self,
        namespace: Namespace,
        key: &str,
        fetch: F,
    ) -> Result<Lookup<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fill<T>, E>>,
    {
        if let Some(entry) = self.get_entry(namespace, key) {
            match serde_json::from_value(entry.value) {
                Ok(value) => {
                    return Ok(Lookup {
                        value,
                        fetched_at: entry.fetched_at,
                        cached: true,
                    });
                }
                Err(e) => warn!(%namespace, key, error = %e, "cached value has unexpected shape"),
            }
        }
        self.fetch_and_store(namespace, key, fetch).await
    }

    /// Runs `fetch` without reading the cache and stores the result if the
    /// fill allows it
    pub async fn fetch_and_store<T, F, Fut, E>(
        &self,
        namespace: Namespace,
        key: &str,
        fetch: F,
    ) -> Result<Lookup<T>, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fill<T>, E>>,
    {
        let fill = fetch().await?;
        let mut fetched_at = self.clock.now_ms();
        if fill.store {
            match serde_json::to_value(&fill.value) {
                Ok(json) => fetched_at = self.set(namespace, key, json).fetched_at,
                Err(e) => warn!(%namespace, key, error = %e, "value not cacheable"),
            }
        } else {
            debug!(%namespace, key, "fetched value not cached");
        }
        Ok(Lookup {
            value: fill.value,
            fetched_at,
            cached: false,
        })
    }
}
