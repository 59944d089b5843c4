//! Bounded, time-bounded concurrent caches.
//!
//! [`CacheTier`] is the building block for every token cache tier: a
//! [`moka::sync::Cache`] with a maximum capacity and a per-entry TTL, plus
//! lookup and eviction metrics labelled with the tier name. Expired entries
//! are never returned; moka drops them during its housekeeping, which the
//! background sweeper also drives while traffic is idle.
//!
//! # Concurrency
//!
//! `get`, `put` and `invalidate` are single-entry atomic operations and
//! callers never hold an external lock. Ordering between tiers is the
//! caller's responsibility.

mod tiers;

pub use tiers::{spawn_sweeper, MultiTierCache};

use moka::notification::RemovalCause;
use moka::sync::Cache;
use std::borrow::Borrow;
use std::hash::Hash;
use std::time::Duration;

use crate::observability::metrics;

/// One named cache tier.
pub struct CacheTier<K, V> {
    name: &'static str,
    entries: Cache<K, V>,
}

impl<K, V> CacheTier<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a tier holding at most `max_size` entries, each for `ttl`.
    pub fn new(name: &'static str, ttl: Duration, max_size: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_size)
            .time_to_live(ttl)
            .eviction_listener(move |_key, _value, cause: RemovalCause| {
                if cause.was_evicted() {
                    metrics::record_cache_evictions(name, 1);
                }
            })
            .build();
        Self { name, entries }
    }

    /// Get a live entry.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let value = self.entries.get(key);
        metrics::record_cache_lookup(self.name, value.is_some());
        value
    }

    /// Insert or overwrite an entry.
    pub fn put(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    /// Remove an entry if present.
    pub fn invalidate<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.invalidate(key);
    }

    /// Run pending housekeeping: drop expired entries and enforce capacity.
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }
}
