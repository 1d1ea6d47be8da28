//! Cache manager with TTL expiry, stale reads, and hit/miss accounting
//!
//! `CacheManager` owns a `TieredStore` behind a `RwLock`. Reads (`get`,
//! `get_expired`, `stats`) share the read lock; `set`, `invalidate`,
//! `cleanup_expired` and `clear` take the write lock. Nothing here performs
//! network I/O, so the lock is never held across a provider call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::store::{CacheError, DiskStore, TieredStore, ValueStore};
use super::{CacheEntry, CacheStats};
use crate::config::{DataCategory, TtlTable};

/// Shared cache of values keyed by string
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct CacheManager<V> {
    store: RwLock<TieredStore<V>>,
    ttl: TtlTable,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> std::fmt::Debug for CacheManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("ttl", &self.ttl)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache over the given store, TTL table and clock
    pub fn new(store: TieredStore<V>, ttl: TtlTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RwLock::new(store),
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Memory-only cache on the system clock
    pub fn in_memory(ttl: TtlTable) -> Self {
        Self::new(TieredStore::memory_only(), ttl, Arc::new(SystemClock))
    }

    /// Current time on the injected clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn read_store(&self) -> RwLockReadGuard<'_, TieredStore<V>> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, TieredStore<V>> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads an entry under the read lock; storage errors read as absent
    fn load(&self, key: &str) -> Option<CacheEntry<V>> {
        match self.read_store().load(key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Returns the value if present and fresh, counting a hit or a miss
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        match self.load(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit");
                Some(entry.value)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache miss");
                None
            }
        }
    }

    /// Returns the value regardless of expiry
    ///
    /// Used by fallback paths only; does not touch the hit/miss counters.
    pub fn get_expired(&self, key: &str) -> Option<V> {
        self.load(key).map(|entry| entry.value)
    }

    /// Stores a value, overwriting any existing entry
    ///
    /// # Errors
    /// * `CacheError::InvalidTtl` if `ttl_seconds` is zero
    pub fn set(&self, key: &str, value: V, ttl_seconds: u64) -> Result<(), CacheError> {
        if ttl_seconds == 0 {
            return Err(CacheError::InvalidTtl(ttl_seconds));
        }
        let entry = CacheEntry::new(key, value, self.clock.now(), ttl_seconds);
        self.write_store().save(entry)?;
        debug!(key, ttl_seconds, "cache set");
        Ok(())
    }

    /// Stores a value with the configured TTL for its category
    pub fn set_for(&self, category: DataCategory, key: &str, value: V) -> Result<(), CacheError> {
        self.set(key, value, self.ttl_for(category))
    }

    /// Configured TTL for a category
    pub fn ttl_for(&self, category: DataCategory) -> u64 {
        self.ttl.ttl_for(category)
    }

    /// Removes an entry; absent keys are not an error
    pub fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        if self.write_store().remove(key)? {
            debug!(key, "cache entry invalidated");
        }
        Ok(())
    }

    /// Removes every entry whose key starts with `prefix`, returning the count
    pub fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut store = self.write_store();
        let keys: Vec<String> = store
            .entries()?
            .into_iter()
            .map(|entry| entry.key)
            .filter(|key| key.starts_with(prefix))
            .collect();

        let mut removed = 0;
        for key in &keys {
            if store.remove(key)? {
                removed += 1;
            }
        }
        info!(prefix, removed, "invalidated cache entries by prefix");
        Ok(removed)
    }

    /// Removes every entry past its TTL, returning the count removed
    pub fn cleanup_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let mut store = self.write_store();
        let expired: Vec<String> = store
            .entries()?
            .into_iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key)
            .collect();

        let mut removed = 0;
        for key in &expired {
            if store.remove(key)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "cleaned up expired cache entries");
        }
        Ok(removed)
    }

    /// Removes every entry
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut store = self.write_store();
        let keys: Vec<String> = store.entries()?.into_iter().map(|entry| entry.key).collect();
        for key in &keys {
            store.remove(key)?;
        }
        Ok(keys.len())
    }

    /// Aggregate view over the current entries and counters
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = match self.read_store().entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cache scan failed while computing stats");
                Vec::new()
            }
        };

        let expired_entries = entries.iter().filter(|entry| entry.is_expired(now)).count();
        let total_hits = self.hits.load(Ordering::Relaxed);
        let total_misses = self.misses.load(Ordering::Relaxed);
        let reads = total_hits + total_misses;

        CacheStats {
            total_entries: entries.len(),
            expired_entries,
            valid_entries: entries.len() - expired_entries,
            total_hits,
            total_misses,
            hit_rate: if reads == 0 {
                0.0
            } else {
                total_hits as f64 / reads as f64
            },
        }
    }
}

impl<V> CacheManager<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Memory cache backed by JSON files in `cache_dir`
    pub fn with_disk(cache_dir: std::path::PathBuf, ttl: TtlTable, clock: Arc<dyn Clock>) -> Self {
        let disk: DiskStore<V> = DiskStore::with_dir(cache_dir);
        Self::new(TieredStore::with_external(Box::new(disk)), ttl, clock)
    }
}
