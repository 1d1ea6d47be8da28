//! Cache entry and statistics types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single cached value with its storage time and TTL
///
/// An entry is fresh while `now < stored_at + ttl_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// Cache key (e.g., "weather:us:ny:nyc")
    pub key: String,
    /// The cached value
    pub value: V,
    /// When the value was stored
    pub stored_at: DateTime<Utc>,
    /// How long the value is considered fresh
    pub ttl_seconds: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V, stored_at: DateTime<Utc>, ttl_seconds: u64) -> Self {
        Self {
            key: key.into(),
            value,
            stored_at,
            ttl_seconds,
        }
    }

    /// When the entry stops being fresh, `None` if beyond the representable range
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = i64::try_from(self.ttl_seconds).ok()?;
        self.stored_at.checked_add_signed(Duration::try_seconds(ttl)?)
    }

    /// Whether the entry is past its TTL at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now >= expires_at)
    }
}

/// Aggregate view over the live cache, recomputed on every call
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub valid_entries: usize,
    pub total_hits: u64,
    pub total_misses: u64,
    /// hits / (hits + misses), 0.0 before any read
    pub hit_rate: f64,
}
