//! Tiered TTL cache for upstream weather and pollen data
//!
//! This module provides a cache manager that keeps entries in memory with an
//! optional on-disk layer behind it. Expired entries stay readable through
//! `CacheManager::get_expired` until they are cleaned up, allowing the
//! application to serve stale data when providers are unavailable.

mod clock;
mod entry;
mod manager;
mod store;
pub mod warmer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, CacheStats};
pub use manager::CacheManager;
pub use store::{CacheError, DiskStore, MemoryStore, TieredStore, ValueStore};
pub use warmer::{CacheWarmer, CategoryWarmingStats, WarmItem, WarmingRecord, WarmingStats};
