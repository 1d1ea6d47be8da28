//! Cache warming for popular keys
//!
//! `CacheWarmer` runs a batch of producers per data category, writes every
//! successful value through `CacheManager::set_for`, and keeps a bounded
//! history of warming passes for monitoring.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::CacheManager;
use crate::config::DataCategory;
use crate::data::provider::ProviderError;

/// A key to warm and the future that produces its value
pub struct WarmItem<V> {
    pub key: String,
    pub producer: BoxFuture<'static, Result<V, ProviderError>>,
}

impl<V> WarmItem<V> {
    pub fn new<F>(key: impl Into<String>, producer: F) -> Self
    where
        F: Future<Output = Result<V, ProviderError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            producer: producer.boxed(),
        }
    }
}

impl<V> std::fmt::Debug for WarmItem<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmItem").field("key", &self.key).finish()
    }
}

/// Outcome of one warming pass over one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmingRecord {
    pub timestamp: DateTime<Utc>,
    pub data_category: DataCategory,
    pub entries_warmed: usize,
    pub entries_attempted: usize,
    /// warmed / attempted; 1.0 for an empty pass
    pub success_rate: f64,
}

/// Per-category rollup of warming history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryWarmingStats {
    pub operations: usize,
    pub entries_warmed: usize,
    pub average_success_rate: f64,
    pub last_warmed: Option<DateTime<Utc>>,
}

/// Rollup of the whole warming history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmingStats {
    pub total_operations: usize,
    pub total_entries_warmed: usize,
    pub average_success_rate: f64,
    pub per_category_breakdown: BTreeMap<DataCategory, CategoryWarmingStats>,
}

/// Pre-populates the cache and records how well each pass went
pub struct CacheWarmer<V> {
    cache: Arc<CacheManager<V>>,
    categories: Vec<DataCategory>,
    history: Mutex<VecDeque<WarmingRecord>>,
    history_limit: usize,
}

impl<V> std::fmt::Debug for CacheWarmer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmer")
            .field("categories", &self.categories)
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

impl<V> CacheWarmer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a warmer for the given categories keeping at most `history_limit` records
    pub fn new(cache: Arc<CacheManager<V>>, categories: Vec<DataCategory>, history_limit: usize) -> Self {
        Self {
            cache,
            categories,
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// Runs every producer for a category and caches the successes
    ///
    /// Never fails: producers that error are skipped and counted against the
    /// success rate.
    pub async fn warm_category(&self, category: DataCategory, items: Vec<WarmItem<V>>) -> WarmingRecord {
        let entries_attempted = items.len();
        let results = join_all(
            items
                .into_iter()
                .map(|item| async move { (item.key, item.producer.await) }),
        )
        .await;

        let mut entries_warmed = 0;
        for (key, result) in results {
            match result {
                Ok(value) => match self.cache.set_for(category, &key, value) {
                    Ok(()) => entries_warmed += 1,
                    Err(e) => warn!(%category, key = %key, error = %e, "failed to store warmed entry"),
                },
                Err(e) => debug!(%category, key = %key, error = %e, "warming producer failed"),
            }
        }

        let success_rate = if entries_attempted == 0 {
            1.0
        } else {
            entries_warmed as f64 / entries_attempted as f64
        };

        let record = WarmingRecord {
            timestamp: self.cache.now(),
            data_category: category,
            entries_warmed,
            entries_attempted,
            success_rate,
        };
        info!(
            %category,
            entries_warmed,
            entries_attempted,
            success_rate,
            "cache warming pass finished"
        );
        self.push_record(record.clone());
        record
    }

    /// Warms every configured category concurrently
    ///
    /// Categories missing from the bundle run as empty passes. Bundle entries
    /// for categories this warmer does not manage are ignored.
    pub async fn warm_all(
        &self,
        mut bundle: HashMap<DataCategory, Vec<WarmItem<V>>>,
    ) -> BTreeMap<DataCategory, WarmingRecord> {
        let passes: Vec<(DataCategory, Vec<WarmItem<V>>)> = self
            .categories
            .iter()
            .map(|&category| (category, bundle.remove(&category).unwrap_or_default()))
            .collect();

        let records: BTreeMap<_, _> = join_all(
            passes
                .into_iter()
                .map(|(category, items)| async move { (category, self.warm_category(category, items).await) }),
        )
        .await
        .into_iter()
        .collect();

        for category in bundle.keys() {
            warn!(%category, "ignoring warm items for unconfigured category");
        }
        records
    }

    fn push_record(&self, record: WarmingRecord) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Most recent records first, at most `limit`
    pub fn history(&self, limit: usize) -> Vec<WarmingRecord> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Rollup over the retained history
    pub fn aggregate_stats(&self) -> WarmingStats {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.is_empty() {
            return WarmingStats::default();
        }

        let mut per_category: BTreeMap<DataCategory, (CategoryWarmingStats, f64)> = BTreeMap::new();
        let mut rate_sum = 0.0;
        let mut total_entries_warmed = 0;

        for record in history.iter() {
            rate_sum += record.success_rate;
            total_entries_warmed += record.entries_warmed;

            let (stats, category_rate_sum) = per_category.entry(record.data_category).or_default();
            stats.operations += 1;
            stats.entries_warmed += record.entries_warmed;
            stats.last_warmed = Some(
                stats
                    .last_warmed
                    .map_or(record.timestamp, |last| last.max(record.timestamp)),
            );
            *category_rate_sum += record.success_rate;
        }

        WarmingStats {
            total_operations: history.len(),
            total_entries_warmed,
            average_success_rate: rate_sum / history.len() as f64,
            per_category_breakdown: per_category
                .into_iter()
                .map(|(category, (mut stats, rate_sum))| {
                    stats.average_success_rate = rate_sum / stats.operations as f64;
                    (category, stats)
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ManualClock, TieredStore};
    use crate::config::TtlTable;

    fn create_warmer(history_limit: usize) -> (CacheWarmer<String>, Arc<CacheManager<String>>) {
        let cache = Arc::new(CacheManager::in_memory(TtlTable::default()));
        let warmer = CacheWarmer::new(cache.clone(), DataCategory::ALL.to_vec(), history_limit);
        (warmer, cache)
    }

    fn ok_item(key: &str) -> WarmItem<String> {
        let value = format!("value for {}", key);
        WarmItem::new(key, async move { Ok(value) })
    }

    fn failing_item(key: &str) -> WarmItem<String> {
        WarmItem::new(key, async { Err(ProviderError::Unavailable("upstream down".to_string())) })
    }

    #[tokio::test]
    async fn test_warm_category_caches_successes_and_counts_failures() {
        let (warmer, cache) = create_warmer(10);
        let items = vec![
            ok_item("weather:us:ny:nyc"),
            failing_item("weather:in:mh:mumbai"),
            ok_item("weather:gb:eng:london"),
            failing_item("weather:fr:idf:paris"),
        ];

        let record = warmer.warm_category(DataCategory::Weather, items).await;

        assert_eq!(record.entries_attempted, 4);
        assert_eq!(record.entries_warmed, 2);
        assert!((record.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(cache.get("weather:us:ny:nyc").as_deref(), Some("value for weather:us:ny:nyc"));
        assert!(cache.get_expired("weather:in:mh:mumbai").is_none());
    }

    #[tokio::test]
    async fn test_unbounded_history_limit_does_not_preallocate() {
        let (warmer, _) = create_warmer(usize::MAX);
        warmer.warm_category(DataCategory::Weather, vec![ok_item("a")]).await;
        assert_eq!(warmer.history(usize::MAX).len(), 1);
    }

    #[tokio::test]
    async fn test_record_timestamp_follows_cache_clock() {
        let start = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let cache: Arc<CacheManager<String>> =
            Arc::new(CacheManager::new(TieredStore::memory_only(), TtlTable::default(), clock.clone()));
        let warmer = CacheWarmer::new(cache, DataCategory::ALL.to_vec(), 10);

        let first = warmer.warm_category(DataCategory::Weather, Vec::new()).await;
        clock.advance_secs(90);
        let second = warmer.warm_category(DataCategory::Weather, Vec::new()).await;

        assert_eq!(first.timestamp, start);
        assert_eq!(second.timestamp, start + chrono::Duration::seconds(90));
        assert_eq!(
            warmer.aggregate_stats().per_category_breakdown[&DataCategory::Weather].last_warmed,
            Some(second.timestamp)
        );
    }

    #[tokio::test]
    async fn test_empty_pass_is_vacuously_successful() {
        let (warmer, _) = create_warmer(10);
        let record = warmer.warm_category(DataCategory::Pollen, Vec::new()).await;
        assert_eq!(record.entries_warmed, 0);
        assert_eq!(record.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_all_failures_still_returns_record() {
        let (warmer, _) = create_warmer(10);
        let record = warmer
            .warm_category(DataCategory::Pollen, vec![failing_item("a"), failing_item("b")])
            .await;
        assert_eq!(record.success_rate, 0.0);
        assert_eq!(warmer.history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_warming_is_idempotent_for_deterministic_producers() {
        let (warmer, _) = create_warmer(10);
        let items = || vec![ok_item("a"), failing_item("b"), ok_item("c")];

        let first = warmer.warm_category(DataCategory::Weather, items()).await;
        let second = warmer.warm_category(DataCategory::Weather, items()).await;

        assert_eq!(first.success_rate, second.success_rate);
        assert_eq!(first.entries_warmed, second.entries_warmed);
    }

    #[tokio::test]
    async fn test_warm_all_runs_categories_independently() {
        let (warmer, cache) = create_warmer(10);
        let mut bundle = HashMap::new();
        bundle.insert(DataCategory::Weather, vec![failing_item("weather:a"), failing_item("weather:b")]);
        bundle.insert(DataCategory::Pollen, vec![ok_item("pollen:a")]);

        let records = warmer.warm_all(bundle).await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[&DataCategory::Weather].success_rate, 0.0);
        assert_eq!(records[&DataCategory::Pollen].success_rate, 1.0);
        assert!(cache.get("pollen:a").is_some());
    }

    #[tokio::test]
    async fn test_warm_all_covers_categories_missing_from_bundle() {
        let (warmer, _) = create_warmer(10);
        let mut bundle = HashMap::new();
        bundle.insert(DataCategory::Weather, vec![ok_item("weather:a")]);

        let records = warmer.warm_all(bundle).await;

        assert_eq!(records[&DataCategory::Pollen].entries_attempted, 0);
        assert_eq!(records[&DataCategory::Pollen].success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first_and_bounded() {
        let (warmer, _) = create_warmer(3);
        for n in 0..5 {
            let items = (0..n).map(|i| ok_item(&format!("k{}", i))).collect();
            warmer.warm_category(DataCategory::Weather, items).await;
        }

        let history = warmer.history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].entries_warmed, 4);
        assert_eq!(history[1].entries_warmed, 3);
        assert_eq!(history[2].entries_warmed, 2);

        assert_eq!(warmer.history(1).len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_stats() {
        let (warmer, _) = create_warmer(10);
        warmer
            .warm_category(DataCategory::Weather, vec![ok_item("a"), failing_item("b")])
            .await;
        warmer.warm_category(DataCategory::Weather, vec![ok_item("c")]).await;
        warmer.warm_category(DataCategory::Pollen, vec![failing_item("d")]).await;

        let stats = warmer.aggregate_stats();
        assert_eq!(stats.total_operations, 3);
        assert_eq!(stats.total_entries_warmed, 2);
        assert!((stats.average_success_rate - 0.5).abs() < 1e-9);

        let weather = &stats.per_category_breakdown[&DataCategory::Weather];
        assert_eq!(weather.operations, 2);
        assert_eq!(weather.entries_warmed, 2);
        assert!((weather.average_success_rate - 0.75).abs() < 1e-9);
        assert!(weather.last_warmed.is_some());

        let pollen = &stats.per_category_breakdown[&DataCategory::Pollen];
        assert_eq!(pollen.average_success_rate, 0.0);
    }

    #[test]
    fn test_aggregate_stats_empty_history() {
        let (warmer, _) = create_warmer(10);
        let stats = warmer.aggregate_stats();
        assert_eq!(stats.total_operations, 0);
        assert_eq!(stats.average_success_rate, 0.0);
        assert!(stats.per_category_breakdown.is_empty());
    }
}
