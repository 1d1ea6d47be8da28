//! Application wiring for pollencast
//!
//! `App` owns the shared cache, the resilient fetcher, the warmer and the
//! correlation engine, and exposes one method per CLI command. The binary
//! only parses arguments, calls into `App`, and prints JSON.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CacheError, CacheManager, CacheStats, CacheWarmer, DiskStore, SystemClock, WarmItem, WarmingRecord, WarmingStats};
use crate::cli::StartupConfig;
use crate::config::{CacheConfig, ConfigError, DataCategory};
use crate::correlation::{align_series, insights, rank_by_relevance, CorrelationEngine, CorrelationResult};
use crate::data::{Payload, PollenProvider, Provider, ProviderError, RetryPolicy, Retrying, WeatherProvider};
use crate::fetcher::{FetchOutcome, ResilientFetcher, Tier};
use crate::maintenance::{MaintenanceConfig, MaintenanceHandle};

/// Cache and warming statistics
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub storage: String,
    pub cache: CacheStats,
    pub warming: WarmingStats,
}

/// Correlation results for one location
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub location_key: String,
    pub weather_tier: Tier,
    pub pollen_tier: Tier,
    /// True if either input was stale or a default
    pub stale: bool,
    /// Number of shared hourly timestamps the series were aligned on
    pub aligned_points: usize,
    /// Ranked by |r|, strongest first
    pub results: Vec<CorrelationResult>,
    pub insights: Vec<String>,
}

/// Main application struct tying the cache, fetcher and warmer together
pub struct App {
    config: CacheConfig,
    storage: Option<PathBuf>,
    cache: Arc<CacheManager<Payload>>,
    fetcher: ResilientFetcher,
    warmer: CacheWarmer<Payload>,
    engine: CorrelationEngine,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("fetcher", &self.fetcher)
            .field("warmer", &self.warmer)
            .finish()
    }
}

impl App {
    /// Creates an App with the Open-Meteo providers wrapped in retries
    pub fn with_startup_config(startup: StartupConfig) -> Result<Self, ConfigError> {
        let storage = resolve_storage(&startup);
        let cache = Arc::new(match &storage {
            Some(dir) => CacheManager::with_disk(dir.clone(), startup.cache.ttl.clone(), Arc::new(SystemClock)),
            None => CacheManager::in_memory(startup.cache.ttl.clone()),
        });

        let policy = RetryPolicy::default();
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(Retrying::new(WeatherProvider::new(), policy)),
            Arc::new(Retrying::new(PollenProvider::new(), policy)),
        ];

        let mut app = Self::with_providers(startup.cache, cache, providers)?;
        app.storage = storage;
        Ok(app)
    }

    /// Creates an App over an existing cache and provider set
    ///
    /// # Errors
    /// * any `CacheConfig::validate` failure
    /// * `ConfigError::MissingProvider` if a configured category has no provider
    pub fn with_providers(
        config: CacheConfig,
        cache: Arc<CacheManager<Payload>>,
        providers: Vec<Arc<dyn Provider>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let categories = config.categories();
        let fetcher = ResilientFetcher::new(cache.clone(), providers, &categories)?;
        let warmer = CacheWarmer::new(cache.clone(), categories, config.history_limit);

        Ok(Self {
            config,
            storage: None,
            cache,
            fetcher,
            warmer,
            engine: CorrelationEngine::new(),
        })
    }

    pub fn cache(&self) -> &Arc<CacheManager<Payload>> {
        &self.cache
    }

    pub fn warmer(&self) -> &CacheWarmer<Payload> {
        &self.warmer
    }

    /// Fetches one category for a location through the fallback tiers
    pub async fn fetch(&self, category: DataCategory, location_key: &str) -> FetchOutcome {
        self.fetcher.fetch(category, location_key).await
    }

    /// Producers for every popular key of every configured category
    ///
    /// Each producer fetches through the category provider and rejects
    /// payloads that fail validation, so only good data gets warmed.
    pub fn warm_bundle(&self) -> HashMap<DataCategory, Vec<WarmItem<Payload>>> {
        let mut bundle = HashMap::new();
        for category in self.config.categories() {
            let Some(provider) = self.fetcher.provider(category) else {
                continue;
            };
            let items = self
                .config
                .popular_for(category)
                .iter()
                .map(|location_key| {
                    let provider = Arc::clone(provider);
                    let location_key = location_key.clone();
                    WarmItem::new(category.cache_key(&location_key), async move {
                        let payload = provider.fetch(&location_key).await?;
                        if payload.category() != category || !provider.validate(&payload) {
                            return Err(ProviderError::InvalidPayload(format!(
                                "failed validation: {}",
                                payload.summary()
                            )));
                        }
                        Ok(payload)
                    })
                })
                .collect();
            bundle.insert(category, items);
        }
        bundle
    }

    /// Warms every configured category for its popular locations
    pub async fn warm(&self) -> BTreeMap<DataCategory, WarmingRecord> {
        let records = self.warmer.warm_all(self.warm_bundle()).await;
        let warmed: usize = records.values().map(|record| record.entries_warmed).sum();
        info!(warmed, categories = records.len(), "cache warming finished");
        records
    }

    /// Correlates hourly weather factors with pollen levels for a location
    ///
    /// Both inputs go through the fetcher, so stale or default data still
    /// produces a report; defaults carry no history and yield no results.
    pub async fn correlate(&self, location_key: &str, limit: usize) -> CorrelationReport {
        let (weather, pollen) = futures::join!(
            self.fetch(DataCategory::Weather, location_key),
            self.fetch(DataCategory::Pollen, location_key)
        );

        let (weather_series, pollen_series) = align_series(weather.value.hourly(), pollen.value.hourly());
        let aligned_points = weather_series
            .values()
            .chain(pollen_series.values())
            .map(Vec::len)
            .next()
            .unwrap_or(0);

        let mut results = self.engine.compute_all(&weather_series, &pollen_series);
        rank_by_relevance(&mut results);
        let insights = insights(&results, limit);

        CorrelationReport {
            location_key: location_key.to_string(),
            weather_tier: weather.tier,
            pollen_tier: pollen.tier,
            stale: weather.stale || pollen.stale,
            aligned_points,
            results,
            insights,
        }
    }

    pub fn stats(&self) -> StatsReport {
        StatsReport {
            storage: match &self.storage {
                Some(dir) => dir.display().to_string(),
                None => "memory".to_string(),
            },
            cache: self.cache.stats(),
            warming: self.warmer.aggregate_stats(),
        }
    }

    /// Removes expired entries now
    pub fn cleanup(&self) -> Result<usize, CacheError> {
        self.cache.cleanup_expired()
    }

    /// Starts periodic cleanup on the current runtime
    pub fn spawn_maintenance(&self, cleanup_interval: Duration) -> MaintenanceHandle {
        MaintenanceHandle::spawn(
            MaintenanceConfig {
                cleanup_interval,
                enabled: true,
            },
            self.cache.clone(),
        )
    }
}

/// Directory for the on-disk layer, or `None` for memory only
fn resolve_storage(startup: &StartupConfig) -> Option<PathBuf> {
    if startup.memory_only {
        return None;
    }
    if let Some(dir) = &startup.cache.cache_dir {
        return Some(dir.clone());
    }
    match DiskStore::<Payload>::new() {
        Some(store) => Some(store.cache_dir().clone()),
        None => {
            warn!("no user cache directory available, keeping the cache in memory");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtlTable;
    use crate::data::{factors, pollen_types, PollenReport, TimeSeriesPoint, WeatherReport};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves synthetic hourly history where pollen tracks wind speed
    struct SyntheticProvider {
        category: DataCategory,
        fail: bool,
        calls: AtomicUsize,
    }

    impl SyntheticProvider {
        fn new(category: DataCategory) -> Arc<Self> {
            Arc::new(Self {
                category,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(category: DataCategory) -> Arc<Self> {
            Arc::new(Self {
                category,
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for SyntheticProvider {
        fn category(&self) -> DataCategory {
            self.category
        }

        async fn fetch(&self, _location_key: &str) -> Result<Payload, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Unavailable("offline".into()));
            }
            let start = Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap();
            let hours: Vec<_> = (0..6).map(|h| start + ChronoDuration::hours(h)).collect();
            Ok(match self.category {
                DataCategory::Weather => Payload::Weather(WeatherReport {
                    temperature: 18.0,
                    humidity: 60.0,
                    wind_speed: 6.0,
                    precipitation: 0.0,
                    fetched_at: Utc::now(),
                    hourly: hours
                        .iter()
                        .enumerate()
                        .map(|(i, ts)| TimeSeriesPoint::new(*ts, factors::WIND_SPEED, i as f64))
                        .collect(),
                }),
                DataCategory::Pollen => Payload::Pollen(PollenReport {
                    grass: 12.0,
                    tree: 0.0,
                    weed: 0.0,
                    fetched_at: Utc::now(),
                    hourly: hours
                        .iter()
                        .enumerate()
                        .map(|(i, ts)| TimeSeriesPoint::new(*ts, pollen_types::GRASS, 2.0 * i as f64 + 1.0))
                        .collect(),
                }),
            })
        }

        fn validate(&self, _payload: &Payload) -> bool {
            true
        }
    }

    fn test_config() -> CacheConfig {
        let mut config = CacheConfig::default();
        for keys in config.popular.values_mut() {
            *keys = vec!["us:ny:nyc".to_string(), "gb:eng:london".to_string()];
        }
        config
    }

    fn test_app(providers: Vec<Arc<dyn Provider>>) -> App {
        let cache = Arc::new(CacheManager::in_memory(TtlTable::default()));
        App::with_providers(test_config(), cache, providers).unwrap()
    }

    #[test]
    fn test_missing_provider_is_config_error() {
        let cache = Arc::new(CacheManager::in_memory(TtlTable::default()));
        let providers: Vec<Arc<dyn Provider>> = vec![SyntheticProvider::new(DataCategory::Weather)];
        let err = App::with_providers(test_config(), cache, providers).unwrap_err();
        assert_eq!(err, ConfigError::MissingProvider(DataCategory::Pollen));
    }

    #[tokio::test]
    async fn test_warm_populates_popular_keys() {
        let app = test_app(vec![
            SyntheticProvider::new(DataCategory::Weather),
            SyntheticProvider::new(DataCategory::Pollen),
        ]);

        let records = app.warm().await;

        assert_eq!(records.len(), 2);
        assert!(records.values().all(|record| record.entries_warmed == 2));
        assert!(app.cache().get("pollen:gb:eng:london").is_some());
        assert_eq!(app.stats().warming.total_operations, 2);
    }

    #[tokio::test]
    async fn test_warm_counts_failures() {
        let app = test_app(vec![
            SyntheticProvider::new(DataCategory::Weather),
            SyntheticProvider::failing(DataCategory::Pollen),
        ]);

        let records = app.warm().await;

        assert_eq!(records[&DataCategory::Weather].success_rate, 1.0);
        assert_eq!(records[&DataCategory::Pollen].success_rate, 0.0);
        assert!(app.cache().get("pollen:us:ny:nyc").is_none());
    }

    #[tokio::test]
    async fn test_correlate_finds_wind_grass_relationship() {
        let app = test_app(vec![
            SyntheticProvider::new(DataCategory::Weather),
            SyntheticProvider::new(DataCategory::Pollen),
        ]);

        let report = app.correlate("us:ny:nyc", 3).await;

        assert_eq!(report.aligned_points, 6);
        assert!(!report.stale);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].weather_factor, factors::WIND_SPEED);
        assert!((report.results[0].coefficient - 1.0).abs() < 1e-9);
        assert_eq!(report.insights.len(), 1);
    }

    #[tokio::test]
    async fn test_correlate_with_defaults_is_empty() {
        let app = test_app(vec![
            SyntheticProvider::failing(DataCategory::Weather),
            SyntheticProvider::failing(DataCategory::Pollen),
        ]);

        let report = app.correlate("us:ny:nyc", 3).await;

        assert!(report.stale);
        assert_eq!(report.weather_tier, Tier::Default);
        assert_eq!(report.aligned_points, 0);
        assert!(report.results.is_empty());
        assert!(report.insights.is_empty());
    }

    #[test]
    fn test_debug_names_storage_and_categories() {
        let app = test_app(vec![
            SyntheticProvider::new(DataCategory::Weather),
            SyntheticProvider::new(DataCategory::Pollen),
        ]);
        let rendered = format!("{:?}", app);
        assert!(rendered.starts_with("App"));
        assert!(rendered.contains("storage: None"));
        assert!(rendered.contains("Pollen"));
    }

    #[test]
    fn test_stats_reports_memory_storage() {
        let app = test_app(vec![
            SyntheticProvider::new(DataCategory::Weather),
            SyntheticProvider::new(DataCategory::Pollen),
        ]);
        let stats = app.stats();
        assert_eq!(stats.storage, "memory");
        assert_eq!(stats.cache.total_entries, 0);
    }

    #[test]
    fn test_resolve_storage_prefers_memory_only() {
        let mut startup = StartupConfig::default();
        startup.cache.cache_dir = Some(PathBuf::from("/tmp/pollencast-test"));
        assert_eq!(resolve_storage(&startup), Some(PathBuf::from("/tmp/pollencast-test")));

        startup.memory_only = true;
        assert_eq!(resolve_storage(&startup), None);
    }
}
