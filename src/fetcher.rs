//! Resilient per-category fetching with stale and default fallbacks
//!
//! `ResilientFetcher::fetch` never fails. It walks the fallback tiers in
//! order and stops at the first that yields a value:
//!
//! 1. a fresh cache entry
//! 2. a fresh provider fetch that passes validation (cached on the way out)
//! 3. an expired cache entry, flagged stale
//! 4. the category default, flagged stale and default

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::config::{ConfigError, DataCategory};
use crate::data::{Payload, PollenReport, Provider, ProviderError, WeatherReport};

/// Which fallback tier produced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Fresh entry already in the cache
    Cache,
    /// Fetched from the provider on this request
    Fresh,
    /// Expired cache entry served after a provider failure
    Stale,
    /// Category default served when nothing else was available
    Default,
}

/// Why the provider tier failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FetchFailure {
    /// Transient upstream failure, after retries
    ProviderUnavailable(String),
    /// Upstream answered with data that failed validation
    InvalidPayload(String),
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::ProviderUnavailable(msg) => write!(f, "provider unavailable: {}", msg),
            FetchFailure::InvalidPayload(msg) => write!(f, "invalid payload: {}", msg),
        }
    }
}

impl From<ProviderError> for FetchFailure {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::InvalidPayload(msg) => FetchFailure::InvalidPayload(msg),
            other => FetchFailure::ProviderUnavailable(other.to_string()),
        }
    }
}

/// A value plus metadata about how fresh it is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub category: DataCategory,
    pub location_key: String,
    pub value: Payload,
    pub stale: bool,
    pub is_default: bool,
    pub tier: Tier,
    /// Human-readable reason the value is stale
    pub stale_reason: Option<String>,
    /// Provider failure that forced a fallback
    pub error: Option<FetchFailure>,
}

/// Placeholder payload served when no data is available for a category
pub fn default_payload(category: DataCategory) -> Payload {
    let fetched_at = Utc::now();
    match category {
        DataCategory::Weather => Payload::Weather(WeatherReport {
            temperature: 20.0,
            humidity: 50.0,
            wind_speed: 0.0,
            precipitation: 0.0,
            fetched_at,
            hourly: Vec::new(),
        }),
        DataCategory::Pollen => Payload::Pollen(PollenReport {
            grass: 0.0,
            tree: 0.0,
            weed: 0.0,
            fetched_at,
            hourly: Vec::new(),
        }),
    }
}

/// Fetch orchestration over the shared cache and one provider per category
pub struct ResilientFetcher {
    cache: Arc<CacheManager<Payload>>,
    providers: HashMap<DataCategory, Arc<dyn Provider>>,
}

impl std::fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut categories: Vec<_> = self.providers.keys().collect();
        categories.sort();
        f.debug_struct("ResilientFetcher")
            .field("categories", &categories)
            .finish()
    }
}

impl ResilientFetcher {
    /// Creates a fetcher, requiring a provider for every listed category
    ///
    /// # Errors
    /// * `ConfigError::MissingProvider` if a category has no provider
    pub fn new(
        cache: Arc<CacheManager<Payload>>,
        providers: Vec<Arc<dyn Provider>>,
        categories: &[DataCategory],
    ) -> Result<Self, ConfigError> {
        let providers: HashMap<_, _> = providers
            .into_iter()
            .map(|provider| (provider.category(), provider))
            .collect();

        for category in categories {
            if !providers.contains_key(category) {
                return Err(ConfigError::MissingProvider(*category));
            }
        }

        Ok(Self { cache, providers })
    }

    pub fn cache(&self) -> &Arc<CacheManager<Payload>> {
        &self.cache
    }

    /// Provider registered for a category
    pub fn provider(&self, category: DataCategory) -> Option<&Arc<dyn Provider>> {
        self.providers.get(&category)
    }

    /// Returns data for a location, degrading to stale or default values
    pub async fn fetch(&self, category: DataCategory, location_key: &str) -> FetchOutcome {
        let key = category.cache_key(location_key);

        if let Some(value) = self.cache.get(&key) {
            return self.outcome(category, location_key, value, Tier::Cache, None);
        }

        let failure = match self.fetch_fresh(category, location_key).await {
            Ok(value) => {
                if let Err(e) = self.cache.set_for(category, &key, value.clone()) {
                    warn!(key = %key, error = %e, "failed to cache fresh value");
                }
                return self.outcome(category, location_key, value, Tier::Fresh, None);
            }
            Err(failure) => failure,
        };

        if let Some(value) = self.cache.get_expired(&key) {
            info!(key = %key, reason = %failure, "serving stale cache entry");
            return self.outcome(category, location_key, value, Tier::Stale, Some(failure));
        }

        info!(key = %key, reason = %failure, "serving category default");
        self.outcome(
            category,
            location_key,
            default_payload(category),
            Tier::Default,
            Some(failure),
        )
    }

    /// Calls the provider and validates what it returns
    async fn fetch_fresh(&self, category: DataCategory, location_key: &str) -> Result<Payload, FetchFailure> {
        let provider = self.providers.get(&category).ok_or_else(|| {
            FetchFailure::ProviderUnavailable(format!("no provider registered for {}", category))
        })?;

        let payload = match provider.fetch(location_key).await {
            Ok(payload) => payload,
            Err(ProviderError::InvalidPayload(msg)) => {
                warn!(%category, location_key, reason = %msg, "provider returned unparseable payload");
                return Err(FetchFailure::InvalidPayload(msg));
            }
            Err(e) => {
                warn!(%category, location_key, error = %e, "provider fetch failed");
                return Err(e.into());
            }
        };

        if payload.category() != category || !provider.validate(&payload) {
            let summary = payload.summary();
            warn!(%category, location_key, payload = %summary, "provider payload failed validation");
            return Err(FetchFailure::InvalidPayload(summary));
        }

        debug!(%category, location_key, "fetched fresh payload");
        Ok(payload)
    }

    fn outcome(
        &self,
        category: DataCategory,
        location_key: &str,
        value: Payload,
        tier: Tier,
        error: Option<FetchFailure>,
    ) -> FetchOutcome {
        let stale = matches!(tier, Tier::Stale | Tier::Default);
        FetchOutcome {
            category,
            location_key: location_key.to_string(),
            value,
            stale,
            is_default: tier == Tier::Default,
            tier,
            stale_reason: error.as_ref().map(ToString::to_string),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ManualClock, TieredStore};
    use crate::config::TtlTable;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Provider returning a scripted sequence of results
    struct ScriptedProvider {
        category: DataCategory,
        script: Mutex<Vec<Result<Payload, ProviderError>>>,
        calls: AtomicU32,
        valid: bool,
    }

    impl ScriptedProvider {
        fn new(category: DataCategory, script: Vec<Result<Payload, ProviderError>>) -> Self {
            Self {
                category,
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                valid: true,
            }
        }

        fn rejecting(mut self) -> Self {
            self.valid = false;
            self
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn category(&self) -> DataCategory {
            self.category
        }

        async fn fetch(&self, _location_key: &str) -> Result<Payload, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(ProviderError::Unavailable("script exhausted".to_string()));
            }
            script.remove(0)
        }

        fn validate(&self, _payload: &Payload) -> bool {
            self.valid
        }
    }

    fn weather(temperature: f64) -> Payload {
        Payload::Weather(WeatherReport {
            temperature,
            humidity: 40.0,
            wind_speed: 3.0,
            precipitation: 0.0,
            fetched_at: Utc::now(),
            hourly: Vec::new(),
        })
    }

    fn temperature_of(payload: &Payload) -> f64 {
        match payload {
            Payload::Weather(report) => report.temperature,
            other => panic!("expected weather payload, got {:?}", other),
        }
    }

    fn setup(
        provider: ScriptedProvider,
    ) -> (ResilientFetcher, Arc<ScriptedProvider>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = Arc::new(CacheManager::new(
            TieredStore::memory_only(),
            TtlTable::default(),
            clock.clone(),
        ));
        let provider = Arc::new(provider);
        let pollen = Arc::new(ScriptedProvider::new(DataCategory::Pollen, Vec::new()));
        let fetcher = ResilientFetcher::new(
            cache,
            vec![provider.clone() as Arc<dyn Provider>, pollen as Arc<dyn Provider>],
            &DataCategory::ALL,
        )
        .expect("all categories have providers");
        (fetcher, provider, clock)
    }

    #[tokio::test]
    async fn test_fresh_fetch_is_cached() {
        let (fetcher, provider, _) =
            setup(ScriptedProvider::new(DataCategory::Weather, vec![Ok(weather(21.0))]));

        let first = fetcher.fetch(DataCategory::Weather, "us:ny:nyc").await;
        assert_eq!(first.tier, Tier::Fresh);
        assert!(!first.stale);
        assert!(!first.is_default);
        assert!(first.error.is_none());

        let second = fetcher.fetch(DataCategory::Weather, "us:ny:nyc").await;
        assert_eq!(second.tier, Tier::Cache);
        assert_eq!(temperature_of(&second.value), 21.0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_serves_stale_entry() {
        let (fetcher, _, clock) = setup(ScriptedProvider::new(
            DataCategory::Weather,
            vec![
                Ok(weather(18.0)),
                Err(ProviderError::Unavailable("timeout".to_string())),
            ],
        ));

        fetcher.fetch(DataCategory::Weather, "gb:eng:london").await;
        clock.advance_secs(601);

        let outcome = fetcher.fetch(DataCategory::Weather, "gb:eng:london").await;
        assert_eq!(outcome.tier, Tier::Stale);
        assert!(outcome.stale);
        assert!(!outcome.is_default);
        assert_eq!(temperature_of(&outcome.value), 18.0);
        assert!(matches!(outcome.error, Some(FetchFailure::ProviderUnavailable(_))));
        assert!(outcome.stale_reason.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_no_entry_serves_default() {
        let (fetcher, _, _) = setup(ScriptedProvider::new(
            DataCategory::Weather,
            vec![Err(ProviderError::Unavailable("dns".to_string()))],
        ));

        let outcome = fetcher.fetch(DataCategory::Weather, "in:mh:mumbai").await;
        assert_eq!(outcome.tier, Tier::Default);
        assert!(outcome.stale);
        assert!(outcome.is_default);
        assert_eq!(outcome.value.category(), DataCategory::Weather);
        assert_eq!(temperature_of(&outcome.value), 20.0);
        assert!(outcome.value.hourly().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_payload_falls_back_and_is_not_cached() {
        let (fetcher, _, _) = setup(
            ScriptedProvider::new(DataCategory::Weather, vec![Ok(weather(500.0))]).rejecting(),
        );

        let outcome = fetcher.fetch(DataCategory::Weather, "us:ca:la").await;
        assert_eq!(outcome.tier, Tier::Default);
        assert!(matches!(outcome.error, Some(FetchFailure::InvalidPayload(ref s)) if s.contains("temp=500")));
        assert!(fetcher.cache().get_expired("weather:us:ca:la").is_none());
    }

    #[tokio::test]
    async fn test_wrong_category_payload_is_invalid() {
        let wrong = Payload::Pollen(PollenReport {
            grass: 1.0,
            tree: 1.0,
            weed: 1.0,
            fetched_at: Utc::now(),
            hourly: Vec::new(),
        });
        let (fetcher, _, _) = setup(ScriptedProvider::new(DataCategory::Weather, vec![Ok(wrong)]));

        let outcome = fetcher.fetch(DataCategory::Weather, "us:ca:la").await;
        assert!(matches!(outcome.error, Some(FetchFailure::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_unknown_location_maps_to_unavailable() {
        let (fetcher, _, _) = setup(ScriptedProvider::new(
            DataCategory::Weather,
            vec![Err(ProviderError::UnknownLocation("xx".to_string()))],
        ));
        let outcome = fetcher.fetch(DataCategory::Weather, "xx").await;
        assert!(outcome.is_default);
        assert!(matches!(outcome.error, Some(FetchFailure::ProviderUnavailable(_))));
    }

    #[test]
    fn test_missing_provider_is_config_error() {
        let cache = Arc::new(CacheManager::in_memory(TtlTable::default()));
        let weather_only: Vec<Arc<dyn Provider>> =
            vec![Arc::new(ScriptedProvider::new(DataCategory::Weather, Vec::new()))];

        let err = ResilientFetcher::new(cache, weather_only, &DataCategory::ALL).unwrap_err();
        assert_eq!(err, ConfigError::MissingProvider(DataCategory::Pollen));
    }

    #[test]
    fn test_outcome_serializes_flags() {
        let outcome = FetchOutcome {
            category: DataCategory::Pollen,
            location_key: "de:be:berlin".to_string(),
            value: default_payload(DataCategory::Pollen),
            stale: true,
            is_default: true,
            tier: Tier::Default,
            stale_reason: Some("provider unavailable: x".to_string()),
            error: Some(FetchFailure::ProviderUnavailable("x".to_string())),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stale"], true);
        assert_eq!(json["is_default"], true);
        assert_eq!(json["tier"], "default");
        assert_eq!(json["error"]["kind"], "provider_unavailable");
        assert_eq!(json["value"]["category"], "pollen");
    }
}
