//! Startup configuration for the cache and fetch layers
//!
//! Holds the per-category TTL table, the popular keys used for cache warming,
//! and the optional on-disk cache directory. Everything here is validated once
//! at startup; a bad TTL or unknown category is a hard error.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TTL for weather entries (10 minutes)
const DEFAULT_WEATHER_TTL_SECS: u64 = 600;

/// Default TTL for pollen entries (1 hour)
const DEFAULT_POLLEN_TTL_SECS: u64 = 3600;

/// Default number of warming records kept in history
const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Errors raised while building or validating configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Category name is not one of the known data categories
    #[error("Unknown data category: '{0}'. Valid categories: weather, pollen")]
    UnknownCategory(String),

    /// TTL is zero, negative, or not a number
    #[error("Invalid TTL for {category}: '{value}' (must be a positive number of seconds)")]
    InvalidTtl { category: String, value: String },

    /// TTL override is not in `category=seconds` form
    #[error("Invalid TTL override '{0}', expected CATEGORY=SECONDS")]
    MalformedOverride(String),

    /// A known category has no TTL configured
    #[error("No TTL configured for category '{0}'")]
    MissingCategory(DataCategory),

    /// A configured category has no provider registered
    #[error("No provider registered for category '{0}'")]
    MissingProvider(DataCategory),

    /// History limit must allow at least one record
    #[error("Warming history limit must be at least 1")]
    InvalidHistoryLimit,
}

/// Kinds of upstream data served through the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCategory {
    Weather,
    Pollen,
}

impl DataCategory {
    /// All known categories, in a stable order
    pub const ALL: [DataCategory; 2] = [DataCategory::Weather, DataCategory::Pollen];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataCategory::Weather => "weather",
            DataCategory::Pollen => "pollen",
        }
    }

    /// Builds the cache key for a location in this category
    ///
    /// ```
    /// use pollencast::config::DataCategory;
    ///
    /// assert_eq!(DataCategory::Weather.cache_key("us:ny:nyc"), "weather:us:ny:nyc");
    /// ```
    pub fn cache_key(&self, location_key: &str) -> String {
        format!("{}:{}", self.as_str(), location_key)
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weather" => Ok(DataCategory::Weather),
            "pollen" => Ok(DataCategory::Pollen),
            _ => Err(ConfigError::UnknownCategory(s.to_string())),
        }
    }
}

/// TTL in seconds for every data category
///
/// One field per category, so a lookup can never miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlTable {
    weather: u64,
    pollen: u64,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            weather: DEFAULT_WEATHER_TTL_SECS,
            pollen: DEFAULT_POLLEN_TTL_SECS,
        }
    }
}

impl TtlTable {
    /// Builds a table from explicit entries, rejecting non-positive TTLs
    ///
    /// # Errors
    /// * `ConfigError::InvalidTtl` for a zero or negative TTL
    /// * `ConfigError::MissingCategory` if a category has no entry
    pub fn from_entries(
        entries: impl IntoIterator<Item = (DataCategory, i64)>,
    ) -> Result<Self, ConfigError> {
        let mut weather = None;
        let mut pollen = None;
        for (category, ttl) in entries {
            if ttl <= 0 {
                return Err(ConfigError::InvalidTtl {
                    category: category.to_string(),
                    value: ttl.to_string(),
                });
            }
            match category {
                DataCategory::Weather => weather = Some(ttl as u64),
                DataCategory::Pollen => pollen = Some(ttl as u64),
            }
        }
        let table = Self {
            weather: weather.ok_or(ConfigError::MissingCategory(DataCategory::Weather))?,
            pollen: pollen.ok_or(ConfigError::MissingCategory(DataCategory::Pollen))?,
        };
        table.validate()?;
        Ok(table)
    }

    /// Applies a `category=seconds` override on top of the current table
    ///
    /// # Example
    ///
    /// ```
    /// use pollencast::config::{DataCategory, TtlTable};
    ///
    /// let mut table = TtlTable::default();
    /// table.apply_override("pollen=7200").unwrap();
    /// assert_eq!(table.ttl_for(DataCategory::Pollen), 7200);
    /// ```
    pub fn apply_override(&mut self, entry: &str) -> Result<(), ConfigError> {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedOverride(entry.to_string()))?;
        let category: DataCategory = name.parse()?;
        let invalid = || ConfigError::InvalidTtl {
            category: category.to_string(),
            value: value.trim().to_string(),
        };
        let ttl: i64 = value.trim().parse().map_err(|_| invalid())?;
        if ttl <= 0 {
            return Err(invalid());
        }
        *self.slot_mut(category) = ttl as u64;
        Ok(())
    }

    /// TTL for a category
    pub fn ttl_for(&self, category: DataCategory) -> u64 {
        match category {
            DataCategory::Weather => self.weather,
            DataCategory::Pollen => self.pollen,
        }
    }

    fn slot_mut(&mut self, category: DataCategory) -> &mut u64 {
        match category {
            DataCategory::Weather => &mut self.weather,
            DataCategory::Pollen => &mut self.pollen,
        }
    }

    /// Checks that every category has a positive TTL
    ///
    /// Only a deserialized table can hold a zero here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for category in DataCategory::ALL {
            if self.ttl_for(category) == 0 {
                return Err(ConfigError::InvalidTtl {
                    category: category.to_string(),
                    value: "0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Categories covered by this table, which is all of them
    pub fn categories(&self) -> impl Iterator<Item = DataCategory> {
        DataCategory::ALL.into_iter()
    }
}

/// Configuration for the cache manager, warmer, and fetcher
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL per data category
    pub ttl: TtlTable,
    /// Maximum number of warming records kept in history
    pub history_limit: usize,
    /// Location keys to pre-populate per category
    pub popular: BTreeMap<DataCategory, Vec<String>>,
    /// Directory for the on-disk layer, `None` for memory only
    pub cache_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let popular_locations: Vec<String> = crate::data::locations::popular_keys()
            .map(str::to_string)
            .collect();
        let mut popular = BTreeMap::new();
        for category in DataCategory::ALL {
            popular.insert(category, popular_locations.clone());
        }

        Self {
            ttl: TtlTable::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            popular,
            cache_dir: None,
        }
    }
}

impl CacheConfig {
    /// Validates the configuration at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ttl.validate()?;
        if self.history_limit == 0 {
            return Err(ConfigError::InvalidHistoryLimit);
        }
        Ok(())
    }

    /// Configured categories, in a stable order
    pub fn categories(&self) -> Vec<DataCategory> {
        self.ttl.categories().collect()
    }

    /// Popular location keys for a category
    pub fn popular_for(&self, category: DataCategory) -> &[String] {
        self.popular
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
