//! Core data models for weather and pollen readings
//!
//! This module contains the payload types cached and served by the fetch
//! layer, the time-series points consumed by the correlation engine, and the
//! upstream providers that produce them.

pub mod locations;
pub mod pollen;
pub mod provider;
pub mod weather;

pub use locations::{all_locations, get_location_by_key};
pub use pollen::PollenProvider;
pub use provider::{Provider, ProviderError, RetryPolicy, Retrying};
pub use weather::WeatherProvider;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DataCategory;

/// Weather factor names used in time series
pub mod factors {
    pub const TEMPERATURE: &str = "temperature";
    pub const HUMIDITY: &str = "humidity";
    pub const WIND_SPEED: &str = "wind_speed";
    pub const PRECIPITATION: &str = "precipitation";
}

/// Pollen type names used in time series
pub mod pollen_types {
    pub const GRASS: &str = "grass";
    pub const TREE: &str = "tree";
    pub const WEED: &str = "weed";
}

/// A named place with coordinates, addressed by a `country:region:city` key
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    /// Unique key (e.g., "us:ny:nyc")
    pub key: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// Latitude coordinate
    pub latitude: f64,
    /// Longitude coordinate
    pub longitude: f64,
    /// Whether the location is pre-warmed at startup
    pub popular: bool,
}

/// One observation of a named factor at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub factor_name: String,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(timestamp: DateTime<Utc>, factor_name: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            factor_name: factor_name.into(),
            value,
        }
    }
}

/// Current weather plus recent hourly history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity percentage (0-100)
    pub humidity: f64,
    /// Wind speed in km/h
    pub wind_speed: f64,
    /// Precipitation in mm over the last hour
    pub precipitation: f64,
    /// When this data was fetched
    pub fetched_at: DateTime<Utc>,
    /// Hourly observations keyed by factor name
    #[serde(default)]
    pub hourly: Vec<TimeSeriesPoint>,
}

/// Current pollen concentrations (grains/m³) plus recent hourly history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollenReport {
    pub grass: f64,
    /// Alder, birch and olive combined
    pub tree: f64,
    /// Mugwort and ragweed combined
    pub weed: f64,
    /// When this data was fetched
    pub fetched_at: DateTime<Utc>,
    /// Hourly observations keyed by pollen type
    #[serde(default)]
    pub hourly: Vec<TimeSeriesPoint>,
}

/// A cached upstream payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum Payload {
    Weather(WeatherReport),
    Pollen(PollenReport),
}

impl Payload {
    pub fn category(&self) -> DataCategory {
        match self {
            Payload::Weather(_) => DataCategory::Weather,
            Payload::Pollen(_) => DataCategory::Pollen,
        }
    }

    /// Hourly history carried by the payload
    pub fn hourly(&self) -> &[TimeSeriesPoint] {
        match self {
            Payload::Weather(report) => &report.hourly,
            Payload::Pollen(report) => &report.hourly,
        }
    }

    /// Short one-line description for diagnostics
    pub fn summary(&self) -> String {
        match self {
            Payload::Weather(w) => format!(
                "weather temp={} humidity={} wind={} precip={} hourly={}",
                w.temperature,
                w.humidity,
                w.wind_speed,
                w.precipitation,
                w.hourly.len()
            ),
            Payload::Pollen(p) => format!(
                "pollen grass={} tree={} weed={} hourly={}",
                p.grass,
                p.tree,
                p.weed,
                p.hourly.len()
            ),
        }
    }
}
