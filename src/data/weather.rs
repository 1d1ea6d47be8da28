//! Open-Meteo weather provider
//!
//! This module fetches current conditions and recent hourly history from the
//! Open-Meteo forecast API and parses them into `WeatherReport`s.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::provider::{Provider, ProviderError};
use super::{factors, get_location_by_key, Payload, TimeSeriesPoint, WeatherReport};
use crate::config::DataCategory;

/// Base URL for the Open-Meteo forecast API
const OPEN_METEO_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Plausible surface temperature range in Celsius
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = -90.0..=60.0;

/// Client for fetching weather data from the Open-Meteo API
#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Client,
    base_url: String,
    past_days: u8,
}

impl Default for WeatherProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl WeatherProvider {
    /// Create a new WeatherProvider with default settings
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Create a new WeatherProvider with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: OPEN_METEO_BASE_URL.to_string(),
            past_days: 2,
        }
    }

    /// Number of past days of hourly history to request
    pub fn with_past_days(mut self, past_days: u8) -> Self {
        self.past_days = past_days;
        self
    }

    /// Override the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_url(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}?latitude={}&longitude={}&current=temperature_2m,relative_humidity_2m,wind_speed_10m,precipitation&hourly=temperature_2m,relative_humidity_2m,wind_speed_10m,precipitation&past_days={}&forecast_days=1&timezone=UTC",
            self.base_url, latitude, longitude, self.past_days
        )
    }

    /// Parse the Open-Meteo API response into a WeatherReport
    fn parse_response(&self, response: OpenMeteoResponse) -> Result<WeatherReport, ProviderError> {
        let current = response.current;
        let hourly = match response.hourly {
            Some(hourly) => parse_hourly_data(&hourly)?,
            None => Vec::new(),
        };

        Ok(WeatherReport {
            temperature: current.temperature_2m,
            humidity: current.relative_humidity_2m,
            wind_speed: current.wind_speed_10m,
            precipitation: current.precipitation,
            fetched_at: Utc::now(),
            hourly,
        })
    }
}

#[async_trait]
impl Provider for WeatherProvider {
    fn category(&self) -> DataCategory {
        DataCategory::Weather
    }

    async fn fetch(&self, location_key: &str) -> Result<Payload, ProviderError> {
        let location = get_location_by_key(location_key)
            .ok_or_else(|| ProviderError::UnknownLocation(location_key.to_string()))?;
        let url = self.request_url(location.latitude, location.longitude);
        debug!(location_key, %url, "fetching weather");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let text = response.text().await?;
        let api_response: OpenMeteoResponse = serde_json::from_str(&text)?;

        self.parse_response(api_response).map(Payload::Weather)
    }

    fn validate(&self, payload: &Payload) -> bool {
        let Payload::Weather(report) = payload else {
            return false;
        };
        let values = [
            report.temperature,
            report.humidity,
            report.wind_speed,
            report.precipitation,
        ];
        values.iter().all(|v| v.is_finite())
            && TEMPERATURE_RANGE.contains(&report.temperature)
            && (0.0..=100.0).contains(&report.humidity)
            && report.wind_speed >= 0.0
            && report.precipitation >= 0.0
            && report.hourly.iter().all(|p| p.value.is_finite())
    }
}

/// Parse an Open-Meteo hourly timestamp (e.g., "2024-07-15T05:00") as UTC
pub(crate) fn parse_hour(time_str: &str) -> Result<DateTime<Utc>, ProviderError> {
    NaiveDateTime::parse_from_str(time_str, "%Y-%m-%dT%H:%M")
        .map(|naive| naive.and_utc())
        .map_err(|_| ProviderError::InvalidPayload(format!("Invalid time format: {}", time_str)))
}

/// Flatten hourly weather arrays into time-series points, skipping nulls
fn parse_hourly_data(hourly: &HourlyWeather) -> Result<Vec<TimeSeriesPoint>, ProviderError> {
    let len = hourly.time.len();
    let columns = [
        (factors::TEMPERATURE, &hourly.temperature_2m),
        (factors::HUMIDITY, &hourly.relative_humidity_2m),
        (factors::WIND_SPEED, &hourly.wind_speed_10m),
        (factors::PRECIPITATION, &hourly.precipitation),
    ];

    if columns.iter().any(|(_, values)| values.len() != len) {
        return Err(ProviderError::InvalidPayload(
            "hourly arrays have inconsistent lengths".to_string(),
        ));
    }

    let mut points = Vec::with_capacity(len * columns.len());
    for (i, time) in hourly.time.iter().enumerate() {
        let timestamp = parse_hour(time)?;
        for (factor, values) in &columns {
            if let Some(value) = values[i] {
                points.push(TimeSeriesPoint::new(timestamp, *factor, value));
            }
        }
    }
    Ok(points)
}

/// Open-Meteo API response structure
#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current: CurrentWeather,
    #[serde(default)]
    hourly: Option<HourlyWeather>,
}

/// Current weather data from Open-Meteo
#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    precipitation: f64,
}

/// Hourly weather data from Open-Meteo
#[derive(Debug, Deserialize)]
struct HourlyWeather {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    relative_humidity_2m: Vec<Option<f64>>,
    wind_speed_10m: Vec<Option<f64>>,
    precipitation: Vec<Option<f64>>,
}
