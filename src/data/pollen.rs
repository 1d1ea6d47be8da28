//! Open-Meteo air-quality pollen provider
//!
//! Fetches pollen concentrations (grains/m³) from the Open-Meteo air-quality
//! API and folds the six reported species into grass, tree and weed totals.
//! Coverage is regional: outside it every species comes back as null, which
//! is reported as an invalid payload so the fetch layer falls back.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::provider::{Provider, ProviderError};
use super::weather::parse_hour;
use super::{get_location_by_key, pollen_types, Payload, PollenReport, TimeSeriesPoint};
use crate::config::DataCategory;

/// Base URL for the Open-Meteo air-quality API
const AIR_QUALITY_BASE_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

/// Species requested from the API
const POLLEN_FIELDS: &str =
    "alder_pollen,birch_pollen,grass_pollen,mugwort_pollen,olive_pollen,ragweed_pollen";

/// Client for fetching pollen data from the Open-Meteo air-quality API
#[derive(Debug, Clone)]
pub struct PollenProvider {
    client: Client,
    base_url: String,
    past_days: u8,
}

impl Default for PollenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PollenProvider {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: AIR_QUALITY_BASE_URL.to_string(),
            past_days: 2,
        }
    }

    pub fn with_past_days(mut self, past_days: u8) -> Self {
        self.past_days = past_days;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_url(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}?latitude={}&longitude={}&current={}&hourly={}&past_days={}&forecast_days=1&timezone=UTC",
            self.base_url, latitude, longitude, POLLEN_FIELDS, POLLEN_FIELDS, self.past_days
        )
    }

    fn parse_response(&self, response: AirQualityResponse) -> Result<PollenReport, ProviderError> {
        let current = response.current;
        let grass = current.grass_pollen;
        let tree = sum_present(&[current.alder_pollen, current.birch_pollen, current.olive_pollen]);
        let weed = sum_present(&[current.mugwort_pollen, current.ragweed_pollen]);

        if grass.is_none() && tree.is_none() && weed.is_none() {
            return Err(ProviderError::InvalidPayload(
                "no pollen coverage for location".to_string(),
            ));
        }

        let hourly = match response.hourly {
            Some(hourly) => parse_hourly_data(&hourly)?,
            None => Vec::new(),
        };

        Ok(PollenReport {
            grass: grass.unwrap_or(0.0),
            tree: tree.unwrap_or(0.0),
            weed: weed.unwrap_or(0.0),
            fetched_at: Utc::now(),
            hourly,
        })
    }
}

#[async_trait]
impl Provider for PollenProvider {
    fn category(&self) -> DataCategory {
        DataCategory::Pollen
    }

    async fn fetch(&self, location_key: &str) -> Result<Payload, ProviderError> {
        let location = get_location_by_key(location_key)
            .ok_or_else(|| ProviderError::UnknownLocation(location_key.to_string()))?;
        let url = self.request_url(location.latitude, location.longitude);
        debug!(location_key, %url, "fetching pollen");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let text = response.text().await?;
        let api_response: AirQualityResponse = serde_json::from_str(&text)?;

        self.parse_response(api_response).map(Payload::Pollen)
    }

    fn validate(&self, payload: &Payload) -> bool {
        let Payload::Pollen(report) = payload else {
            return false;
        };
        [report.grass, report.tree, report.weed]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
            && report.hourly.iter().all(|p| p.value.is_finite())
    }
}

/// Sum of the present values, `None` if every value is missing
fn sum_present(values: &[Option<f64>]) -> Option<f64> {
    values
        .iter()
        .flatten()
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Fold hourly species arrays into grass/tree/weed time-series points
fn parse_hourly_data(hourly: &HourlyPollen) -> Result<Vec<TimeSeriesPoint>, ProviderError> {
    let len = hourly.time.len();
    let species = [
        &hourly.alder_pollen,
        &hourly.birch_pollen,
        &hourly.grass_pollen,
        &hourly.mugwort_pollen,
        &hourly.olive_pollen,
        &hourly.ragweed_pollen,
    ];
    if species.iter().any(|values| values.len() != len) {
        return Err(ProviderError::InvalidPayload(
            "hourly arrays have inconsistent lengths".to_string(),
        ));
    }

    let mut points = Vec::with_capacity(len * 3);
    for (i, time) in hourly.time.iter().enumerate() {
        let timestamp = parse_hour(time)?;
        let totals = [
            (pollen_types::GRASS, hourly.grass_pollen[i]),
            (
                pollen_types::TREE,
                sum_present(&[hourly.alder_pollen[i], hourly.birch_pollen[i], hourly.olive_pollen[i]]),
            ),
            (
                pollen_types::WEED,
                sum_present(&[hourly.mugwort_pollen[i], hourly.ragweed_pollen[i]]),
            ),
        ];
        for (pollen_type, value) in totals {
            if let Some(value) = value {
                points.push(TimeSeriesPoint::new(timestamp, pollen_type, value));
            }
        }
    }
    Ok(points)
}

/// Open-Meteo air-quality response structure
#[derive(Debug, Deserialize)]
struct AirQualityResponse {
    current: CurrentPollen,
    #[serde(default)]
    hourly: Option<HourlyPollen>,
}

/// Current pollen readings; null outside coverage
#[derive(Debug, Deserialize)]
struct CurrentPollen {
    alder_pollen: Option<f64>,
    birch_pollen: Option<f64>,
    grass_pollen: Option<f64>,
    mugwort_pollen: Option<f64>,
    olive_pollen: Option<f64>,
    ragweed_pollen: Option<f64>,
}

/// Hourly pollen readings
#[derive(Debug, Deserialize)]
struct HourlyPollen {
    time: Vec<String>,
    alder_pollen: Vec<Option<f64>>,
    birch_pollen: Vec<Option<f64>>,
    grass_pollen: Vec<Option<f64>>,
    mugwort_pollen: Vec<Option<f64>>,
    olive_pollen: Vec<Option<f64>>,
    ragweed_pollen: Vec<Option<f64>>,
}
