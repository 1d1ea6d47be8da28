//! Weather/pollen correlation engine
//!
//! Computes Pearson's r for every (weather factor, pollen type) pair over
//! index-aligned series, classifies the strength, and attaches a fixed
//! one-sentence explanation. The engine is a pure function of its inputs: it
//! holds no state, never caches, and never sorts its output. Callers that want
//! relevance ordering use [`rank_by_relevance`].
//!
//! Degenerate inputs (fewer than two usable points, zero variance, mismatched
//! lengths) yield r = 0 rather than NaN or a panic.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{factors, pollen_types, TimeSeriesPoint};

/// Named, index-aligned numeric series
pub type Series = BTreeMap<String, Vec<f64>>;

/// Strength band for |r|
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strength {
    Negligible,
    Weak,
    Moderate,
    Strong,
    #[serde(rename = "Very Strong")]
    VeryStrong,
}

impl Strength {
    /// Classifies the absolute value of a coefficient
    ///
    /// [0, 0.2) negligible, [0.2, 0.4) weak, [0.4, 0.6) moderate,
    /// [0.6, 0.8) strong, [0.8, 1.0] very strong.
    pub fn classify(coefficient: f64) -> Self {
        match coefficient.abs() {
            r if r >= 0.8 => Strength::VeryStrong,
            r if r >= 0.6 => Strength::Strong,
            r if r >= 0.4 => Strength::Moderate,
            r if r >= 0.2 => Strength::Weak,
            _ => Strength::Negligible,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Strength::Negligible => "Negligible",
            Strength::Weak => "Weak",
            Strength::Moderate => "Moderate",
            Strength::Strong => "Strong",
            Strength::VeryStrong => "Very Strong",
        }
    }
}

/// Sign of a coefficient, reported separately from its strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Positive,
    Negative,
    /// Exactly zero, including every degenerate input
    Neutral,
}

impl Direction {
    pub fn of(coefficient: f64) -> Self {
        if coefficient > 0.0 {
            Direction::Positive
        } else if coefficient < 0.0 {
            Direction::Negative
        } else {
            Direction::Neutral
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Positive => "positive",
            Direction::Negative => "negative",
            Direction::Neutral => "neutral",
        }
    }
}

/// Correlation between one weather factor and one pollen type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub weather_factor: String,
    pub pollen_type: String,
    /// Pearson's r in [-1, 1]
    pub coefficient: f64,
    pub strength: Strength,
    pub direction: Direction,
    /// Number of point pairs the coefficient was computed over
    pub sample_size: usize,
    pub explanation: String,
}

/// Stateless correlation calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationEngine;

impl CorrelationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Correlates every weather factor against every pollen type
    ///
    /// Results come back in (factor, pollen type) key order, not ranked.
    pub fn compute_all(&self, weather_series: &Series, pollen_series: &Series) -> Vec<CorrelationResult> {
        let mut results = Vec::with_capacity(weather_series.len() * pollen_series.len());
        for (factor, xs) in weather_series {
            for (pollen_type, ys) in pollen_series {
                results.push(self.compute_pair(factor, xs, pollen_type, ys));
            }
        }
        results
    }

    /// Correlates a single factor/pollen pair
    pub fn compute_pair(&self, factor: &str, xs: &[f64], pollen_type: &str, ys: &[f64]) -> CorrelationResult {
        let sample_size = usable_pairs(xs, ys);
        let coefficient = pearson(xs, ys);
        let strength = Strength::classify(coefficient);
        let direction = Direction::of(coefficient);

        CorrelationResult {
            weather_factor: factor.to_string(),
            pollen_type: pollen_type.to_string(),
            coefficient,
            strength,
            direction,
            sample_size,
            explanation: explain(factor, pollen_type, direction, strength),
        }
    }
}

/// Number of index pairs where both values are finite
fn usable_pairs(xs: &[f64], ys: &[f64]) -> usize {
    if xs.len() != ys.len() {
        return 0;
    }
    xs.iter()
        .zip(ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .count()
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[0] == pair[1])
}

/// Pearson's correlation coefficient over index-aligned values
///
/// Pairs with a non-finite value on either side are dropped. Returns 0 when
/// the lengths differ, fewer than two pairs remain, or either side has zero
/// variance.
///
/// ```
/// use pollencast::correlation::pearson;
///
/// let r = pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]);
/// assert!((r - 1.0).abs() < 1e-12);
/// assert_eq!(pearson(&[1.0, 1.0, 1.0], &[2.0, 4.0, 6.0]), 0.0);
/// ```
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() != ys.len() {
        debug!(x_len = xs.len(), y_len = ys.len(), "series lengths differ, reporting no correlation");
        return 0.0;
    }

    let (xs, ys): (Vec<f64>, Vec<f64>) = xs
        .iter()
        .zip(ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .unzip();

    if xs.len() < 2 || is_constant(&xs) || is_constant(&ys) {
        return 0.0;
    }

    // r is scale invariant; normalising keeps the squared sums finite
    let xs = scaled_to_unit(xs);
    let ys = scaled_to_unit(ys);

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs.iter().zip(&ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denominator = sxx.sqrt() * syy.sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    let r = sxy / denominator;
    if r.is_finite() {
        r.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn scaled_to_unit(values: Vec<f64>) -> Vec<f64> {
    let largest = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if largest == 0.0 {
        return values;
    }
    values.into_iter().map(|v| v / largest).collect()
}

/// Builds index-aligned weather and pollen series from raw points
///
/// Only timestamps present on both sides are kept, in ascending order. A
/// factor with no reading at a kept timestamp gets NaN there, which the
/// engine skips pairwise.
pub fn align_series(weather_points: &[TimeSeriesPoint], pollen_points: &[TimeSeriesPoint]) -> (Series, Series) {
    let weather = index_points(weather_points);
    let pollen = index_points(pollen_points);

    let weather_times: BTreeSet<DateTime<Utc>> =
        weather.values().flat_map(|by_time| by_time.keys().copied()).collect();
    let pollen_times: BTreeSet<DateTime<Utc>> =
        pollen.values().flat_map(|by_time| by_time.keys().copied()).collect();
    let shared: Vec<DateTime<Utc>> = weather_times.intersection(&pollen_times).copied().collect();

    let materialize = |indexed: BTreeMap<String, BTreeMap<DateTime<Utc>, f64>>| -> Series {
        indexed
            .into_iter()
            .map(|(name, by_time)| {
                let values = shared
                    .iter()
                    .map(|ts| by_time.get(ts).copied().unwrap_or(f64::NAN))
                    .collect();
                (name, values)
            })
            .collect()
    };

    (materialize(weather), materialize(pollen))
}

fn index_points(points: &[TimeSeriesPoint]) -> BTreeMap<String, BTreeMap<DateTime<Utc>, f64>> {
    let mut indexed: BTreeMap<String, BTreeMap<DateTime<Utc>, f64>> = BTreeMap::new();
    for point in points {
        indexed
            .entry(point.factor_name.clone())
            .or_default()
            .insert(point.timestamp, point.value);
    }
    indexed
}

/// Sorts results by |r| descending, ties broken by factor then pollen type
pub fn rank_by_relevance(results: &mut [CorrelationResult]) {
    results.sort_by(|a, b| {
        b.coefficient
            .abs()
            .total_cmp(&a.coefficient.abs())
            .then_with(|| a.weather_factor.cmp(&b.weather_factor))
            .then_with(|| a.pollen_type.cmp(&b.pollen_type))
    });
}

/// One-line insights for the most relevant non-negligible results
pub fn insights(results: &[CorrelationResult], limit: usize) -> Vec<String> {
    let mut ranked: Vec<CorrelationResult> = results
        .iter()
        .filter(|result| result.strength != Strength::Negligible)
        .cloned()
        .collect();
    rank_by_relevance(&mut ranked);

    ranked
        .iter()
        .take(limit)
        .map(|result| {
            format!(
                "{} {} correlation (r = {:.2}) between {} and {} pollen: {}",
                result.strength.label(),
                result.direction.label(),
                result.coefficient,
                factor_phrase(&result.weather_factor),
                result.pollen_type,
                result.explanation
            )
        })
        .collect()
}

/// Lower-case phrase for a factor name
fn factor_phrase(factor: &str) -> String {
    factor.replace('_', " ")
}

/// Capitalizes the first letter of a phrase
fn capitalize(phrase: &str) -> String {
    let mut chars = phrase.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Fixed explanation for a (factor, pollen type, direction) triple
pub fn explain(factor: &str, pollen_type: &str, direction: Direction, strength: Strength) -> String {
    if direction == Direction::Neutral || strength == Strength::Negligible {
        return format!(
            "{} shows no meaningful linear relationship with {} pollen over this period.",
            capitalize(&factor_phrase(factor)),
            pollen_type
        );
    }

    let positive = direction == Direction::Positive;
    match (factor, pollen_type, positive) {
        (factors::TEMPERATURE, pollen_types::TREE, true) => {
            "Trees pollinate early in the season and respond quickly to warm spells, so tree pollen climbs as temperatures rise.".to_string()
        }
        (factors::TEMPERATURE, pollen_types::WEED, false) => {
            "Weed pollen peaks in late-season conditions, so it tends to fall as temperatures rise.".to_string()
        }
        (factors::TEMPERATURE, _, true) => format!(
            "Warmer temperatures speed up flowering and pollen release, so {} pollen rises as it gets warmer.",
            pollen_type
        ),
        (factors::TEMPERATURE, _, false) => format!(
            "{} pollen falls as temperatures rise, which happens when heat ends flowering or dries out plants.",
            capitalize(pollen_type)
        ),
        (factors::HUMIDITY, _, true) => format!(
            "Humid air can swell and burst pollen grains into finer particles, so {} pollen rises with humidity.",
            pollen_type
        ),
        (factors::HUMIDITY, _, false) => format!(
            "Moist air makes pollen grains heavier and clump together, so {} pollen drops as humidity rises.",
            pollen_type
        ),
        (factors::WIND_SPEED, pollen_types::GRASS, true) => {
            "Grass pollen is light and released close to the ground, so wind lifts and disperses it widely on breezy days.".to_string()
        }
        (factors::WIND_SPEED, _, true) => format!(
            "Wind lifts pollen from plants and disperses it over wide areas, so {} pollen climbs on windier days.",
            pollen_type
        ),
        (factors::WIND_SPEED, _, false) => format!(
            "Stronger winds dilute {} pollen and carry it away from the area, lowering local concentrations.",
            pollen_type
        ),
        (factors::PRECIPITATION, _, true) => format!(
            "Rain can rupture pollen grains into smaller fragments around showers, so {} pollen rises with precipitation.",
            pollen_type
        ),
        (factors::PRECIPITATION, _, false) => format!(
            "Rain washes {} pollen out of the air, so concentrations drop when it rains.",
            pollen_type
        ),
        (_, _, true) => format!(
            "{} and {} pollen tend to rise and fall together over this period.",
            capitalize(&factor_phrase(factor)),
            pollen_type
        ),
        (_, _, false) => format!(
            "{} pollen tends to fall when {} rises over this period.",
            capitalize(pollen_type),
            factor_phrase(factor)
        ),
    }
}
