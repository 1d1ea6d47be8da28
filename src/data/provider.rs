//! Upstream provider contract and retry wrapper
//!
//! A `Provider` fetches one data category for a location key and knows how to
//! sanity-check what it fetched. `Retrying` wraps any provider with bounded
//! exponential backoff so callers see a single failure once retries run out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::Payload;
use crate::config::DataCategory;

/// Errors that can occur when fetching from an upstream provider
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Provider could not be reached or returned an error status
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Provider answered with data that failed parsing or validation
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Location key is not known to the provider
    #[error("Unknown location: {0}")]
    UnknownLocation(String),
}

impl ProviderError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::InvalidPayload(e.to_string())
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::InvalidPayload(e.to_string())
    }
}

/// An upstream source for one data category
///
/// `fetch` must be idempotent and safe to retry.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The category this provider serves
    fn category(&self) -> DataCategory;

    /// Fetches the current payload for a location key
    async fn fetch(&self, location_key: &str) -> Result<Payload, ProviderError>;

    /// Schema and range check for a fetched payload
    fn validate(&self, payload: &Payload) -> bool;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn category(&self) -> DataCategory {
        (**self).category()
    }

    async fn fetch(&self, location_key: &str) -> Result<Payload, ProviderError> {
        (**self).fetch(location_key).await
    }

    fn validate(&self, payload: &Payload) -> bool {
        (**self).validate(payload)
    }
}

/// Bounded exponential backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Provider decorator that retries transient failures
#[derive(Debug, Clone)]
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: Provider> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: Provider> Provider for Retrying<P> {
    fn category(&self) -> DataCategory {
        self.inner.category()
    }

    async fn fetch(&self, location_key: &str) -> Result<Payload, ProviderError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.fetch(location_key).await {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    debug!(
                        category = %self.inner.category(),
                        location_key,
                        attempt,
                        ?delay,
                        error = %e,
                        "provider fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            category = %self.inner.category(),
                            location_key,
                            attempts = attempt,
                            error = %e,
                            "provider retries exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    fn validate(&self, payload: &Payload) -> bool {
        self.inner.validate(payload)
    }
}
