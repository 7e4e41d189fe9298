//! Rate observations and the pluggable sources that produce them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One timestamped rate reading for a currency from a source.
///
/// Observations are immutable once written; only retention pruning removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateObservation {
    pub source: String,
    pub currency_code: String,
    pub value: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl RateObservation {
    pub fn new(
        source: impl Into<String>,
        currency_code: impl Into<String>,
        value: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            currency_code: currency_code.into(),
            value,
            observed_at,
        }
    }
}

/// A raw reading as returned by a [`RateSource`], before it is tagged with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObservation {
    pub currency_code: String,
    pub value: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl RawObservation {
    pub fn into_observation(self, source: &str) -> RateObservation {
        RateObservation::new(source, self.currency_code, self.value, self.observed_at)
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request error for {target}: {source}")]
    Http {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP error: {status} for {target}")]
    Status { status: u16, target: String },
    #[error("Failed to parse response for {target}: {reason}")]
    Parse { target: String, reason: String },
    #[error("No rates could be fetched from source: {0}")]
    Empty(String),
}

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Identifier stored on every observation produced by this source.
    fn id(&self) -> &str;

    async fn fetch_all(&self) -> Result<Vec<RawObservation>, FetchError>;
}
