//! Storage abstractions for rate observations.

use crate::core::rate::RateObservation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to write observation: {0}")]
    WriteFailed(String),
    #[error("Failed to read observations: {0}")]
    ReadFailed(String),
    #[error("Rejected observation for {currency_code} from {source_id}: value must be positive")]
    NonPositiveValue {
        source_id: String,
        currency_code: String,
    },
}

/// Append-only time-series repository of rate observations.
///
/// Observations for a `(source, currency)` pair are always read back in
/// non-decreasing `observed_at` order; ties keep insertion order.
#[async_trait]
pub trait RateStore: Send + Sync {
    async fn append(&self, observation: RateObservation) -> Result<RateObservation, StoreError>;

    /// Most recent observation; on equal timestamps the last inserted wins.
    async fn latest(
        &self,
        source: &str,
        currency_code: &str,
    ) -> Result<Option<RateObservation>, StoreError>;

    /// Closest observation with `observed_at <= instant`.
    async fn at_or_before(
        &self,
        source: &str,
        currency_code: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<RateObservation>, StoreError>;

    /// All observations with `observed_at >= since`, oldest first.
    async fn history(
        &self,
        source: &str,
        currency_code: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RateObservation>, StoreError>;

    /// Deletes every observation strictly older than `older_than`.
    ///
    /// Housekeeping never fails the caller: errors are logged and reported as 0.
    async fn prune(&self, older_than: DateTime<Utc>) -> usize;
}

pub(crate) fn ensure_positive(observation: &RateObservation) -> Result<(), StoreError> {
    if observation.value.is_sign_positive() && !observation.value.is_zero() {
        Ok(())
    } else {
        Err(StoreError::NonPositiveValue {
            source_id: observation.source.clone(),
            currency_code: observation.currency_code.clone(),
        })
    }
}
