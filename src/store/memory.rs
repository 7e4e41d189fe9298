use crate::core::rate::RateObservation;
use crate::core::store::{RateStore, StoreError, ensure_positive};
use crate::core::subscription::{ConfigStore, SubscriberConfig, SubscriberId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

type SeriesKey = (String, String);

/// In-memory rate series, one sorted vector per `(source, currency)`.
#[derive(Default)]
pub struct MemoryRateStore {
    series: Mutex<HashMap<SeriesKey, Vec<RateObservation>>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(source: &str, currency_code: &str) -> SeriesKey {
    (source.to_string(), currency_code.to_string())
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn append(&self, observation: RateObservation) -> Result<RateObservation, StoreError> {
        ensure_positive(&observation)?;

        let mut series = self.series.lock().await;
        let entries = series
            .entry(key(&observation.source, &observation.currency_code))
            .or_default();
        // Insert after every entry with the same or an earlier timestamp
        let at = entries.partition_point(|o| o.observed_at <= observation.observed_at);
        entries.insert(at, observation.clone());
        debug!(source = %observation.source, currency = %observation.currency_code, "Stored observation");
        Ok(observation)
    }

    async fn latest(
        &self,
        source: &str,
        currency_code: &str,
    ) -> Result<Option<RateObservation>, StoreError> {
        let series = self.series.lock().await;
        Ok(series
            .get(&key(source, currency_code))
            .and_then(|entries| entries.last().cloned()))
    }

    async fn at_or_before(
        &self,
        source: &str,
        currency_code: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<RateObservation>, StoreError> {
        let series = self.series.lock().await;
        Ok(series.get(&key(source, currency_code)).and_then(|entries| {
            let end = entries.partition_point(|o| o.observed_at <= instant);
            end.checked_sub(1).map(|i| entries[i].clone())
        }))
    }

    async fn history(
        &self,
        source: &str,
        currency_code: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RateObservation>, StoreError> {
        let series = self.series.lock().await;
        Ok(series
            .get(&key(source, currency_code))
            .map(|entries| {
                let start = entries.partition_point(|o| o.observed_at < since);
                entries[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> usize {
        let mut series = self.series.lock().await;
        let mut removed = 0;
        series.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|o| o.observed_at >= older_than);
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    configs: Mutex<BTreeMap<SubscriberId, SubscriberConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self, id: &SubscriberId) -> Result<Option<SubscriberConfig>, StoreError> {
        Ok(self.configs.lock().await.get(id).cloned())
    }

    async fn save(&self, config: &SubscriberConfig) -> Result<(), StoreError> {
        self.configs
            .lock()
            .await
            .insert(config.subscriber_id.clone(), config.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SubscriberConfig>, StoreError> {
        Ok(self.configs.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_latest_and_ties() {
        let store = MemoryRateStore::new();
        store
            .append(RateObservation::new("mig.kz", "USD", dec!(470), at(10)))
            .await
            .unwrap();
        store
            .append(RateObservation::new("mig.kz", "USD", dec!(471), at(8)))
            .await
            .unwrap();
        store
            .append(RateObservation::new("mig.kz", "USD", dec!(472), at(10)))
            .await
            .unwrap();

        let latest = store.latest("mig.kz", "USD").await.unwrap().unwrap();
        assert_eq!(latest.value, dec!(472));
        assert!(store.latest("mig.kz", "EUR").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_at_or_before() {
        let store = MemoryRateStore::new();
        for (value, hour) in [(dec!(1), 2), (dec!(2), 6), (dec!(3), 12)] {
            store
                .append(RateObservation::new("s", "USD", value, at(hour)))
                .await
                .unwrap();
        }

        let found = store.at_or_before("s", "USD", at(7)).await.unwrap().unwrap();
        assert_eq!(found.value, dec!(2));
        let exact = store.at_or_before("s", "USD", at(6)).await.unwrap().unwrap();
        assert_eq!(exact.value, dec!(2));
        assert!(store.at_or_before("s", "USD", at(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_positive() {
        let store = MemoryRateStore::new();
        let err = store
            .append(RateObservation::new("s", "USD", dec!(0), at(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NonPositiveValue { .. }));
        assert!(store.latest("s", "USD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_removes_strictly_older() {
        let store = MemoryRateStore::new();
        for hour in [1, 2, 3] {
            store
                .append(RateObservation::new("s", "USD", dec!(1), at(hour)))
                .await
                .unwrap();
        }
        store
            .append(RateObservation::new("s", "EUR", dec!(1), at(1)))
            .await
            .unwrap();

        assert_eq!(store.prune(at(2)).await, 2);
        let remaining = store
            .history("s", "USD", at(0) - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].observed_at, at(2));
        assert!(store.latest("s", "EUR").await.unwrap().is_none());
    }
}
