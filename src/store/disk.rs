use crate::core::rate::RateObservation;
use crate::core::store::{RateStore, StoreError, ensure_positive};
use crate::core::subscription::{ConfigStore, SubscriberConfig, SubscriberId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::PartitionHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

const SEPARATOR: u8 = 0;
const INSTANT_LEN: usize = 12;
const SUFFIX_LEN: usize = INSTANT_LEN + 8;

/// Prefix shared by every key of one `(source, currency)` series.
fn series_prefix(source: &str, currency_code: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(source.len() + currency_code.len() + 2 + SUFFIX_LEN);
    key.extend_from_slice(source.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(currency_code.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Epoch seconds with the sign bit flipped, then subsecond nanos, so that byte
/// order matches time order at full precision.
fn ordered_instant(instant: DateTime<Utc>) -> [u8; INSTANT_LEN] {
    let mut bytes = [0; INSTANT_LEN];
    bytes[..8].copy_from_slice(&((instant.timestamp() as u64) ^ (1 << 63)).to_be_bytes());
    bytes[8..].copy_from_slice(&instant.timestamp_subsec_nanos().to_be_bytes());
    bytes
}

/// `(seconds, nanos)` of the observation a key was written for.
fn instant_from_key(key: &[u8]) -> Option<(i64, u32)> {
    let start = key.len().checked_sub(SUFFIX_LEN)?;
    let secs: [u8; 8] = key[start..start + 8].try_into().ok()?;
    let nanos: [u8; 4] = key[start + 8..start + INSTANT_LEN].try_into().ok()?;
    Some((
        (u64::from_be_bytes(secs) ^ (1 << 63)) as i64,
        u32::from_be_bytes(nanos),
    ))
}

fn seq_from_key(key: &[u8]) -> Option<u64> {
    let start = key.len().checked_sub(8)?;
    let bytes: [u8; 8] = key[start..].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn bound(prefix: &[u8], instant: DateTime<Utc>, seq: u64) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&ordered_instant(instant));
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn series_end(prefix: &[u8]) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&[0xFF; SUFFIX_LEN]);
    key
}

fn decode(value: &[u8]) -> Result<RateObservation, StoreError> {
    serde_json::from_slice(value).map_err(|e| StoreError::ReadFailed(e.to_string()))
}

fn read_err(e: fjall::Error) -> StoreError {
    StoreError::ReadFailed(e.to_string())
}

/// Rate series persisted in a fjall partition.
///
/// Keys are `source \0 currency \0 observed_at seq`, all numbers big-endian,
/// so a prefix scan yields one series in time order and `seq` keeps equal
/// timestamps in insertion order.
pub struct FjallRateStore {
    partition: PartitionHandle,
    seq: AtomicU64,
}

impl FjallRateStore {
    pub fn new(partition: PartitionHandle) -> Result<Self, StoreError> {
        let mut next = 0;
        for item in partition.iter() {
            let (key, _) = item.map_err(read_err)?;
            if let Some(seq) = seq_from_key(&key) {
                next = next.max(seq + 1);
            }
        }
        debug!(next_seq = next, "Opened rate partition");
        Ok(Self {
            partition,
            seq: AtomicU64::new(next),
        })
    }
}

#[async_trait]
impl RateStore for FjallRateStore {
    async fn append(&self, observation: RateObservation) -> Result<RateObservation, StoreError> {
        ensure_positive(&observation)?;

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = bound(
            &series_prefix(&observation.source, &observation.currency_code),
            observation.observed_at,
            seq,
        );
        let value =
            serde_json::to_vec(&observation).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        self.partition
            .insert(key, value)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Ok(observation)
    }

    async fn latest(
        &self,
        source: &str,
        currency_code: &str,
    ) -> Result<Option<RateObservation>, StoreError> {
        match self.partition.prefix(series_prefix(source, currency_code)).next_back() {
            Some(item) => {
                let (_, value) = item.map_err(read_err)?;
                decode(&value).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn at_or_before(
        &self,
        source: &str,
        currency_code: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<RateObservation>, StoreError> {
        let prefix = series_prefix(source, currency_code);
        let upper = bound(&prefix, instant, u64::MAX);
        match self.partition.range(prefix..=upper).next_back() {
            Some(item) => {
                let (_, value) = item.map_err(read_err)?;
                decode(&value).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn history(
        &self,
        source: &str,
        currency_code: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RateObservation>, StoreError> {
        let prefix = series_prefix(source, currency_code);
        let lower = bound(&prefix, since, 0);
        self.partition
            .range(lower..=series_end(&prefix))
            .map(|item| {
                let (_, value) = item.map_err(read_err)?;
                decode(&value)
            })
            .collect()
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> usize {
        let cutoff = (older_than.timestamp(), older_than.timestamp_subsec_nanos());
        let mut stale = Vec::new();
        for item in self.partition.iter() {
            match item {
                Ok((key, _)) => {
                    if instant_from_key(&key).is_some_and(|instant| instant < cutoff) {
                        stale.push(key);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to scan rates for pruning");
                    return 0;
                }
            }
        }

        let mut removed = 0;
        for key in stale {
            match self.partition.remove(key) {
                Ok(()) => removed += 1,
                Err(e) => error!(error = %e, "Failed to prune observation"),
            }
        }
        removed
    }
}

/// Subscriber configs keyed by subscriber id, stored as JSON.
pub struct FjallConfigStore {
    partition: PartitionHandle,
}

impl FjallConfigStore {
    pub fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }
}

#[async_trait]
impl ConfigStore for FjallConfigStore {
    async fn load(&self, id: &SubscriberId) -> Result<Option<SubscriberConfig>, StoreError> {
        match self.partition.get(id.as_str()).map_err(read_err)? {
            Some(value) => serde_json::from_slice(&value)
                .map(Some)
                .map_err(|e| StoreError::ReadFailed(e.to_string())),
            None => Ok(None),
        }
    }

    async fn save(&self, config: &SubscriberConfig) -> Result<(), StoreError> {
        let value =
            serde_json::to_vec(config).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        self.partition
            .insert(config.subscriber_id.as_str(), value)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<SubscriberConfig>, StoreError> {
        let mut configs = Vec::new();
        for item in self.partition.iter() {
            let (key, value) = item.map_err(read_err)?;
            match serde_json::from_slice::<SubscriberConfig>(&value) {
                Ok(config) => configs.push(config),
                Err(e) => warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping undecodable subscriber config"
                ),
            }
        }
        Ok(configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fjall::PartitionCreateOptions;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn open(path: &std::path::Path, name: &str) -> PartitionHandle {
        let keyspace = fjall::Config::new(path).open().unwrap();
        keyspace
            .open_partition(name, PartitionCreateOptions::default())
            .unwrap()
    }

    #[test]
    fn test_key_order_matches_time_order() {
        let before_epoch = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        assert!(ordered_instant(before_epoch) < ordered_instant(at(0)));
        assert!(ordered_instant(at(0)) < ordered_instant(at(0) + Duration::nanoseconds(1)));
        assert!(ordered_instant(at(0) + Duration::nanoseconds(999_999_999)) < ordered_instant(at(0) + Duration::seconds(1)));
        assert!(ordered_instant(at(0)) < ordered_instant(at(1)));

        let just_before_epoch = Utc.timestamp_opt(-1, 500).unwrap();
        let key = bound(&series_prefix("s", "USD"), just_before_epoch, 7);
        assert_eq!(instant_from_key(&key), Some((-1, 500)));
        assert_eq!(seq_from_key(&key), Some(7));
    }

    #[tokio::test]
    async fn test_series_queries() {
        let dir = tempdir().unwrap();
        let store = FjallRateStore::new(open(dir.path(), "rates")).unwrap();

        for (value, hour) in [(dec!(100), 12), (dec!(99), 2), (dec!(101), 6), (dec!(102), 12)] {
            store
                .append(RateObservation::new("mig.kz", "USD", value, at(hour)))
                .await
                .unwrap();
        }
        // A longer currency code sharing a prefix must not leak into USD
        store
            .append(RateObservation::new("mig.kz", "USDT", dec!(1), at(23)))
            .await
            .unwrap();

        let latest = store.latest("mig.kz", "USD").await.unwrap().unwrap();
        assert_eq!(latest.value, dec!(102));

        let past = store.at_or_before("mig.kz", "USD", at(7)).await.unwrap().unwrap();
        assert_eq!(past.value, dec!(101));
        assert!(store.at_or_before("mig.kz", "USD", at(1)).await.unwrap().is_none());

        let values: Vec<_> = store
            .history("mig.kz", "USD", at(6))
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.value)
            .collect();
        assert_eq!(values, vec![dec!(101), dec!(100), dec!(102)]);
    }

    #[tokio::test]
    async fn test_sequence_seeded_from_existing_keys() {
        let dir = tempdir().unwrap();
        let partition = open(dir.path(), "rates");
        let first = FjallRateStore::new(partition.clone()).unwrap();
        first
            .append(RateObservation::new("s", "USD", dec!(1), at(5)))
            .await
            .unwrap();

        let second = FjallRateStore::new(partition).unwrap();
        second
            .append(RateObservation::new("s", "USD", dec!(2), at(5)))
            .await
            .unwrap();
        let latest = second.latest("s", "USD").await.unwrap().unwrap();
        assert_eq!(latest.value, dec!(2));
    }

    #[tokio::test]
    async fn test_prune() {
        let dir = tempdir().unwrap();
        let store = FjallRateStore::new(open(dir.path(), "rates")).unwrap();
        for hour in [1, 2, 3] {
            store
                .append(RateObservation::new("s", "EUR", dec!(1), at(hour)))
                .await
                .unwrap();
        }

        assert_eq!(store.prune(at(2)).await, 1);
        let remaining = store
            .history("s", "EUR", at(0) - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn test_sub_millisecond_boundaries() {
        let dir = tempdir().unwrap();
        let store = FjallRateStore::new(open(dir.path(), "rates")).unwrap();
        let t = at(0);
        store
            .append(RateObservation::new("s", "USD", dec!(1), t + Duration::microseconds(100)))
            .await
            .unwrap();

        assert!(store.at_or_before("s", "USD", t).await.unwrap().is_none());
        let found = store
            .at_or_before("s", "USD", t + Duration::microseconds(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.observed_at, t + Duration::microseconds(100));

        assert!(store.history("s", "USD", t + Duration::microseconds(101)).await.unwrap().is_empty());

        assert_eq!(store.prune(t + Duration::microseconds(100)).await, 0);
        assert_eq!(store.prune(t + Duration::microseconds(500)).await, 1);
        assert!(store.latest("s", "USD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_config_store_skips_garbage() {
        let dir = tempdir().unwrap();
        let partition = open(dir.path(), "subscribers");
        partition.insert("broken", b"not json").unwrap();
        let store = FjallConfigStore::new(partition);

        let config = SubscriberConfig {
            subscriber_id: SubscriberId::from("42"),
            currency_code: "EUR".to_string(),
            source: "mig.kz".to_string(),
            threshold_percent: dec!(2.5),
            notify_enabled: true,
            updated_at: at(3),
        };
        store.save(&config).await.unwrap();

        assert_eq!(store.load(&SubscriberId::from("42")).await.unwrap(), Some(config.clone()));
        assert!(store.load(&SubscriberId::from("7")).await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap(), vec![config]);
    }
}
