//! Subscriber notification settings and the registry the pipeline reads them from.

use crate::core::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Lowest accepted threshold, 0.1%.
pub fn min_threshold() -> Decimal {
    Decimal::new(1, 1)
}

/// Highest accepted threshold, 50%.
pub fn max_threshold() -> Decimal {
    Decimal::new(50, 0)
}

/// Opaque identifier of a subscriber on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    pub subscriber_id: SubscriberId,
    pub currency_code: String,
    pub source: String,
    pub threshold_percent: Decimal,
    pub notify_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl SubscriberConfig {
    /// Whether the pipeline can act on this config at all.
    ///
    /// Only structural sanity is checked here; allow-lists are enforced when
    /// the config is written.
    pub fn is_evaluable(&self) -> bool {
        !self.subscriber_id.as_str().is_empty()
            && !self.currency_code.is_empty()
            && !self.source.is_empty()
            && self.threshold_percent >= min_threshold()
            && self.threshold_percent <= max_threshold()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Threshold must be between 0.1% and 50%, got {0}%")]
    ThresholdOutOfRange(Decimal),
    #[error("Unsupported currency: {value}. Supported currencies: {}", .accepted.join(", "))]
    UnsupportedCurrency { value: String, accepted: Vec<String> },
    #[error("Unsupported source: {value}. Supported sources: {}", .accepted.join(", "))]
    UnsupportedSource { value: String, accepted: Vec<String> },
    #[error("Subscriber {0} is not registered")]
    UnknownSubscriber(SubscriberId),
}

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read contract consumed by the notification pipeline.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// Enabled configs ordered by subscriber id.
    async fn list_enabled(&self) -> Result<Vec<SubscriberConfig>, StoreError>;

    async fn get(&self, id: &SubscriberId) -> Result<Option<SubscriberConfig>, StoreError>;
}

/// Persistence behind the registry.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self, id: &SubscriberId) -> Result<Option<SubscriberConfig>, StoreError>;

    async fn save(&self, config: &SubscriberConfig) -> Result<(), StoreError>;

    /// Every stored config. Entries that cannot be decoded are skipped.
    async fn list(&self) -> Result<Vec<SubscriberConfig>, StoreError>;
}

/// Accepted values and defaults for subscriber settings.
#[derive(Debug, Clone)]
pub struct SubscriptionPolicy {
    pub currencies: Vec<String>,
    pub sources: Vec<String>,
    pub default_currency: String,
    pub default_source: String,
    pub default_threshold: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStats {
    pub total: usize,
    pub active_notifications: usize,
    pub most_used_currency: Option<String>,
    pub most_used_source: Option<String>,
}

/// Validated subscriber management on top of a [`ConfigStore`].
#[derive(Clone)]
pub struct Subscriptions {
    store: Arc<dyn ConfigStore>,
    policy: SubscriptionPolicy,
}

impl Subscriptions {
    pub fn new(store: Arc<dyn ConfigStore>, policy: SubscriptionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &SubscriptionPolicy {
        &self.policy
    }

    /// Registers a subscriber with default settings. Existing subscribers are left untouched.
    pub async fn register(&self, id: &SubscriberId) -> Result<SubscriberConfig, SubscriptionError> {
        if let Some(existing) = self.store.load(id).await? {
            debug!(subscriber = %id, "Subscriber already registered");
            return Ok(existing);
        }

        let config = SubscriberConfig {
            subscriber_id: id.clone(),
            currency_code: self.policy.default_currency.clone(),
            source: self.policy.default_source.clone(),
            threshold_percent: self.policy.default_threshold,
            notify_enabled: true,
            updated_at: Utc::now(),
        };
        self.store.save(&config).await?;
        info!(subscriber = %id, "Registered subscriber");
        Ok(config)
    }

    pub async fn set_threshold(
        &self,
        id: &SubscriberId,
        threshold: Decimal,
    ) -> Result<SubscriberConfig, SubscriptionError> {
        if threshold < min_threshold() || threshold > max_threshold() {
            return Err(ValidationError::ThresholdOutOfRange(threshold).into());
        }
        self.update(id, |config| config.threshold_percent = threshold)
            .await
    }

    pub async fn set_currency(
        &self,
        id: &SubscriberId,
        currency: &str,
    ) -> Result<SubscriberConfig, SubscriptionError> {
        let currency = currency.trim().to_uppercase();
        if !self.policy.currencies.iter().any(|c| *c == currency) {
            return Err(ValidationError::UnsupportedCurrency {
                value: currency,
                accepted: self.policy.currencies.clone(),
            }
            .into());
        }
        self.update(id, |config| config.currency_code = currency)
            .await
    }

    pub async fn set_source(
        &self,
        id: &SubscriberId,
        source: &str,
    ) -> Result<SubscriberConfig, SubscriptionError> {
        let source = source.trim();
        if !self.policy.sources.iter().any(|s| s == source) {
            return Err(ValidationError::UnsupportedSource {
                value: source.to_string(),
                accepted: self.policy.sources.clone(),
            }
            .into());
        }
        let source = source.to_string();
        self.update(id, |config| config.source = source).await
    }

    pub async fn enable(&self, id: &SubscriberId) -> Result<SubscriberConfig, SubscriptionError> {
        self.update(id, |config| config.notify_enabled = true).await
    }

    pub async fn disable(&self, id: &SubscriberId) -> Result<SubscriberConfig, SubscriptionError> {
        self.update(id, |config| config.notify_enabled = false)
            .await
    }

    /// All subscribers, enabled or not, ordered by id.
    pub async fn list_all(&self) -> Result<Vec<SubscriberConfig>, StoreError> {
        let mut configs = self.store.list().await?;
        configs.sort_by(|a, b| a.subscriber_id.cmp(&b.subscriber_id));
        Ok(configs)
    }

    pub async fn stats(&self) -> Result<SubscriberStats, StoreError> {
        let configs = self.store.list().await?;

        let mut currencies: BTreeMap<&str, usize> = BTreeMap::new();
        let mut sources: BTreeMap<&str, usize> = BTreeMap::new();
        for config in &configs {
            *currencies.entry(&config.currency_code).or_default() += 1;
            *sources.entry(&config.source).or_default() += 1;
        }

        Ok(SubscriberStats {
            total: configs.len(),
            active_notifications: configs.iter().filter(|c| c.notify_enabled).count(),
            most_used_currency: most_used(currencies),
            most_used_source: most_used(sources),
        })
    }

    async fn update(
        &self,
        id: &SubscriberId,
        apply: impl FnOnce(&mut SubscriberConfig),
    ) -> Result<SubscriberConfig, SubscriptionError> {
        let mut config = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| ValidationError::UnknownSubscriber(id.clone()))?;
        apply(&mut config);
        config.updated_at = Utc::now();
        self.store.save(&config).await?;
        debug!(subscriber = %id, "Updated subscriber settings");
        Ok(config)
    }
}

// Ties go to the alphabetically first key.
fn most_used(counts: BTreeMap<&str, usize>) -> Option<String> {
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(key, _)| key.to_string())
}

#[async_trait]
impl SubscriptionRegistry for Subscriptions {
    async fn list_enabled(&self) -> Result<Vec<SubscriberConfig>, StoreError> {
        let mut configs: Vec<SubscriberConfig> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|c| c.notify_enabled)
            .collect();
        configs.sort_by(|a, b| a.subscriber_id.cmp(&b.subscriber_id));
        Ok(configs)
    }

    async fn get(&self, id: &SubscriberId) -> Result<Option<SubscriberConfig>, StoreError> {
        self.store.load(id).await
    }
}
