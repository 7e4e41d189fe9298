//! Threshold evaluation and daily digest generation over all enabled subscribers.

use crate::core::change::{percent_change, should_notify};
use crate::core::dispatch::Outgoing;
use crate::core::rate::RateObservation;
use crate::core::store::{RateStore, StoreError};
use crate::core::subscription::{SubscriberConfig, SubscriberId, SubscriptionRegistry};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// A threshold crossing for one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub subscriber_id: SubscriberId,
    pub currency_code: String,
    pub source: String,
    pub change_percent: Decimal,
    pub threshold_percent: Decimal,
    pub current_value: Decimal,
    /// Length of the comparison window.
    pub window_hours: i64,
    pub triggered_at: DateTime<Utc>,
}

/// Unconditional daily summary for one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestEvent {
    pub subscriber_id: SubscriberId,
    pub currency_code: String,
    pub source: String,
    pub current: Option<RateObservation>,
    /// `None` when there is no baseline to compare against.
    pub change_percent: Option<Decimal>,
    pub window_hours: i64,
    pub generated_at: DateTime<Utc>,
}

/// Result of one pass over the enabled subscribers.
#[derive(Debug)]
pub struct PassOutcome<E> {
    pub events: Vec<E>,
    pub evaluated: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct NotificationEngine {
    store: Arc<dyn RateStore>,
    registry: Arc<dyn SubscriptionRegistry>,
    window: Duration,
}

struct Reading {
    current: Option<RateObservation>,
    past: Option<RateObservation>,
    change: Decimal,
}

impl NotificationEngine {
    pub fn new(
        store: Arc<dyn RateStore>,
        registry: Arc<dyn SubscriptionRegistry>,
        window: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            window,
        }
    }

    pub async fn evaluate(&self) -> PassOutcome<NotificationEvent> {
        self.evaluate_at(Utc::now()).await
    }

    /// Emits an event for every enabled subscriber whose change reaches their threshold.
    #[instrument(name = "EvaluationPass", skip(self))]
    pub async fn evaluate_at(&self, now: DateTime<Utc>) -> PassOutcome<NotificationEvent> {
        self.pass(now, |config, reading| {
            let current = reading.current?;
            if !should_notify(reading.change, config.threshold_percent) {
                return None;
            }
            Some(NotificationEvent {
                subscriber_id: config.subscriber_id.clone(),
                currency_code: config.currency_code.clone(),
                source: config.source.clone(),
                change_percent: reading.change,
                threshold_percent: config.threshold_percent,
                current_value: current.value,
                window_hours: self.window.num_hours(),
                triggered_at: now,
            })
        })
        .await
    }

    pub async fn digest(&self) -> PassOutcome<DigestEvent> {
        self.digest_at(Utc::now()).await
    }

    /// Emits a digest for every enabled subscriber regardless of threshold.
    #[instrument(name = "DigestPass", skip(self))]
    pub async fn digest_at(&self, now: DateTime<Utc>) -> PassOutcome<DigestEvent> {
        self.pass(now, |config, reading| {
            let change_percent = match (&reading.current, &reading.past) {
                (Some(_), Some(_)) => Some(reading.change),
                _ => None,
            };
            Some(DigestEvent {
                subscriber_id: config.subscriber_id.clone(),
                currency_code: config.currency_code.clone(),
                source: config.source.clone(),
                current: reading.current,
                change_percent,
                window_hours: self.window.num_hours(),
                generated_at: now,
            })
        })
        .await
    }

    async fn pass<E>(
        &self,
        now: DateTime<Utc>,
        build: impl Fn(&SubscriberConfig, Reading) -> Option<E>,
    ) -> PassOutcome<E> {
        let mut outcome = PassOutcome {
            events: Vec::new(),
            evaluated: 0,
            skipped: 0,
            failed: 0,
        };

        let configs = match self.registry.list_enabled().await {
            Ok(configs) => configs,
            Err(e) => {
                error!(error = %e, "Failed to list enabled subscribers");
                outcome.failed += 1;
                return outcome;
            }
        };

        for config in configs {
            if !config.is_evaluable() {
                warn!(subscriber = %config.subscriber_id, "Skipping subscriber with unusable settings");
                outcome.skipped += 1;
                continue;
            }

            match self.read(&config, now).await {
                Ok(reading) => {
                    outcome.evaluated += 1;
                    if let Some(event) = build(&config, reading) {
                        outcome.events.push(event);
                    }
                }
                Err(e) => {
                    error!(
                        subscriber = %config.subscriber_id,
                        currency = %config.currency_code,
                        source = %config.source,
                        error = %e,
                        "Failed to evaluate subscriber"
                    );
                    outcome.failed += 1;
                }
            }
        }

        info!(
            evaluated = outcome.evaluated,
            emitted = outcome.events.len(),
            skipped = outcome.skipped,
            failed = outcome.failed,
            "Pass complete"
        );
        outcome
    }

    async fn read(&self, config: &SubscriberConfig, now: DateTime<Utc>) -> Result<Reading, StoreError> {
        let current = self
            .store
            .latest(&config.source, &config.currency_code)
            .await?;
        let past = self
            .store
            .at_or_before(&config.source, &config.currency_code, now - self.window)
            .await?;

        if current.is_some() && past.is_none() {
            debug!(
                currency = %config.currency_code,
                source = %config.source,
                "No baseline observation in window, reporting no change"
            );
        }

        let change = percent_change(current.as_ref(), past.as_ref());
        Ok(Reading {
            current,
            past,
            change,
        })
    }
}

fn display_value(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

impl Outgoing for NotificationEvent {
    fn recipient(&self) -> &SubscriberId {
        &self.subscriber_id
    }

    fn render(&self) -> String {
        let direction = if self.change_percent > Decimal::ZERO {
            "📈 rose"
        } else {
            "📉 fell"
        };
        format!(
            "🚨 Exchange rate alert!\n\n\
             {currency} {direction} by {change:.2}% over the last {hours} hours.\n\n\
             Current rate: {value}\n\
             Source: {source}\n\n\
             Notification threshold: {threshold}%",
            currency = self.currency_code,
            change = self.change_percent.abs(),
            hours = self.window_hours,
            value = display_value(self.current_value),
            source = self.source,
            threshold = self.threshold_percent.normalize(),
        )
    }
}

impl Outgoing for DigestEvent {
    fn recipient(&self) -> &SubscriberId {
        &self.subscriber_id
    }

    fn render(&self) -> String {
        let Some(current) = &self.current else {
            return format!(
                "❌ Could not get the current {} rate from {}.",
                self.currency_code, self.source
            );
        };

        let change = match self.change_percent {
            Some(change) if change > Decimal::ZERO => format!("📈 {change:.2}%"),
            Some(change) => format!("📉 {change:.2}%"),
            None => "No data for comparison".to_string(),
        };

        format!(
            "📊 Daily {currency} rate report\n\n\
             Current rate: {value:.2}\n\
             {hours}h change: {change}\n\
             Source: {source}\n\
             Updated: {updated}",
            currency = self.currency_code,
            value = current.value,
            hours = self.window_hours,
            source = self.source,
            updated = current.observed_at.format("%Y-%m-%d %H:%M UTC"),
        )
    }
}
