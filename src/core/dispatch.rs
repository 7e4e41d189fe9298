//! Delivery of rendered notifications to the chat transport.

use crate::core::limiter::RecipientLimiter;
use crate::core::subscription::SubscriberId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Network failure, timeout or server-side throttling; worth retrying.
    #[error("Transient transport failure: {0}")]
    Transient(String),
    /// The recipient cannot be reached (unknown chat, bot blocked, ...).
    #[error("Permanent transport failure: {0}")]
    Permanent(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliverError {
    #[error("Delivery to {recipient} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        recipient: SubscriberId,
        attempts: u32,
        last_error: String,
    },
    #[error("Delivery to {recipient} rejected: {reason}")]
    Permanent {
        recipient: SubscriberId,
        reason: String,
    },
    #[error("Delivery to {recipient} throttled by rate limit")]
    Throttled { recipient: SubscriberId },
}

/// The chat platform's "send message to subscriber" operation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, recipient: &SubscriberId, text: &str) -> Result<(), TransportError>;
}

/// Anything that can be rendered into a message for one recipient.
pub trait Outgoing: Send + Sync {
    fn recipient(&self) -> &SubscriberId;
    fn render(&self) -> String;
}

/// A pre-rendered message.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub recipient: SubscriberId,
    pub text: String,
}

impl Outgoing for TextMessage {
    fn recipient(&self) -> &SubscriberId {
        &self.recipient
    }

    fn render(&self) -> String {
        self.text.clone()
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Initial backoff, doubled after each failed attempt.
    pub backoff: Duration,
    /// Pause between consecutive messages of a batch.
    pub batch_pause: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
            batch_pause: Duration::from_millis(100),
        }
    }
}

impl DeliveryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub throttled: usize,
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    policy: DeliveryPolicy,
    limiter: Option<RecipientLimiter<SubscriberId>>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, policy: DeliveryPolicy) -> Self {
        Self {
            transport,
            policy,
            limiter: None,
        }
    }

    pub fn with_limiter(mut self, limiter: RecipientLimiter<SubscriberId>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Sends one message, retrying transient failures with exponential backoff.
    pub async fn deliver<M: Outgoing + ?Sized>(&self, message: &M) -> Result<(), DeliverError> {
        let recipient = message.recipient();
        if let Some(limiter) = &self.limiter {
            if !limiter.try_acquire(recipient) {
                return Err(DeliverError::Throttled {
                    recipient: recipient.clone(),
                });
            }
        }

        let text = message.render();
        let mut attempt = 1;
        loop {
            match self.transport.send_message(recipient, &text).await {
                Ok(()) => {
                    debug!(recipient = %recipient, attempt, "Message delivered");
                    return Ok(());
                }
                Err(TransportError::Permanent(reason)) => {
                    return Err(DeliverError::Permanent {
                        recipient: recipient.clone(),
                        reason,
                    });
                }
                Err(TransportError::Transient(reason)) => {
                    if attempt > self.policy.max_retries {
                        return Err(DeliverError::Exhausted {
                            recipient: recipient.clone(),
                            attempts: attempt,
                            last_error: reason,
                        });
                    }
                    let delay = self.policy.delay(attempt);
                    debug!(
                        recipient = %recipient,
                        "Attempt {}/{} failed: {}. Retrying in {:?}...",
                        attempt,
                        self.policy.max_retries + 1,
                        reason,
                        delay
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Delivers every message; a failure for one recipient never stops the rest.
    pub async fn deliver_all<M: Outgoing>(&self, messages: &[M]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for (i, message) in messages.iter().enumerate() {
            if i > 0 && !self.policy.batch_pause.is_zero() {
                tokio::time::sleep(self.policy.batch_pause).await;
            }

            match self.deliver(message).await {
                Ok(()) => report.delivered += 1,
                Err(e @ DeliverError::Throttled { .. }) => {
                    warn!(error = %e, "Skipping message");
                    report.throttled += 1;
                }
                Err(e) => {
                    error!(error = %e, "Failed to deliver message");
                    report.failed += 1;
                }
            }
        }

        if !messages.is_empty() {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                throttled = report.throttled,
                "Batch delivered"
            );
        }
        report
    }
}
