//! The operations the scheduler drives: ingestion, evaluation, digest, pruning and stats.

use crate::core::dispatch::{Dispatcher, TextMessage};
use crate::core::notification::NotificationEngine;
use crate::core::rate::RateSource;
use crate::core::store::RateStore;
use crate::core::subscription::{SubscriberId, SubscriberStats, Subscriptions};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Ingest,
    Evaluate,
    Digest,
    Prune,
    Stats,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Ingest,
        JobKind::Evaluate,
        JobKind::Digest,
        JobKind::Prune,
        JobKind::Stats,
    ];
}

impl Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                JobKind::Ingest => "ingest",
                JobKind::Evaluate => "evaluate",
                JobKind::Digest => "digest",
                JobKind::Prune => "prune",
                JobKind::Stats => "stats",
            }
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub processed: usize,
    pub failed: usize,
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, kind: JobKind) -> JobSummary;
}

struct AdminReport {
    subscriptions: Arc<Subscriptions>,
    chat_id: SubscriberId,
}

pub struct Jobs {
    sources: Vec<Arc<dyn RateSource>>,
    store: Arc<dyn RateStore>,
    engine: NotificationEngine,
    dispatcher: Dispatcher,
    retention: Duration,
    admin: Option<AdminReport>,
}

impl Jobs {
    pub fn new(
        store: Arc<dyn RateStore>,
        engine: NotificationEngine,
        dispatcher: Dispatcher,
        retention: Duration,
    ) -> Self {
        Self {
            sources: Vec::new(),
            store,
            engine,
            dispatcher,
            retention,
            admin: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RateSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_admin_report(mut self, subscriptions: Arc<Subscriptions>, chat_id: SubscriberId) -> Self {
        self.admin = Some(AdminReport {
            subscriptions,
            chat_id,
        });
        self
    }

    /// Fetches every source and appends the readings. A failing source or
    /// observation is logged and does not affect the others.
    pub async fn ingest(&self) -> JobSummary {
        let results = join_all(self.sources.iter().map(|source| self.ingest_source(source.as_ref()))).await;

        results
            .into_iter()
            .fold(JobSummary::default(), |mut total, summary| {
                total.processed += summary.processed;
                total.failed += summary.failed;
                total
            })
    }

    async fn ingest_source(&self, source: &dyn RateSource) -> JobSummary {
        let mut summary = JobSummary::default();
        let raws = match source.fetch_all().await {
            Ok(raws) => raws,
            Err(e) => {
                warn!(source = %source.id(), error = %e, "Fetch failed, no observations this pass");
                summary.failed += 1;
                return summary;
            }
        };

        for raw in raws {
            let observation = raw.into_observation(source.id());
            let currency = observation.currency_code.clone();
            match self.store.append(observation).await {
                Ok(_) => summary.processed += 1,
                Err(e) => {
                    error!(source = %source.id(), currency = %currency, error = %e, "Failed to save observation");
                    summary.failed += 1;
                }
            }
        }

        info!(source = %source.id(), saved = summary.processed, "Rates updated");
        summary
    }

    pub async fn evaluate(&self) -> JobSummary {
        let outcome = self.engine.evaluate().await;
        let report = self.dispatcher.deliver_all(&outcome.events).await;
        JobSummary {
            processed: report.delivered,
            failed: outcome.failed + report.failed + report.throttled,
        }
    }

    pub async fn digest(&self) -> JobSummary {
        let outcome = self.engine.digest().await;
        let report = self.dispatcher.deliver_all(&outcome.events).await;
        JobSummary {
            processed: report.delivered,
            failed: outcome.failed + report.failed + report.throttled,
        }
    }

    pub async fn prune(&self) -> JobSummary {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.retention) else {
            error!(retention = %self.retention, "Retention period reaches past the earliest date");
            return JobSummary {
                processed: 0,
                failed: 1,
            };
        };
        let removed = self.store.prune(cutoff).await;
        info!(removed, cutoff = %cutoff, "Old rates pruned");
        JobSummary {
            processed: removed,
            failed: 0,
        }
    }

    pub async fn report_stats(&self) -> JobSummary {
        let Some(admin) = &self.admin else {
            return JobSummary::default();
        };

        let stats = match admin.subscriptions.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Failed to collect subscriber stats");
                return JobSummary {
                    processed: 0,
                    failed: 1,
                };
            }
        };

        let message = TextMessage {
            recipient: admin.chat_id.clone(),
            text: render_stats(&stats, Utc::now()),
        };
        let report = self.dispatcher.deliver_all(std::slice::from_ref(&message)).await;
        JobSummary {
            processed: report.delivered,
            failed: report.failed + report.throttled,
        }
    }
}

#[async_trait]
impl JobRunner for Jobs {
    async fn run(&self, kind: JobKind) -> JobSummary {
        match kind {
            JobKind::Ingest => self.ingest().await,
            JobKind::Evaluate => self.evaluate().await,
            JobKind::Digest => self.digest().await,
            JobKind::Prune => self.prune().await,
            JobKind::Stats => self.report_stats().await,
        }
    }
}

pub fn render_stats(stats: &SubscriberStats, at: chrono::DateTime<Utc>) -> String {
    format!(
        "📊 Bot statistics\n\n\
         👥 Total subscribers: {}\n\
         🔔 Active notifications: {}\n\
         💱 Most used currency: {}\n\
         🌐 Most used source: {}\n\n\
         Time: {}",
        stats.total,
        stats.active_notifications,
        stats.most_used_currency.as_deref().unwrap_or("n/a"),
        stats.most_used_source.as_deref().unwrap_or("n/a"),
        at.format("%Y-%m-%d %H:%M UTC"),
    )
}
