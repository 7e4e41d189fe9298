pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

pub use crate::core::config;

use crate::core::config::{AppConfig, SourceKind};
use crate::core::dispatch::{Dispatcher, Transport, TransportError};
use crate::core::jobs::{JobKind, Jobs};
use crate::core::notification::NotificationEngine;
use crate::core::rate::RateSource;
use crate::core::schedule::Scheduler;
use crate::core::subscription::{SubscriberId, SubscriptionRegistry, Subscriptions};
use crate::providers::telegram::TelegramTransport;
use crate::providers::yahoo_finance::YahooRateSource;
use crate::store::Storage;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Run { ephemeral: bool },
    Ingest,
    Check,
    Digest,
    Prune,
    Rates,
    History {
        currency: String,
        source: Option<String>,
        days: u32,
    },
    Subscriber(SubscriberCommand),
}

impl AppCommand {
    fn delivers(&self) -> bool {
        matches!(
            self,
            AppCommand::Run { .. } | AppCommand::Check | AppCommand::Digest
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberCommand {
    Add(String),
    Show(String),
    List,
    Threshold { id: String, value: Decimal },
    Currency { id: String, code: String },
    Source { id: String, source: String },
    Enable(String),
    Disable(String),
}

/// Builds one [`RateSource`] per configured source.
pub fn build_sources(config: &AppConfig) -> Vec<Arc<dyn RateSource>> {
    config
        .sources
        .iter()
        .map(|source| -> Arc<dyn RateSource> {
            match source.kind {
                SourceKind::Yahoo => Arc::new(YahooRateSource::new(
                    &source.id,
                    &source.base_url,
                    &source.quote_currency,
                    source.currencies.clone(),
                )),
            }
        })
        .collect()
}

/// The wired pipeline: storage, subscriber management and the scheduler driving the jobs.
pub struct Service {
    pub storage: Storage,
    pub subscriptions: Arc<Subscriptions>,
    pub scheduler: Scheduler,
}

impl Service {
    pub fn new(
        config: &AppConfig,
        storage: Storage,
        sources: Vec<Arc<dyn RateSource>>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let subscriptions = Arc::new(Subscriptions::new(
            Arc::clone(&storage.configs),
            config.policy(),
        ));
        let registry: Arc<dyn SubscriptionRegistry> = subscriptions.clone();
        let engine = NotificationEngine::new(
            Arc::clone(&storage.rates),
            registry,
            config.change_window(),
        );
        let dispatcher =
            Dispatcher::new(transport, config.delivery_policy()).with_limiter(config.limiter()?);

        let mut jobs = Jobs::new(
            Arc::clone(&storage.rates),
            engine,
            dispatcher,
            config.retention(),
        );
        for source in sources {
            jobs = jobs.with_source(source);
        }
        if let Some(admin) = config.admin() {
            jobs = jobs.with_admin_report(subscriptions.clone(), admin);
        }

        let scheduler = Scheduler::new(Arc::new(jobs), config.triggers()?, config.utc_offset()?);
        Ok(Self {
            storage,
            subscriptions,
            scheduler,
        })
    }
}

/// Stand-in for commands that never send messages when no bot token is configured.
struct NoTransport;

#[async_trait]
impl Transport for NoTransport {
    async fn send_message(&self, _: &SubscriberId, _: &str) -> Result<(), TransportError> {
        Err(TransportError::Permanent("no bot token configured".to_string()))
    }
}

fn build_transport(config: &AppConfig, required: bool) -> Result<Arc<dyn Transport>> {
    match config.bot_token() {
        Ok(token) => Ok(Arc::new(TelegramTransport::new(
            &config.telegram.base_url,
            &token,
        )?)),
        Err(e) if required => Err(e),
        Err(_) => {
            debug!("No bot token, messages cannot be delivered");
            Ok(Arc::new(NoTransport))
        }
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!(
        sources = config.sources.len(),
        admin_report = config.admin_chat_id.is_some(),
        "Loaded config"
    );

    let storage = match command {
        AppCommand::Run { ephemeral: true } => {
            info!("Using in-memory storage, data is lost on exit");
            Storage::in_memory()
        }
        _ => Storage::open(&config.default_data_path()?)?,
    };
    let transport = build_transport(&config, command.delivers())?;
    let service = Service::new(&config, storage, build_sources(&config), transport)?;

    match command {
        AppCommand::Run { .. } => cli::run::run(&service).await,
        AppCommand::Ingest => cli::run::run_once(&service.scheduler, JobKind::Ingest).await,
        AppCommand::Check => cli::run::run_once(&service.scheduler, JobKind::Evaluate).await,
        AppCommand::Digest => cli::run::run_once(&service.scheduler, JobKind::Digest).await,
        AppCommand::Prune => cli::run::run_once(&service.scheduler, JobKind::Prune).await,
        AppCommand::Rates => cli::rates::show_rates(&config, service.storage.rates.as_ref()).await,
        AppCommand::History {
            currency,
            source,
            days,
        } => {
            cli::rates::show_history(
                &config,
                service.storage.rates.as_ref(),
                &currency,
                source.as_deref(),
                days,
            )
            .await
        }
        AppCommand::Subscriber(cmd) => cli::subscriber::run(&service.subscriptions, cmd).await,
    }
}
