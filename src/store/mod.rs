pub mod disk;
pub mod memory;

use crate::core::store::RateStore;
use crate::core::subscription::ConfigStore;
use anyhow::{Context, Result};
use disk::{FjallConfigStore, FjallRateStore};
use fjall::PartitionCreateOptions;
use memory::{MemoryConfigStore, MemoryRateStore};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const RATES_PARTITION: &str = "rates";
const SUBSCRIBERS_PARTITION: &str = "subscribers";

/// The two repositories the service runs on.
#[derive(Clone)]
pub struct Storage {
    pub rates: Arc<dyn RateStore>,
    pub configs: Arc<dyn ConfigStore>,
}

impl Storage {
    /// Opens (or creates) the fjall keyspace at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open keyspace at {}", path.display()))?;

        let rates = keyspace
            .open_partition(RATES_PARTITION, PartitionCreateOptions::default())
            .context("Failed to open rates partition")?;
        let subscribers = keyspace
            .open_partition(SUBSCRIBERS_PARTITION, PartitionCreateOptions::default())
            .context("Failed to open subscribers partition")?;

        info!(path = %path.display(), "Opened storage");
        Ok(Self {
            rates: Arc::new(FjallRateStore::new(rates)?),
            configs: Arc::new(FjallConfigStore::new(subscribers)),
        })
    }

    /// Volatile storage, lost on exit.
    pub fn in_memory() -> Self {
        Self {
            rates: Arc::new(MemoryRateStore::new()),
            configs: Arc::new(MemoryConfigStore::new()),
        }
    }
}
