use crate::core::dispatch::DeliveryPolicy;
use crate::core::jobs::JobKind;
use crate::core::limiter::RecipientLimiter;
use crate::core::schedule::Cadence;
use crate::core::subscription::{SubscriberId, SubscriptionPolicy};
use anyhow::{Context, Result, bail};
use chrono::{FixedOffset, NaiveTime, Timelike};
use directories::ProjectDirs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

const BOT_TOKEN_ENV: &str = "BOT_TOKEN";
/// Upper bound for retention and change windows, about a century.
const MAX_PERIOD_DAYS: u32 = 36_500;

fn default_telegram_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_yahoo_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_url")]
    pub base_url: String,
    #[serde(default)]
    pub bot_token: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        TelegramConfig {
            base_url: default_telegram_url(),
            bot_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Yahoo,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default = "default_yahoo_url")]
    pub base_url: String,
    pub quote_currency: String,
    pub currencies: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SubscriptionsConfig {
    /// Accepted currencies; defaults to every currency a source reports.
    #[serde(default)]
    pub currencies: Vec<String>,
    /// Accepted sources; defaults to every configured source.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default = "SubscriptionsConfig::default_currency")]
    pub default_currency: String,
    #[serde(default = "SubscriptionsConfig::default_threshold")]
    pub default_threshold: Decimal,
}

impl SubscriptionsConfig {
    fn default_currency() -> String {
        "USD".to_string()
    }

    fn default_threshold() -> Decimal {
        Decimal::ONE
    }
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        SubscriptionsConfig {
            currencies: Vec::new(),
            sources: Vec::new(),
            default_currency: Self::default_currency(),
            default_threshold: Self::default_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Offset of the local wall clock, e.g. "+05:00".
    pub utc_offset: String,
    pub ingest_every_minutes: u32,
    pub evaluate_every_minutes: u32,
    pub digest_at: String,
    pub prune_at: String,
    pub stats_at: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            utc_offset: "+00:00".to_string(),
            ingest_every_minutes: 60,
            evaluate_every_minutes: 30,
            digest_at: "09:00".to_string(),
            prune_at: "02:00".to_string(),
            stats_at: "10:00".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_messages: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_messages: 30,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub batch_pause_ms: u64,
    pub rate_limit: RateLimitConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            max_retries: 3,
            backoff_ms: 500,
            batch_pause_ms: 100,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "AppConfig::default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "AppConfig::default_change_window_hours")]
    pub change_window_hours: u32,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    pub admin_chat_id: Option<String>,
    pub data_path: Option<String>,
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .with_context(|| format!("Invalid time for {field}: {value} (expected HH:MM)"))
}

fn parse_offset(value: &str) -> Result<FixedOffset> {
    let (sign, rest) = match value.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => bail!("Invalid utc_offset: {value} (expected +HH:MM or -HH:MM)"),
    };
    let time = NaiveTime::parse_from_str(rest, "%H:%M")
        .with_context(|| format!("Invalid utc_offset: {value}"))?;
    let secs = sign * time.num_seconds_from_midnight() as i32;
    FixedOffset::east_opt(secs).with_context(|| format!("utc_offset out of range: {value}"))
}

impl AppConfig {
    fn default_retention_days() -> u32 {
        30
    }

    fn default_change_window_hours() -> u32 {
        24
    }

    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "ratewatch", "ratewatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "ratewatch", "ratewatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Checks everything that serde cannot: times, offsets and cross references.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("At least one rate source must be configured");
        }
        let policy = self.policy();
        for source in &policy.sources {
            if !self.sources.iter().any(|s| s.id == *source) {
                bail!("Accepted source {source} is not configured under sources");
            }
        }
        if !policy.currencies.contains(&policy.default_currency) {
            bail!(
                "Default currency {} is not an accepted currency",
                policy.default_currency
            );
        }
        if self.schedule.ingest_every_minutes == 0 || self.schedule.evaluate_every_minutes == 0 {
            bail!("Schedule intervals must be at least one minute");
        }
        if self.retention_days > MAX_PERIOD_DAYS {
            bail!("retention_days must be at most {MAX_PERIOD_DAYS}");
        }
        if self.change_window_hours == 0 || self.change_window_hours > MAX_PERIOD_DAYS * 24 {
            bail!("change_window_hours must be between 1 and {}", MAX_PERIOD_DAYS * 24);
        }
        self.utc_offset()?;
        self.triggers()?;
        self.limiter()?;
        Ok(())
    }

    /// The bot token, with the `BOT_TOKEN` environment variable taking precedence.
    pub fn bot_token(&self) -> Result<String> {
        let non_empty = |token: &String| !token.trim().is_empty();
        std::env::var(BOT_TOKEN_ENV)
            .ok()
            .filter(non_empty)
            .or_else(|| self.telegram.bot_token.clone().filter(non_empty))
            .context("No bot token configured: set BOT_TOKEN or telegram.bot_token")
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.schedule.utc_offset)
    }

    pub fn policy(&self) -> SubscriptionPolicy {
        let upper = |values: &[String]| -> Vec<String> {
            values.iter().map(|v| v.trim().to_uppercase()).collect()
        };

        let mut currencies = upper(&self.subscriptions.currencies);
        if currencies.is_empty() {
            for source in &self.sources {
                for currency in upper(&source.currencies) {
                    if !currencies.contains(&currency) {
                        currencies.push(currency);
                    }
                }
            }
        }

        let sources = if self.subscriptions.sources.is_empty() {
            self.sources.iter().map(|s| s.id.clone()).collect()
        } else {
            self.subscriptions.sources.clone()
        };

        SubscriptionPolicy {
            default_currency: self.subscriptions.default_currency.trim().to_uppercase(),
            default_source: sources.first().cloned().unwrap_or_default(),
            default_threshold: self.subscriptions.default_threshold,
            currencies,
            sources,
        }
    }

    pub fn admin(&self) -> Option<SubscriberId> {
        self.admin_chat_id.as_deref().map(SubscriberId::from)
    }

    /// Job triggers; the stats report is only scheduled when an admin chat is set.
    pub fn triggers(&self) -> Result<Vec<(JobKind, Cadence)>> {
        let schedule = &self.schedule;
        let mut triggers = vec![
            (JobKind::Ingest, Cadence::EveryMinutes(schedule.ingest_every_minutes)),
            (JobKind::Evaluate, Cadence::EveryMinutes(schedule.evaluate_every_minutes)),
            (JobKind::Digest, Cadence::DailyAt(parse_time("digest_at", &schedule.digest_at)?)),
            (JobKind::Prune, Cadence::DailyAt(parse_time("prune_at", &schedule.prune_at)?)),
        ];
        if self.admin_chat_id.is_some() {
            triggers.push((
                JobKind::Stats,
                Cadence::DailyAt(parse_time("stats_at", &schedule.stats_at)?),
            ));
        }
        Ok(triggers)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn change_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.change_window_hours))
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            max_retries: self.delivery.max_retries,
            backoff: Duration::from_millis(self.delivery.backoff_ms),
            batch_pause: Duration::from_millis(self.delivery.batch_pause_ms),
        }
    }

    pub fn limiter(&self) -> Result<RecipientLimiter<SubscriberId>> {
        let limit = &self.delivery.rate_limit;
        RecipientLimiter::new(limit.max_messages, Duration::from_secs(limit.window_secs)).with_context(|| {
            format!(
                "Invalid rate limit: {} messages per {}s",
                limit.max_messages, limit.window_secs
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"
sources:
  - id: "yahoo"
    quote_currency: "KZT"
    currencies: ["USD", "eur", "RUB"]
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: AppConfig = serde_yaml::from_str(MINIMAL).expect("Failed to deserialize");
        config.validate().unwrap();

        assert_eq!(config.telegram.base_url, "https://api.telegram.org");
        assert_eq!(config.sources[0].kind, SourceKind::Yahoo);
        assert_eq!(config.sources[0].base_url, "https://query1.finance.yahoo.com");
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.change_window(), chrono::Duration::hours(24));
        assert_eq!(config.delivery.rate_limit.max_messages, 30);

        let policy = config.policy();
        assert_eq!(policy.currencies, vec!["USD", "EUR", "RUB"]);
        assert_eq!(policy.sources, vec!["yahoo"]);
        assert_eq!(policy.default_currency, "USD");
        assert_eq!(policy.default_source, "yahoo");
        assert_eq!(policy.default_threshold, dec!(1));

        let kinds: Vec<JobKind> = config.triggers().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![JobKind::Ingest, JobKind::Evaluate, JobKind::Digest, JobKind::Prune]
        );
    }

    #[test]
    fn test_full_config() {
        let yaml_str = r#"
telegram:
  base_url: "http://localhost:8081"
  bot_token: "123:abc"
sources:
  - id: "yahoo"
    kind: yahoo
    base_url: "http://example.com/yahoo"
    quote_currency: "KZT"
    currencies: ["USD", "EUR"]
subscriptions:
  currencies: ["USD"]
  default_threshold: 2.5
schedule:
  utc_offset: "+05:00"
  digest_at: "08:30"
delivery:
  max_retries: 1
  rate_limit:
    max_messages: 5
admin_chat_id: "777"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.utc_offset().unwrap(), FixedOffset::east_opt(5 * 3600).unwrap());
        assert_eq!(config.policy().currencies, vec!["USD"]);
        assert_eq!(config.policy().default_threshold, dec!(2.5));
        assert_eq!(config.delivery_policy().max_retries, 1);
        assert_eq!(config.delivery.batch_pause_ms, 100);
        assert_eq!(config.admin(), Some(SubscriberId::from("777")));

        let triggers = config.triggers().unwrap();
        assert_eq!(triggers.len(), 5);
        assert_eq!(
            triggers[2],
            (JobKind::Digest, Cadence::DailyAt(NaiveTime::from_hms_opt(8, 30, 0).unwrap()))
        );
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let bad_time = format!("{MINIMAL}schedule:\n  digest_at: \"9am\"\n");
        let config: AppConfig = serde_yaml::from_str(&bad_time).unwrap();
        assert!(config.validate().is_err());

        let bad_default = format!("{MINIMAL}subscriptions:\n  default_currency: \"GBP\"\n");
        let config: AppConfig = serde_yaml::from_str(&bad_default).unwrap();
        assert!(config.validate().is_err());

        let unknown_source = format!("{MINIMAL}subscriptions:\n  sources: [\"ecb\"]\n");
        let config: AppConfig = serde_yaml::from_str(&unknown_source).unwrap();
        assert!(config.validate().is_err());

        let no_budget = format!("{MINIMAL}delivery:\n  rate_limit:\n    max_messages: 0\n");
        let config: AppConfig = serde_yaml::from_str(&no_budget).unwrap();
        assert!(config.validate().is_err());

        let no_window = format!("{MINIMAL}delivery:\n  rate_limit:\n    window_secs: 0\n");
        let config: AppConfig = serde_yaml::from_str(&no_window).unwrap();
        assert!(config.validate().is_err());

        let endless_retention = format!("{MINIMAL}retention_days: 4000000000\n");
        let config: AppConfig = serde_yaml::from_str(&endless_retention).unwrap();
        assert!(config.validate().is_err());

        let endless_window = format!("{MINIMAL}change_window_hours: 4000000000\n");
        let config: AppConfig = serde_yaml::from_str(&endless_window).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("-03:30").unwrap().local_minus_utc(), -(3 * 3600 + 1800));
        assert_eq!(parse_offset("+00:00").unwrap().local_minus_utc(), 0);
        assert!(parse_offset("05:00").is_err());
        assert!(parse_offset("+25:00").is_err());
    }
}
