use crate::core::rate::{FetchError, RateSource, RawObservation};
use crate::providers::util::with_retry;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

const RETRIES: usize = 2;
const RETRY_DELAY_MS: u64 = 500;

/// Reads spot rates for a set of currencies quoted in one currency from the
/// Yahoo Finance chart API.
pub struct YahooRateSource {
    id: String,
    base_url: String,
    quote_currency: String,
    currencies: Vec<String>,
    retry_delay_ms: u64,
}

impl YahooRateSource {
    pub fn new(id: &str, base_url: &str, quote_currency: &str, currencies: Vec<String>) -> Self {
        YahooRateSource {
            id: id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            quote_currency: quote_currency.to_uppercase(),
            currencies: currencies.into_iter().map(|c| c.to_uppercase()).collect(),
            retry_delay_ms: RETRY_DELAY_MS,
        }
    }

    pub fn with_retry_delay(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    fn symbol(&self, currency: &str) -> String {
        format!("{currency}{}=X", self.quote_currency)
    }

    #[instrument(name = "YahooRateFetch", skip(self), fields(source = %self.id))]
    async fn fetch_one(&self, currency: &str) -> Result<RawObservation, FetchError> {
        let symbol = self.symbol(currency);
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        let meta = with_retry(|| self.request(&url, &symbol), RETRIES, self.retry_delay_ms).await?;

        let value = Decimal::from_f64(meta.regular_market_price).ok_or_else(|| FetchError::Parse {
            target: symbol.clone(),
            reason: format!("price {} is not representable", meta.regular_market_price),
        })?;
        let observed_at = meta
            .regular_market_time
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);

        Ok(RawObservation {
            currency_code: currency.to_string(),
            value,
            observed_at,
        })
    }

    async fn request(&self, url: &str, symbol: &str) -> Result<ChartMeta, FetchError> {
        debug!("Requesting currency rate from {}", url);
        let http = |source| FetchError::Http {
            target: symbol.to_string(),
            source,
        };

        let client = reqwest::Client::builder()
            .user_agent("ratewatch/1.0")
            .build()
            .map_err(http)?;
        let response = client.get(url).send().await.map_err(http)?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                target: symbol.to_string(),
            });
        }

        let text = response.text().await.map_err(http)?;
        let data: ChartResponse = serde_json::from_str(&text).map_err(|e| FetchError::Parse {
            target: symbol.to_string(),
            reason: e.to_string(),
        })?;

        data.chart
            .result
            .into_iter()
            .next()
            .map(|item| item.meta)
            .ok_or_else(|| FetchError::Parse {
                target: symbol.to_string(),
                reason: "no rate data in response".to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Vec<ChartItem>,
}

#[derive(Debug, Deserialize)]
struct ChartItem {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: f64,
    #[serde(alias = "regularMarketTime")]
    regular_market_time: Option<i64>,
}

#[async_trait]
impl RateSource for YahooRateSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_all(&self) -> Result<Vec<RawObservation>, FetchError> {
        let results = join_all(self.currencies.iter().map(|c| self.fetch_one(c))).await;

        let mut observations = Vec::new();
        for (currency, result) in self.currencies.iter().zip(results) {
            match result {
                Ok(raw) if raw.value > Decimal::ZERO => observations.push(raw),
                Ok(raw) => warn!(currency = %currency, value = %raw.value, "Dropping non-positive rate"),
                Err(e) => warn!(currency = %currency, error = %e, "Failed to fetch rate"),
            }
        }

        if observations.is_empty() && !self.currencies.is_empty() {
            return Err(FetchError::Empty(self.id.clone()));
        }
        Ok(observations)
    }
}
