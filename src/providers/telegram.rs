use crate::core::dispatch::{Transport, TransportError};
use crate::core::subscription::SubscriberId;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends messages through the Telegram Bot API `sendMessage` method.
pub struct TelegramTransport {
    base_url: String,
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(base_url: &str, bot_token: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("ratewatch/1.0")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            client,
        })
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct ApiReply {
    #[serde(default)]
    description: Option<String>,
}

fn classify(status: StatusCode, description: String) -> TransportError {
    let reason = format!("{}: {}", status.as_u16(), description);
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND => TransportError::Permanent(reason),
        _ => TransportError::Transient(reason),
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    #[instrument(name = "TelegramSend", skip(self, text), fields(recipient = %recipient))]
    async fn send_message(&self, recipient: &SubscriberId, text: &str) -> Result<(), TransportError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let body = SendMessage {
            chat_id: recipient.as_str(),
            text,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("Message accepted");
            return Ok(());
        }

        let reply: ApiReply = response.json().await.unwrap_or_default();
        Err(classify(
            status,
            reply.description.unwrap_or_else(|| "no description".to_string()),
        ))
    }
}
