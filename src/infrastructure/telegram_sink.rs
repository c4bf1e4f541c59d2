//! Notification sinks: the Telegram Bot API, and a log-only fallback.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::domain::errors::DeliveryError;
use crate::domain::repositories::NotificationSink;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramSink {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl TelegramSink {
    pub fn new(bot_token: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        Self::with_api_base(TELEGRAM_API_BASE, bot_token, timeout)
    }

    /// Point the sink at a Bot API compatible server.
    pub fn with_api_base(api_base: &str, bot_token: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Unreachable(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        let body = SendMessage {
            chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.send_message_url())
            .json(&body)
            .send()
            .await
            // reqwest errors carry the URL, which carries the token
            .map_err(|e| DeliveryError::Unreachable(e.without_url().to_string()))?;

        let status = response.status();
        let parsed: Option<TelegramResponse> = response.json().await.ok();
        match parsed {
            Some(reply) if status.is_success() && reply.ok => Ok(()),
            Some(reply) => Err(DeliveryError::Rejected(
                reply
                    .description
                    .unwrap_or_else(|| format!("status {}", status)),
            )),
            None => Err(DeliveryError::Rejected(format!(
                "unreadable reply, status {}",
                status
            ))),
        }
    }
}

/// Writes alerts to the log; used when no bot token is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        info!(chat_id, "Alert:\n{}", text);
        Ok(())
    }
}
