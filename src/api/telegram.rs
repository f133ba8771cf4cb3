use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::Notifier;
use crate::config::TelegramSection;
use crate::error::BotError;
use crate::Result;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Posts plain-text messages to one Telegram chat
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(settings: &TelegramSection, timeout_secs: u64) -> Result<Self> {
        Self::with_base_url(settings, TELEGRAM_API, timeout_secs)
    }

    pub fn with_base_url(settings: &TelegramSection, base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BotError::ConfigInvalid(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: settings.bot_token.clone(),
            chat_id: settings.chat_id.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::ExchangePermanent(format!(
                "telegram HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }
}
