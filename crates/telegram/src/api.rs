use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::update::Update;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("telegram api error: {description}")]
    Api { description: String },
}

/// Outbound side of the chat transport. The pipeline only ever needs these
/// two sends, so tests can substitute a recorder.
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError>;
    async fn send_sticker(&self, chat_id: i64, file_id: &str) -> Result<(), TelegramError>;
}

/// Bot API client for one bot token.
pub struct BotApi {
    http: Client,
    token: SecretString,
    base_url: String,
}

impl BotApi {
    pub fn new(token: SecretString) -> Result<Self, TelegramError> {
        Self::with_base_url(token, "https://api.telegram.org")
    }

    pub fn with_base_url(
        token: SecretString,
        base_url: impl Into<String>,
    ) -> Result<Self, TelegramError> {
        // Client timeout must outlive the long-poll window of get_updates.
        let http = Client::builder().timeout(Duration::from_secs(75)).build()?;
        Ok(Self { http, token, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    /// Long-polls for new updates past `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call("getUpdates", &json!({ "offset": offset, "timeout": timeout_secs })).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, TelegramError> {
        let url = format!("{}/bot{}/{method}", self.base_url, self.token.expose_secret());
        let envelope: ApiEnvelope<T> = self.http.post(url).json(body).send().await?.json().await?;
        unwrap_envelope(envelope)
    }
}

#[async_trait]
impl ChatSender for BotApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let _sent: serde_json::Value =
            self.call("sendMessage", &json!({ "chat_id": chat_id, "text": text })).await?;
        Ok(())
    }

    async fn send_sticker(&self, chat_id: i64, file_id: &str) -> Result<(), TelegramError> {
        let _sent: serde_json::Value =
            self.call("sendSticker", &json!({ "chat_id": chat_id, "sticker": file_id })).await?;
        Ok(())
    }
}

// The explicit bound stops serde from inferring `T: Default` for the
// defaulted `result` field; callers only ever have `DeserializeOwned`.
#[derive(Debug, Deserialize)]
#[serde(bound = "T: serde::de::DeserializeOwned")]
struct ApiEnvelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

fn unwrap_envelope<T>(envelope: ApiEnvelope<T>) -> Result<T, TelegramError> {
    if !envelope.ok {
        return Err(TelegramError::Api {
            description: envelope
                .description
                .unwrap_or_else(|| "no description provided".to_string()),
        });
    }
    envelope.result.ok_or_else(|| TelegramError::Api {
        description: "ok response without a result".to_string(),
    })
}
