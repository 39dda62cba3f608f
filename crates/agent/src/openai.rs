use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use leadbot_core::config::OpenAiConfig;

use crate::llm::{AssistantError, AssistantGateway};

/// OpenAI Assistants API client.
///
/// One `ask` is a full thread lifecycle: create thread, post the user
/// message, start a run for the configured assistant, poll the run until it
/// completes, read the newest message back. Threads are throwaway because
/// conversational context travels inside the prompt itself.
pub struct OpenAiAssistant {
    http: Client,
    api_key: SecretString,
    base_url: String,
    assistant_id: String,
    poll_interval: Duration,
    run_timeout_secs: u64,
}

impl OpenAiAssistant {
    pub fn new(config: &OpenAiConfig, assistant_id: impl Into<String>) -> Result<Self, AssistantError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            assistant_id: assistant_id.into(),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            run_timeout_secs: config.run_timeout_secs.max(1),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, AssistantError> {
        let response = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .header("OpenAI-Beta", "assistants=v2")
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AssistantError> {
        let response = self
            .http
            .get(format!("{}/{path}", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn await_run(&self, thread_id: &str, mut run: RunObject) -> Result<(), AssistantError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.run_timeout_secs);
        loop {
            match run.status.as_str() {
                "completed" => return Ok(()),
                "queued" | "in_progress" | "cancelling" => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(AssistantError::RunTimedOut(self.run_timeout_secs));
                    }
                    tokio::time::sleep(self.poll_interval).await;
                    debug!(thread_id, run_id = %run.id, status = %run.status, "polling run");
                    run = self.get(&format!("threads/{thread_id}/runs/{}", run.id)).await?;
                }
                _ => return Err(AssistantError::RunFailed { status: run.status }),
            }
        }
    }
}

#[async_trait]
impl AssistantGateway for OpenAiAssistant {
    async fn ask(&self, prompt: &str) -> Result<String, AssistantError> {
        let thread: ThreadObject = self.post("threads", &json!({})).await?;
        debug!(thread_id = %thread.id, assistant_id = %self.assistant_id, "thread created");

        let _posted: serde_json::Value = self
            .post(
                &format!("threads/{}/messages", thread.id),
                &json!({ "role": "user", "content": prompt }),
            )
            .await?;

        let run: RunObject = self
            .post(
                &format!("threads/{}/runs", thread.id),
                &json!({ "assistant_id": self.assistant_id }),
            )
            .await?;
        self.await_run(&thread.id, run).await?;

        let messages: MessageList =
            self.get(&format!("threads/{}/messages", thread.id)).await?;
        first_message_text(&messages)
    }
}

#[derive(Debug, Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: TextValue },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

/// The messages list comes newest-first; the answer is the first text part
/// of the first message.
fn first_message_text(messages: &MessageList) -> Result<String, AssistantError> {
    let newest = messages
        .data
        .first()
        .ok_or_else(|| AssistantError::Malformed("empty message list".to_string()))?;
    newest
        .content
        .iter()
        .find_map(|part| match part {
            ContentPart::Text { text } => Some(text.value.clone()),
            ContentPart::Other => None,
        })
        .ok_or_else(|| AssistantError::Malformed("message has no text content".to_string()))
}
