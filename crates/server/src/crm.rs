use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leadbot_agent::AssistantGateway;
use leadbot_core::PhoneExtractor;
use leadbot_store::{DialogEntry, DialogStore};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::notify::OperatorNotifier;

/// Result of one lead submission attempt. The distinction is for the
/// operator channel and logs; the end user always receives the same
/// acknowledgment from the conversation flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { lead_id: String },
    Rejected { reason: String },
}

/// Posts extracted contact + dialog summary to the CRM.
#[async_trait]
pub trait LeadSubmitter: Send + Sync {
    async fn submit(&self, bot_id: &str, user_id: i64, phone_text: &str) -> SubmitOutcome;
}

/// Webhook-backed submitter.
///
/// Best-effort, at-most-once: there is no retry and no idempotency key.
/// Duplicate submissions are prevented upstream by the one-way
/// phone-captured transition, not here.
pub struct CrmLeadSubmitter {
    http: Client,
    webhook_url: Option<String>,
    phones: PhoneExtractor,
    dialogs: Arc<DialogStore>,
    gateway: Arc<dyn AssistantGateway>,
    summary_request: String,
    operator: Arc<OperatorNotifier>,
}

impl CrmLeadSubmitter {
    pub fn new(
        webhook_url: Option<String>,
        phones: PhoneExtractor,
        dialogs: Arc<DialogStore>,
        gateway: Arc<dyn AssistantGateway>,
        summary_request: String,
        operator: Arc<OperatorNotifier>,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http, webhook_url, phones, dialogs, gateway, summary_request, operator })
    }

    async fn try_submit(
        &self,
        bot_id: &str,
        user_id: i64,
        phone_text: &str,
    ) -> Result<String, String> {
        let webhook = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| "CRM webhook is not configured".to_string())?;

        let found = self
            .phones
            .extract(phone_text)
            .ok_or_else(|| "no valid phone number in message".to_string())?;

        // Summary quality degrades gracefully when the log is unreadable;
        // losing the lead over it would be worse.
        let history = match self.dialogs.history(bot_id, user_id).await {
            Ok(history) => history,
            Err(error) => {
                warn!(error = %error, bot_id, user_id, "history unavailable for lead summary");
                Vec::new()
            }
        };

        let name = display_name(&found.residual, &history);
        let summary_prompt = format!("{}\n\n{}", self.summary_request, render_transcript(&history));
        let summary = self
            .gateway
            .ask(&summary_prompt)
            .await
            .map_err(|error| format!("dialog summary unavailable: {error}"))?;

        let payload = lead_payload(&name, &found.e164, &summary);
        let response = self
            .http
            .post(webhook)
            .json(&payload)
            .send()
            .await
            .map_err(|error| format!("CRM request failed: {error}"))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|error| format!("malformed CRM response: {error}"))?;
        parse_crm_response(status, &body)
    }
}

#[async_trait]
impl LeadSubmitter for CrmLeadSubmitter {
    async fn submit(&self, bot_id: &str, user_id: i64, phone_text: &str) -> SubmitOutcome {
        match self.try_submit(bot_id, user_id, phone_text).await {
            Ok(lead_id) => {
                info!(bot_id, user_id, lead_id = %lead_id, "lead submitted");
                self.operator.notify(&format!("New lead submitted, CRM id {lead_id}")).await;
                SubmitOutcome::Submitted { lead_id }
            }
            Err(reason) => {
                warn!(bot_id, user_id, reason = %reason, "lead submission rejected");
                self.operator.notify(&format!("Lead submission failed: {reason}")).await;
                SubmitOutcome::Rejected { reason }
            }
        }
    }
}

/// Q/A transcript for summary and estimation prompts.
pub fn render_transcript(history: &[DialogEntry]) -> String {
    let mut transcript = String::new();
    for entry in history {
        transcript.push_str("Q: ");
        transcript.push_str(&entry.question);
        transcript.push_str("\nA: ");
        transcript.push_str(&entry.answer);
        transcript.push('\n');
    }
    transcript
}

/// Residual text around the phone number is the best name guess; the
/// username from the dialog log is the fallback.
fn display_name(residual: &str, history: &[DialogEntry]) -> String {
    if !residual.is_empty() {
        return residual.to_string();
    }
    history
        .last()
        .map(|entry| entry.username.clone())
        .filter(|username| !username.is_empty())
        .unwrap_or_else(|| "Telegram user".to_string())
}

fn lead_payload(name: &str, phone_e164: &str, commentary: &str) -> Value {
    json!({
        "fields": {
            "TITLE": format!("Telegram lead: {name}"),
            "NAME": name,
            "PHONE": [{ "VALUE": phone_e164, "VALUE_TYPE": "WORK" }],
            "COMMENTS": commentary,
            "SOURCE_ID": "TELEGRAM",
        },
        "params": { "REGISTER_SONET_EVENT": "Y" },
    })
}

/// The CRM contract is opaque beyond "2xx with a `result` key means
/// accepted"; the id may come back as a number or a string.
fn parse_crm_response(status: StatusCode, body: &Value) -> Result<String, String> {
    if !status.is_success() {
        return Err(format!("CRM returned {status}"));
    }
    match body.get("result") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err("CRM response has no `result` field".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leadbot_store::DialogEntry;
    use reqwest::StatusCode;
    use serde_json::json;

    use super::{display_name, lead_payload, parse_crm_response, render_transcript};

    fn entry(question: &str, answer: &str) -> DialogEntry {
        DialogEntry {
            user_id: 1,
            username: "ivan_p".to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn payload_carries_name_phone_and_commentary() {
        let payload = lead_payload("Ivan", "+79991234567", "wants a six-seat tub");
        assert_eq!(payload["fields"]["NAME"], "Ivan");
        assert_eq!(payload["fields"]["PHONE"][0]["VALUE"], "+79991234567");
        assert_eq!(payload["fields"]["COMMENTS"], "wants a six-seat tub");
        assert_eq!(payload["params"]["REGISTER_SONET_EVENT"], "Y");
    }

    #[test]
    fn crm_result_id_accepts_numbers_and_strings() {
        assert_eq!(
            parse_crm_response(StatusCode::OK, &json!({"result": 517})).expect("id"),
            "517"
        );
        assert_eq!(
            parse_crm_response(StatusCode::OK, &json!({"result": "lead-9"})).expect("id"),
            "lead-9"
        );
    }

    #[test]
    fn missing_result_key_is_a_rejection() {
        let result = parse_crm_response(StatusCode::OK, &json!({"error": "QUERY_LIMIT"}));
        assert!(result.is_err());
    }

    #[test]
    fn non_success_status_is_a_rejection() {
        let result = parse_crm_response(StatusCode::BAD_GATEWAY, &json!({"result": 1}));
        assert!(result.unwrap_err().contains("502"));
    }

    #[test]
    fn transcript_interleaves_questions_and_answers() {
        let history = vec![entry("how big?", "up to six people"), entry("price?", "from 3000")];
        let transcript = render_transcript(&history);
        assert_eq!(transcript, "Q: how big?\nA: up to six people\nQ: price?\nA: from 3000\n");
    }

    #[test]
    fn name_falls_back_to_username_then_placeholder() {
        let history = vec![entry("q", "a")];
        assert_eq!(display_name("Ivan", &history), "Ivan");
        assert_eq!(display_name("", &history), "ivan_p");
        assert_eq!(display_name("", &[]), "Telegram user");
    }
}
