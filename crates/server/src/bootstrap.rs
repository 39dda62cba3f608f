use std::sync::Arc;

use leadbot_agent::{AssistantError, OpenAiAssistant};
use leadbot_core::config::AppConfig;
use leadbot_core::{PhoneExtractor, UnknownRegionError};
use leadbot_store::{DialogStore, RateLimiter};
use leadbot_telegram::{BotApi, ChatSender, TelegramError, UpdatePoller};
use thiserror::Error;
use tracing::info;

use crate::controller::ConversationController;
use crate::crm::CrmLeadSubmitter;
use crate::notify::OperatorNotifier;
use crate::scheduler::InactivityScheduler;
use crate::sessions::SessionTable;

/// One fully wired bot: its long-poll loop plus the pipeline behind it.
pub struct BotRuntime {
    pub bot_id: String,
    pub poller: UpdatePoller,
    pub controller: Arc<ConversationController>,
}

pub struct Application {
    pub bots: Vec<BotRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    PhoneRegion(#[from] UnknownRegionError),
    #[error("telegram client setup failed: {0}")]
    Telegram(#[from] TelegramError),
    #[error("assistant client setup failed: {0}")]
    Assistant(#[from] AssistantError),
    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Wires every configured bot onto the shared dialog store, session table
/// and scheduler. The operator chat, when configured, is served through the
/// first bot's sender.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(bots = config.bots.len(), data_dir = %config.storage.data_dir.display(), "starting bootstrap");

    let dialogs = Arc::new(DialogStore::new(config.storage.data_dir.clone()));
    let phones = PhoneExtractor::from_region_code(&config.limits.phone_region)?;
    let sessions = Arc::new(SessionTable::new());
    let scheduler = InactivityScheduler::new();

    let mut bots = Vec::with_capacity(config.bots.len());
    for bot in &config.bots {
        let bot_id = bot.bot_id();
        let api = Arc::new(BotApi::new(bot.token.clone())?);
        let sender: Arc<dyn ChatSender> = api.clone();

        let operator =
            Arc::new(OperatorNotifier::new(Arc::clone(&sender), config.operator.chat_id));
        let gateway = Arc::new(OpenAiAssistant::new(&config.openai, bot.assistant_id.clone())?);
        let rate = Arc::new(RateLimiter::new(
            &config.storage.data_dir,
            &bot_id,
            config.limits.daily_message_ceiling,
        ));
        let leads = Arc::new(CrmLeadSubmitter::new(
            config.crm.webhook_url.clone(),
            phones.clone(),
            Arc::clone(&dialogs),
            gateway.clone(),
            config.texts.summary_request.clone(),
            Arc::clone(&operator),
        )?);

        let controller = Arc::new(ConversationController::new(
            bot_id.clone(),
            config.texts.clone(),
            config.limits.clone(),
            rate,
            Arc::clone(&dialogs),
            gateway,
            sender,
            leads,
            operator,
            phones.clone(),
            Arc::clone(&sessions),
            scheduler.clone(),
        ));

        info!(bot_id = %bot_id, assistant_id = %bot.assistant_id, "bot wired");
        bots.push(BotRuntime { bot_id, poller: UpdatePoller::new(api), controller });
    }

    Ok(Application { bots })
}

#[cfg(test)]
mod tests {
    use leadbot_core::config::{AppConfig, BotConfig};

    use super::bootstrap_with_config;

    fn minimal_config(data_dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.data_dir = data_dir.to_path_buf();
        config.bots.push(BotConfig {
            token: "111:first".to_string().into(),
            assistant_id: "asst_one".to_string(),
        });
        config.bots.push(BotConfig {
            token: "222:second".to_string().into(),
            assistant_id: "asst_two".to_string(),
        });
        config
    }

    #[tokio::test]
    async fn bootstrap_wires_one_runtime_per_bot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap_with_config(minimal_config(dir.path()))
            .await
            .expect("bootstrap should succeed");

        assert_eq!(app.bots.len(), 2);
        assert_eq!(app.bots[0].bot_id, "111");
        assert_eq!(app.bots[1].bot_id, "222");
    }

    #[tokio::test]
    async fn bootstrap_rejects_unknown_phone_region() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = minimal_config(dir.path());
        config.limits.phone_region = "ZZ".to_string();

        let result = bootstrap_with_config(config).await;
        assert!(result.is_err());
    }
}
