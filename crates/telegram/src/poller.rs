use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::BotApi;
use crate::update::InboundMessage;

/// Consumer of classified inbound messages. Implementations must never let
/// a failure escape: the poll loop has nothing useful to do with one.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, inbound: InboundMessage);
}

/// getUpdates long-poll loop for one bot.
pub struct UpdatePoller {
    api: Arc<BotApi>,
    poll_timeout_secs: u64,
    error_backoff: Duration,
}

impl UpdatePoller {
    pub fn new(api: Arc<BotApi>) -> Self {
        Self { api, poll_timeout_secs: 30, error_backoff: Duration::from_secs(5) }
    }

    pub async fn run(&self, handler: Arc<dyn UpdateHandler>) {
        let mut offset = 0_i64;
        loop {
            match self.api.get_updates(offset, self.poll_timeout_secs).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        match InboundMessage::from_update(update) {
                            Some(inbound) => handler.handle(inbound).await,
                            None => debug!("skipping non-text update"),
                        }
                    }
                }
                Err(error) => {
                    warn!(error = %error, "getUpdates failed, backing off");
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }
    }
}
