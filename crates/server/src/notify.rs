use std::sync::Arc;

use leadbot_telegram::ChatSender;
use tracing::{debug, warn};

/// Best-effort status channel to the bot owner.
///
/// Used for assistant diagnostics and lead submission outcomes. A send
/// failure is logged and forgotten; the operator channel must never take the
/// pipeline down with it.
pub struct OperatorNotifier {
    sender: Arc<dyn ChatSender>,
    chat_id: Option<i64>,
}

impl OperatorNotifier {
    pub fn new(sender: Arc<dyn ChatSender>, chat_id: Option<i64>) -> Self {
        Self { sender, chat_id }
    }

    pub async fn notify(&self, text: &str) {
        let Some(chat_id) = self.chat_id else {
            debug!("operator chat not configured, dropping notification");
            return;
        };
        if let Err(error) = self.sender.send_message(chat_id, text).await {
            warn!(error = %error, "operator notification failed");
        }
    }
}
