use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leadbot_agent::{build_prompt, AssistantGateway};
use leadbot_core::{
    LeadState, LimitsConfig, PhoneExtractor, ResponseSanitizer, SessionKey, TextsConfig,
};
use leadbot_store::{DialogStore, RateLimiter};
use leadbot_telegram::{ChatSender, InboundKind, InboundMessage, UpdateHandler};
use tracing::{debug, info, warn};

use crate::crm::{render_transcript, LeadSubmitter};
use crate::notify::OperatorNotifier;
use crate::scheduler::InactivityScheduler;
use crate::sessions::SessionTable;

/// What the pipeline decided to do with one inbound message. Resolved
/// inside the session critical section; the sends happen after it.
enum TurnAction {
    SubmitLead,
    AskForPhone,
    Reply(String),
}

/// Per-bot message pipeline: rate limiting, assistant call, lead-capture
/// state machine, dialog logging, inactivity nudge.
pub struct ConversationController {
    bot_id: String,
    texts: TextsConfig,
    limits: LimitsConfig,
    rate: Arc<RateLimiter>,
    dialogs: Arc<DialogStore>,
    gateway: Arc<dyn AssistantGateway>,
    sender: Arc<dyn ChatSender>,
    leads: Arc<dyn LeadSubmitter>,
    operator: Arc<OperatorNotifier>,
    phones: PhoneExtractor,
    sanitizer: ResponseSanitizer,
    sessions: Arc<SessionTable>,
    scheduler: InactivityScheduler,
}

impl ConversationController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bot_id: String,
        texts: TextsConfig,
        limits: LimitsConfig,
        rate: Arc<RateLimiter>,
        dialogs: Arc<DialogStore>,
        gateway: Arc<dyn AssistantGateway>,
        sender: Arc<dyn ChatSender>,
        leads: Arc<dyn LeadSubmitter>,
        operator: Arc<OperatorNotifier>,
        phones: PhoneExtractor,
        sessions: Arc<SessionTable>,
        scheduler: InactivityScheduler,
    ) -> Self {
        Self {
            bot_id,
            texts,
            limits,
            rate,
            dialogs,
            gateway,
            sender,
            leads,
            operator,
            phones,
            sanitizer: ResponseSanitizer::new(),
            sessions,
            scheduler,
        }
    }

    fn session_key(&self, user_id: i64) -> SessionKey {
        SessionKey::new(&self.bot_id, user_id)
    }

    async fn send(&self, chat_id: i64, text: &str) {
        if let Err(error) = self.sender.send_message(chat_id, text).await {
            warn!(error = %error, chat_id, "failed to send reply");
        }
    }

    async fn handle_start(&self, inbound: &InboundMessage) {
        let key = self.session_key(inbound.user_id);
        self.sessions.reset(&key, Utc::now()).await;
        self.scheduler.cancel(&key).await;

        if let Some(sticker) = &self.texts.start_sticker {
            if let Err(error) = self.sender.send_sticker(inbound.chat_id, sticker).await {
                warn!(error = %error, chat_id = inbound.chat_id, "failed to send start sticker");
            }
        }
        self.send(inbound.chat_id, &self.texts.start_message).await;
    }

    async fn handle_help(&self, inbound: &InboundMessage) {
        self.send(inbound.chat_id, &self.texts.help_message).await;
    }

    async fn handle_text(&self, inbound: &InboundMessage, text: &str) {
        let key = self.session_key(inbound.user_id);
        let now = Utc::now();

        // The quiet-period timer restarts on every message, including ones
        // the daily ceiling is about to drop.
        let delay = Duration::from_secs(self.limits.inactivity_delay_secs);
        self.scheduler.schedule(key.clone(), delay, self.nudge_task(key.clone(), inbound.chat_id)).await;

        if !self.rate.allow(now).await {
            debug!(session = %key, "daily ceiling reached, dropping message");
            return;
        }

        let recent = match self
            .dialogs
            .recent_history(&self.bot_id, inbound.user_id, self.limits.recent_history_limit)
            .await
        {
            Ok(turns) => turns.into_iter().map(|turn| turn.question).collect(),
            Err(error) => {
                warn!(error = %error, session = %key, "recent history unavailable");
                Vec::new()
            }
        };

        let prompt = build_prompt(&recent, text);
        let answer = match self.gateway.ask(&prompt).await {
            Ok(answer) => answer,
            Err(error) => {
                warn!(error = %error, session = %key, "assistant request failed");
                self.send(inbound.chat_id, &self.texts.error_message).await;
                self.operator
                    .notify(&format!("Assistant error for {key}: {error}"))
                    .await;
                return;
            }
        };
        let answer = self.sanitizer.clean(&answer);

        let marker = self.texts.agreement_marker.to_lowercase();
        let phone_found = self.phones.exists(text);
        let action = self
            .sessions
            .with(&key, now, |session| {
                session.touch(now);
                if session.awaiting_phone() {
                    if phone_found {
                        session.mark_phone_captured();
                        TurnAction::SubmitLead
                    } else {
                        TurnAction::AskForPhone
                    }
                } else if !session.phone_captured() && answer.to_lowercase().contains(&marker) {
                    session.mark_agreed();
                    TurnAction::Reply(answer.clone())
                } else {
                    TurnAction::Reply(answer.clone())
                }
            })
            .await;

        match action {
            TurnAction::SubmitLead => {
                info!(session = %key, "phone captured, submitting lead");
                self.leads.submit(&self.bot_id, inbound.user_id, text).await;
                // The user hears a success either way; a CRM hiccup is the
                // operator's problem, not theirs.
                self.send(inbound.chat_id, &self.texts.callback_succeed).await;
            }
            TurnAction::AskForPhone => {
                self.send(inbound.chat_id, &self.texts.phone_request).await;
            }
            TurnAction::Reply(answer) => {
                self.send(inbound.chat_id, &answer).await;
            }
        }

        if let Err(error) = self
            .dialogs
            .append(&self.bot_id, inbound.user_id, &inbound.username, text, &answer)
            .await
        {
            warn!(error = %error, session = %key, "failed to record dialog turn");
        }
    }

    /// Builds the future that runs when a session stays quiet long enough.
    ///
    /// Owns clones of everything it touches so the controller borrow ends at
    /// the call site; the scheduler may outlive any given turn.
    fn nudge_task(
        &self,
        key: SessionKey,
        chat_id: i64,
    ) -> impl Future<Output = ()> + Send + 'static {
        let sessions = Arc::clone(&self.sessions);
        let dialogs = Arc::clone(&self.dialogs);
        let gateway = Arc::clone(&self.gateway);
        let sender = Arc::clone(&self.sender);
        let operator = Arc::clone(&self.operator);
        let bot_id = self.bot_id.clone();
        let ready_to_buy_request = self.texts.ready_to_buy_request.clone();
        let discount_marker = self.texts.discount_marker.clone();
        let discount_user_message = self.texts.discount_user_message.clone();
        let discount_owner_message = self.texts.discount_owner_message.clone();
        let promocode_details = self.texts.promocode_details.clone();

        async move {
            let Some(session) = sessions.snapshot(&key).await else {
                return;
            };
            if session.state == LeadState::Fresh {
                return;
            }

            let history = match dialogs.history(&bot_id, key.user_id).await {
                Ok(history) if !history.is_empty() => history,
                Ok(_) => return,
                Err(error) => {
                    warn!(error = %error, session = %key, "history unavailable for nudge");
                    return;
                }
            };

            let prompt = format!("{ready_to_buy_request}\n\n{}", render_transcript(&history));
            let verdict = match gateway.ask(&prompt).await {
                Ok(verdict) => verdict,
                Err(error) => {
                    warn!(error = %error, session = %key, "readiness estimate failed");
                    return;
                }
            };
            if !verdict.contains(&discount_marker) {
                debug!(session = %key, "quiet user not judged ready to buy");
                return;
            }

            info!(session = %key, "sending discount nudge");
            let mut message = discount_user_message;
            if !promocode_details.is_empty() {
                message.push_str("\n\n");
                message.push_str(&promocode_details);
            }
            if let Err(error) = sender.send_message(chat_id, &message).await {
                warn!(error = %error, session = %key, "failed to send discount nudge");
            }
            operator.notify(&format!("{discount_owner_message} ({key})")).await;
        }
    }
}

#[async_trait]
impl UpdateHandler for ConversationController {
    async fn handle(&self, inbound: InboundMessage) {
        match &inbound.kind {
            InboundKind::Start => self.handle_start(&inbound).await,
            InboundKind::Help => self.handle_help(&inbound).await,
            InboundKind::Text(text) => {
                let text = text.clone();
                self.handle_text(&inbound, &text).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use leadbot_agent::{AssistantError, AssistantGateway};
    use leadbot_core::config::{LimitsConfig, TextsConfig};
    use leadbot_core::{LeadState, PhoneExtractor, SessionKey};
    use leadbot_store::{DialogStore, RateLimiter};
    use leadbot_telegram::{ChatSender, InboundKind, InboundMessage, TelegramError, UpdateHandler};
    use tokio::sync::Mutex;

    use super::ConversationController;
    use crate::crm::{LeadSubmitter, SubmitOutcome};
    use crate::notify::OperatorNotifier;
    use crate::scheduler::InactivityScheduler;
    use crate::sessions::SessionTable;

    const BOT_ID: &str = "42";
    const OPERATOR_CHAT: i64 = 999;

    struct ScriptedGateway {
        answers: Mutex<VecDeque<Result<String, AssistantError>>>,
    }

    impl ScriptedGateway {
        fn new(answers: Vec<Result<String, AssistantError>>) -> Self {
            Self { answers: Mutex::new(answers.into()) }
        }
    }

    #[async_trait]
    impl AssistantGateway for ScriptedGateway {
        async fn ask(&self, _prompt: &str) -> Result<String, AssistantError> {
            self.answers
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(AssistantError::Malformed("script exhausted".to_string())))
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        messages: Mutex<Vec<(i64, String)>>,
        stickers: Mutex<Vec<(i64, String)>>,
    }

    impl RecordingSender {
        async fn messages_for(&self, chat_id: i64) -> Vec<String> {
            self.messages
                .lock()
                .await
                .iter()
                .filter(|(chat, _)| *chat == chat_id)
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ChatSender for RecordingSender {
        async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
            self.messages.lock().await.push((chat_id, text.to_string()));
            Ok(())
        }

        async fn send_sticker(&self, chat_id: i64, file_id: &str) -> Result<(), TelegramError> {
            self.stickers.lock().await.push((chat_id, file_id.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingLeads {
        calls: Mutex<Vec<(String, i64, String)>>,
    }

    #[async_trait]
    impl LeadSubmitter for RecordingLeads {
        async fn submit(&self, bot_id: &str, user_id: i64, phone_text: &str) -> SubmitOutcome {
            self.calls.lock().await.push((bot_id.to_string(), user_id, phone_text.to_string()));
            SubmitOutcome::Submitted { lead_id: "1".to_string() }
        }
    }

    struct Harness {
        controller: Arc<ConversationController>,
        sender: Arc<RecordingSender>,
        leads: Arc<RecordingLeads>,
        sessions: Arc<SessionTable>,
        dialogs: Arc<DialogStore>,
        texts: TextsConfig,
        dir: tempfile::TempDir,
    }

    fn harness(answers: Vec<Result<String, AssistantError>>, ceiling: u32) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let texts = TextsConfig::default();
        let limits = LimitsConfig {
            daily_message_ceiling: ceiling,
            inactivity_delay_secs: 300,
            recent_history_limit: 10,
            phone_region: "RU".to_string(),
        };

        let sender = Arc::new(RecordingSender::default());
        let leads = Arc::new(RecordingLeads::default());
        let sessions = Arc::new(SessionTable::new());
        let dialogs = Arc::new(DialogStore::new(dir.path()));
        let operator = Arc::new(OperatorNotifier::new(sender.clone(), Some(OPERATOR_CHAT)));

        let controller = Arc::new(ConversationController::new(
            BOT_ID.to_string(),
            texts.clone(),
            limits,
            Arc::new(RateLimiter::new(dir.path(), BOT_ID, ceiling)),
            Arc::clone(&dialogs),
            Arc::new(ScriptedGateway::new(answers)),
            sender.clone(),
            leads.clone(),
            operator,
            PhoneExtractor::from_region_code("RU").expect("region"),
            Arc::clone(&sessions),
            InactivityScheduler::new(),
        ));

        Harness { controller, sender, leads, sessions, dialogs, texts, dir }
    }

    fn inbound(user_id: i64, kind: InboundKind) -> InboundMessage {
        InboundMessage { chat_id: user_id, user_id, username: "ivan_p".to_string(), kind }
    }

    fn text(user_id: i64, message: &str) -> InboundMessage {
        inbound(user_id, InboundKind::Text(message.to_string()))
    }

    async fn state_of(harness: &Harness, user_id: i64) -> Option<LeadState> {
        harness
            .sessions
            .snapshot(&SessionKey::new(BOT_ID, user_id))
            .await
            .map(|session| session.state)
    }

    #[tokio::test(start_paused = true)]
    async fn agreement_marker_then_phone_submits_exactly_one_lead() {
        let harness = harness(
            vec![
                Ok("Sure, we will contact you shortly!".to_string()),
                Ok("Noted.".to_string()),
                Ok("Anything else?".to_string()),
            ],
            100,
        );

        harness.controller.handle(text(7, "call me back please")).await;
        assert_eq!(state_of(&harness, 7).await, Some(LeadState::AwaitingPhone));
        assert_eq!(
            harness.sender.messages_for(7).await,
            vec!["Sure, we will contact you shortly!".to_string()]
        );

        harness.controller.handle(text(7, "Ivan, +7 999 123 45 67")).await;
        assert_eq!(state_of(&harness, 7).await, Some(LeadState::PhoneCaptured));

        let calls = harness.leads.calls.lock().await.clone();
        assert_eq!(calls, vec![(BOT_ID.to_string(), 7, "Ivan, +7 999 123 45 67".to_string())]);
        assert_eq!(
            harness.sender.messages_for(7).await.last(),
            Some(&harness.texts.callback_succeed)
        );

        // A later message with another number is just Q&A again.
        harness.controller.handle(text(7, "my other number is +7 999 765 43 21")).await;
        assert_eq!(harness.leads.calls.lock().await.len(), 1);
        assert_eq!(harness.sender.messages_for(7).await.last(), Some(&"Anything else?".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn awaiting_phone_without_number_asks_again() {
        let harness = harness(
            vec![
                Ok("Great, we will contact you.".to_string()),
                Ok("irrelevant".to_string()),
            ],
            100,
        );

        harness.controller.handle(text(3, "I want a callback")).await;
        harness.controller.handle(text(3, "sometime tomorrow maybe")).await;

        assert_eq!(state_of(&harness, 3).await, Some(LeadState::AwaitingPhone));
        assert!(harness.leads.calls.lock().await.is_empty());
        assert_eq!(
            harness.sender.messages_for(3).await.last(),
            Some(&harness.texts.phone_request)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn messages_past_the_daily_ceiling_vanish() {
        let harness = harness(
            vec![Ok("first answer".to_string()), Ok("never sent".to_string())],
            1,
        );

        harness.controller.handle(text(5, "question one")).await;
        harness.controller.handle(text(5, "question two")).await;

        assert_eq!(harness.sender.messages_for(5).await, vec!["first answer".to_string()]);
        let history = harness.dialogs.history(BOT_ID, 5).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question, "question one");
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_dialog_record_does_not_block_answers() {
        let harness = harness(vec![Ok("still answering".to_string())], 100);
        let record = harness.dir.path().join(format!("{BOT_ID}_questions_answers.json"));
        tokio::fs::write(&record, b"{not json").await.expect("write");

        harness.controller.handle(text(11, "hello?")).await;

        // The unreadable log degrades to an empty-history prompt; the user
        // still gets the answer and the record is rebuilt from this turn.
        assert_eq!(harness.sender.messages_for(11).await, vec!["still answering".to_string()]);
        let history = harness.dialogs.history(BOT_ID, 11).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question, "hello?");
    }

    #[tokio::test(start_paused = true)]
    async fn assistant_failure_reports_without_recording_a_turn() {
        let harness = harness(
            vec![Err(AssistantError::RunFailed { status: "failed".to_string() })],
            100,
        );

        harness.controller.handle(text(9, "hello?")).await;

        assert_eq!(
            harness.sender.messages_for(9).await,
            vec![harness.texts.error_message.clone()]
        );
        assert!(harness.dialogs.history(BOT_ID, 9).await.expect("history").is_empty());

        let operator = harness.sender.messages_for(OPERATOR_CHAT).await;
        assert_eq!(operator.len(), 1);
        assert!(operator[0].contains("Assistant error"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_resets_a_captured_session() {
        let harness = harness(
            vec![
                Ok("Okay, we will contact you.".to_string()),
                Ok("Noted.".to_string()),
                Ok("Okay, we will contact you.".to_string()),
                Ok("Noted.".to_string()),
            ],
            100,
        );

        harness.controller.handle(text(4, "callback please")).await;
        harness.controller.handle(text(4, "+7 999 123 45 67")).await;
        assert_eq!(harness.leads.calls.lock().await.len(), 1);

        harness.controller.handle(inbound(4, InboundKind::Start)).await;
        assert_eq!(state_of(&harness, 4).await, Some(LeadState::Fresh));
        assert_eq!(
            harness.sender.messages_for(4).await.last(),
            Some(&harness.texts.start_message)
        );

        harness.controller.handle(text(4, "callback again")).await;
        harness.controller.handle(text(4, "+7 999 765 43 21")).await;
        assert_eq!(harness.leads.calls.lock().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn help_replies_without_touching_lead_state() {
        let harness = harness(Vec::new(), 100);

        harness.controller.handle(inbound(6, InboundKind::Help)).await;

        assert_eq!(harness.sender.messages_for(6).await, vec![harness.texts.help_message.clone()]);
        assert!(state_of(&harness, 6).await.is_none());
        assert!(harness.dialogs.history(BOT_ID, 6).await.expect("history").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_qualified_user_gets_the_discount_nudge() {
        let harness = harness(
            vec![Ok("The tub seats six.".to_string()), Ok("READY_TO_BUY".to_string())],
            100,
        );

        harness.controller.handle(text(8, "how many seats?")).await;
        assert_eq!(harness.sender.messages_for(8).await.len(), 1);

        tokio::time::sleep(Duration::from_secs(301)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let messages = harness.sender.messages_for(8).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], harness.texts.discount_user_message);

        let operator = harness.sender.messages_for(OPERATOR_CHAT).await;
        assert_eq!(operator.len(), 1);
        assert!(operator[0].contains(&harness.texts.discount_owner_message));
    }

    #[tokio::test(start_paused = true)]
    async fn nudge_skips_users_not_ready_to_buy() {
        let harness = harness(
            vec![Ok("The tub seats six.".to_string()), Ok("NOT_READY".to_string())],
            100,
        );

        harness.controller.handle(text(2, "how many seats?")).await;
        tokio::time::sleep(Duration::from_secs(301)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(harness.sender.messages_for(2).await.len(), 1);
        assert!(harness.sender.messages_for(OPERATOR_CHAT).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nudge_appends_promocode_details_when_configured() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut texts = TextsConfig::default();
        texts.promocode_details = "Promo code: TUB10".to_string();
        let limits = LimitsConfig {
            daily_message_ceiling: 100,
            inactivity_delay_secs: 300,
            recent_history_limit: 10,
            phone_region: "RU".to_string(),
        };

        let sender = Arc::new(RecordingSender::default());
        let controller = Arc::new(ConversationController::new(
            BOT_ID.to_string(),
            texts.clone(),
            limits,
            Arc::new(RateLimiter::new(dir.path(), BOT_ID, 100)),
            Arc::new(DialogStore::new(dir.path())),
            Arc::new(ScriptedGateway::new(vec![
                Ok("Answer.".to_string()),
                Ok("READY_TO_BUY".to_string()),
            ])),
            sender.clone(),
            Arc::new(RecordingLeads::default()),
            Arc::new(OperatorNotifier::new(sender.clone(), None)),
            PhoneExtractor::from_region_code("RU").expect("region"),
            Arc::new(SessionTable::new()),
            InactivityScheduler::new(),
        ));

        controller.handle(text(1, "hi")).await;
        tokio::time::sleep(Duration::from_secs(301)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let messages = sender.messages_for(1).await;
        assert_eq!(messages.len(), 2);
        assert!(messages[1].starts_with(&texts.discount_user_message));
        assert!(messages[1].ends_with("Promo code: TUB10"));
    }
}
