use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

/// A text update classified for the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub kind: InboundKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundKind {
    Start,
    Help,
    Text(String),
}

impl InboundMessage {
    /// Non-text updates and messages without a sender are dropped here;
    /// nothing downstream can act on them.
    pub fn from_update(update: Update) -> Option<Self> {
        let message = update.message?;
        let text = message.text?;
        let from = message.from?;
        let username =
            from.username.or(from.first_name).unwrap_or_else(|| from.id.to_string());
        Some(Self {
            chat_id: message.chat.id,
            user_id: from.id,
            username,
            kind: classify(&text),
        })
    }
}

/// `/start@SomeBot` must work the same as `/start` in group chats.
fn classify(text: &str) -> InboundKind {
    let trimmed = text.trim();
    if is_command(trimmed, "/start") {
        InboundKind::Start
    } else if is_command(trimmed, "/help") {
        InboundKind::Help
    } else {
        InboundKind::Text(text.to_string())
    }
}

fn is_command(text: &str, command: &str) -> bool {
    match text.strip_prefix(command) {
        Some(rest) => rest.is_empty() || rest.starts_with('@') || rest.starts_with(' '),
        None => false,
    }
}
