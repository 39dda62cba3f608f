use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

/// One question/answer turn. Immutable once appended; file order is append
/// order is chronological.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogEntry {
    pub user_id: i64,
    pub username: String,
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// A dialog turn with everything but the question stripped, so follow-up
/// prompts neither balloon token usage nor feed the bot's own answers back
/// into itself in raw form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecentTurn {
    pub question: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not write `{path}`: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("malformed dialog record `{path}`: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Append-only per-bot dialog log backed by one JSON array per bot.
///
/// Appends are read-modify-write of the whole document and therefore
/// serialized through a single lock. `append` is not idempotent; callers
/// invoke it at most once per inbound message.
pub struct DialogStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DialogStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), write_lock: Mutex::new(()) }
    }

    pub async fn append(
        &self,
        bot_id: &str,
        user_id: i64,
        username: &str,
        question: &str,
        answer: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(bot_id);

        // A corrupt record must not wedge the pipeline; it is treated as
        // absent and rebuilt from this entry on.
        let mut entries = match read_entries(&path).await {
            Ok(entries) => entries,
            Err(StoreError::Parse { .. }) => {
                warn!(bot_id, path = %path.display(), "dialog record unreadable, starting fresh");
                Vec::new()
            }
            Err(other) => return Err(other),
        };

        entries.push(DialogEntry {
            user_id,
            username: username.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
        });

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write { path: path.clone(), source })?;
        }
        let body = serde_json::to_vec_pretty(&entries)
            .map_err(|source| StoreError::Parse { path: path.clone(), source })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| StoreError::Write { path, source })
    }

    /// All entries for the user, in append order.
    pub async fn history(&self, bot_id: &str, user_id: i64) -> Result<Vec<DialogEntry>, StoreError> {
        let entries = read_entries(&self.record_path(bot_id)).await?;
        Ok(entries.into_iter().filter(|entry| entry.user_id == user_id).collect())
    }

    /// Last `limit` turns for the user, question and timestamp only.
    pub async fn recent_history(
        &self,
        bot_id: &str,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<RecentTurn>, StoreError> {
        let history = self.history(bot_id, user_id).await?;
        let skip = history.len().saturating_sub(limit);
        Ok(history
            .into_iter()
            .skip(skip)
            .map(|entry| RecentTurn { question: entry.question, timestamp: entry.timestamp })
            .collect())
    }

    fn record_path(&self, bot_id: &str) -> PathBuf {
        self.data_dir.join(format!("{bot_id}_questions_answers.json"))
    }
}

async fn read_entries(path: &Path) -> Result<Vec<DialogEntry>, StoreError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(StoreError::Read { path: path.to_path_buf(), source }),
    };
    serde_json::from_slice(&raw)
        .map_err(|source| StoreError::Parse { path: path.to_path_buf(), source })
}
