use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

/// Persisted rolling daily counter.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct RateCounter {
    date: NaiveDate,
    count: u32,
}

/// Global per-bot daily message ceiling.
///
/// The ceiling is deliberately per bot, not per user, and messages past it
/// are silently dropped by the caller; both behaviors are preserved from the
/// original deployment. Storage trouble is non-fatal: a counter that cannot
/// be read or written degrades to permissive rather than blocking all
/// traffic.
pub struct RateLimiter {
    path: PathBuf,
    ceiling: u32,
    lock: Mutex<()>,
}

impl RateLimiter {
    pub fn new(data_dir: &Path, bot_id: &str, ceiling: u32) -> Self {
        Self {
            path: data_dir.join(format!("{bot_id}_message_count.json")),
            ceiling,
            lock: Mutex::new(()),
        }
    }

    /// Checks the counter for `now`'s calendar day and claims one slot.
    ///
    /// Read-modify-write is atomic per bot: concurrent messages for the same
    /// bot serialize on the internal lock.
    pub async fn allow(&self, now: DateTime<Utc>) -> bool {
        let _guard = self.lock.lock().await;
        let today = now.date_naive();

        let count = match self.read_counter().await {
            Some(counter) if counter.date == today => counter.count,
            // Day rollover or no counter yet.
            _ => 0,
        };

        if count >= self.ceiling {
            return false;
        }

        self.write_counter(RateCounter { date: today, count: count + 1 }).await;
        true
    }

    async fn read_counter(&self) -> Option<RateCounter> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return None,
            Err(source) => {
                warn!(path = %self.path.display(), error = %source, "rate counter unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(counter) => Some(counter),
            Err(source) => {
                warn!(path = %self.path.display(), error = %source, "rate counter malformed");
                None
            }
        }
    }

    async fn write_counter(&self, counter: RateCounter) {
        let body = match serde_json::to_vec(&counter) {
            Ok(body) => body,
            Err(source) => {
                warn!(error = %source, "rate counter serialization failed");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if let Err(source) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %self.path.display(), error = %source, "rate counter dir failed");
                return;
            }
        }
        if let Err(source) = tokio::fs::write(&self.path, body).await {
            warn!(path = %self.path.display(), error = %source, "rate counter write failed");
        }
    }
}
