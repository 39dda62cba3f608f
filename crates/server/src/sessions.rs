use std::collections::HashMap;

use chrono::{DateTime, Utc};
use leadbot_core::{Session, SessionKey};
use tokio::sync::Mutex;

/// Shared table of per (bot, user) sessions.
///
/// One lock guards the whole table; closures passed to `with` must stay
/// synchronous and quick, so slow external calls never run inside the
/// critical section. Sessions are created lazily on first access and live
/// only as long as the process.
#[derive(Default)]
pub struct SessionTable {
    inner: Mutex<HashMap<SessionKey, Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on the session for `key`, creating it first if needed.
    pub async fn with<R>(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Session) -> R,
    ) -> R {
        let mut table = self.inner.lock().await;
        let session = table.entry(key.clone()).or_insert_with(|| Session::new(now));
        f(session)
    }

    /// Explicit restart: flags cleared, lead-capture state back to fresh.
    pub async fn reset(&self, key: &SessionKey, now: DateTime<Utc>) {
        self.with(key, now, |session| session.reset(now)).await;
    }

    /// Read-only copy for asynchronous consumers (the inactivity nudge),
    /// `None` when the user has never talked to this bot.
    pub async fn snapshot(&self, key: &SessionKey) -> Option<Session> {
        self.inner.lock().await.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leadbot_core::{LeadState, SessionKey};

    use super::SessionTable;

    #[tokio::test]
    async fn sessions_are_created_lazily_and_keyed_independently() {
        let table = SessionTable::new();
        let now = Utc::now();
        let first = SessionKey::new("42", 1);
        let second = SessionKey::new("42", 2);

        table
            .with(&first, now, |session| {
                session.touch(now);
                session.mark_agreed();
            })
            .await;

        let first_state = table.with(&first, now, |session| session.state).await;
        let second_state = table.with(&second, now, |session| session.state).await;
        assert_eq!(first_state, LeadState::AwaitingPhone);
        assert_eq!(second_state, LeadState::Fresh);
    }

    #[tokio::test]
    async fn snapshot_misses_unknown_sessions() {
        let table = SessionTable::new();
        assert!(table.snapshot(&SessionKey::new("42", 9)).await.is_none());
    }

    #[tokio::test]
    async fn reset_returns_session_to_fresh() {
        let table = SessionTable::new();
        let now = Utc::now();
        let key = SessionKey::new("42", 1);

        table
            .with(&key, now, |session| {
                session.touch(now);
                session.mark_agreed();
                session.mark_phone_captured();
            })
            .await;
        table.reset(&key, now).await;

        let snapshot = table.snapshot(&key).await.expect("session exists");
        assert_eq!(snapshot.state, LeadState::Fresh);
    }
}
