use chrono::{DateTime, Utc};

/// Key for the shared session table: one session per (bot, user) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub bot_id: String,
    pub user_id: i64,
}

impl SessionKey {
    pub fn new(bot_id: impl Into<String>, user_id: i64) -> Self {
        Self { bot_id: bot_id.into(), user_id }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bot_id, self.user_id)
    }
}

/// Lead-capture progress for one session.
///
/// `PhoneCaptured` is terminal for the capture sub-flow; ordinary Q&A
/// continues as in `Engaged`. Only an explicit `/start` resets it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LeadState {
    /// Created by `/start`, no question asked yet.
    #[default]
    Fresh,
    /// Normal Q&A.
    Engaged,
    /// Assistant signalled agreement; waiting for a phone number.
    AwaitingPhone,
    /// Lead submitted once; flag never clears except on `/start`.
    PhoneCaptured,
}

/// Per (bot, user) conversational state. In-memory only: sessions do not
/// survive a process restart, which is an accepted limitation.
#[derive(Clone, Debug)]
pub struct Session {
    pub state: LeadState,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { state: LeadState::Fresh, last_activity: now }
    }

    /// First ordinary message moves a fresh session into Q&A.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        if self.state == LeadState::Fresh {
            self.state = LeadState::Engaged;
        }
    }

    /// The assistant's answer contained the agreement marker.
    ///
    /// No-op once the phone is captured: a user cannot re-enter the capture
    /// flow without `/start`.
    pub fn mark_agreed(&mut self) {
        if self.state != LeadState::PhoneCaptured {
            self.state = LeadState::AwaitingPhone;
        }
    }

    /// One-way transition that makes duplicate lead submissions impossible.
    pub fn mark_phone_captured(&mut self) {
        self.state = LeadState::PhoneCaptured;
    }

    /// Explicit restart: all flags cleared.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.state = LeadState::Fresh;
        self.last_activity = now;
    }

    pub fn awaiting_phone(&self) -> bool {
        self.state == LeadState::AwaitingPhone
    }

    pub fn phone_captured(&self) -> bool {
        self.state == LeadState::PhoneCaptured
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{LeadState, Session};

    #[test]
    fn fresh_session_engages_on_first_message() {
        let mut session = Session::new(Utc::now());
        assert_eq!(session.state, LeadState::Fresh);
        session.touch(Utc::now());
        assert_eq!(session.state, LeadState::Engaged);
    }

    #[test]
    fn agreement_then_phone_reaches_terminal_state() {
        let mut session = Session::new(Utc::now());
        session.touch(Utc::now());
        session.mark_agreed();
        assert!(session.awaiting_phone());
        session.mark_phone_captured();
        assert!(session.phone_captured());
    }

    #[test]
    fn agreement_marker_does_not_reopen_captured_session() {
        let mut session = Session::new(Utc::now());
        session.touch(Utc::now());
        session.mark_agreed();
        session.mark_phone_captured();
        session.mark_agreed();
        assert!(session.phone_captured());
    }

    #[test]
    fn reset_clears_captured_flag() {
        let mut session = Session::new(Utc::now());
        session.touch(Utc::now());
        session.mark_agreed();
        session.mark_phone_captured();
        session.reset(Utc::now());
        assert_eq!(session.state, LeadState::Fresh);
    }

    #[test]
    fn touch_keeps_engaged_state() {
        let mut session = Session::new(Utc::now());
        session.touch(Utc::now());
        session.mark_agreed();
        session.touch(Utc::now());
        assert!(session.awaiting_phone());
    }
}
