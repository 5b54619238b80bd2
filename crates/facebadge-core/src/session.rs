//! Per-identity attendance sessions.
//!
//! A session only moves forward: never seen → logged in → logged out.
//! A logged-out identity stays logged out for the rest of the process.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attendance action reported to the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Login,
    Logout,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Login => "login",
            Action::Logout => "logout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    LoggedIn,
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub status: SessionStatus,
    pub login_time: DateTime<Utc>,
}

/// Message shown on the badge screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadgeMessage {
    Welcome,
    AlreadyLoggedIn,
    LoggingOut,
    LoggedOut,
}

impl BadgeMessage {
    pub const ALL: [BadgeMessage; 4] = [
        BadgeMessage::Welcome,
        BadgeMessage::AlreadyLoggedIn,
        BadgeMessage::LoggingOut,
        BadgeMessage::LoggedOut,
    ];

    /// Stable key, also the asset name of the pre-rendered banner.
    pub fn key(&self) -> &'static str {
        match self {
            BadgeMessage::Welcome => "welcome",
            BadgeMessage::AlreadyLoggedIn => "already-logged-in",
            BadgeMessage::LoggingOut => "logging-out",
            BadgeMessage::LoggedOut => "logged-out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub action: Option<Action>,
    pub message: BadgeMessage,
}

/// Decide what a stable recognition at `now` means for an identity.
///
/// Returns the decision and the session that should replace `prior`.
/// A clock that moved backwards counts as "within the timeout".
pub fn evaluate(
    prior: Option<&Session>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> (Decision, Option<Session>) {
    match prior {
        None => (
            Decision {
                action: Some(Action::Login),
                message: BadgeMessage::Welcome,
            },
            Some(Session {
                status: SessionStatus::LoggedIn,
                login_time: now,
            }),
        ),
        Some(session) => match session.status {
            SessionStatus::LoggedIn if now.signed_duration_since(session.login_time) >= timeout => (
                Decision {
                    action: Some(Action::Logout),
                    message: BadgeMessage::LoggingOut,
                },
                Some(Session {
                    status: SessionStatus::LoggedOut,
                    login_time: session.login_time,
                }),
            ),
            SessionStatus::LoggedIn => (
                Decision {
                    action: None,
                    message: BadgeMessage::AlreadyLoggedIn,
                },
                Some(session.clone()),
            ),
            SessionStatus::LoggedOut => (
                Decision {
                    action: None,
                    message: BadgeMessage::LoggedOut,
                },
                Some(session.clone()),
            ),
        },
    }
}

/// Owns every session for the lifetime of the process. Not persisted:
/// a restart forgets who is logged in.
pub struct SessionTracker {
    timeout: Duration,
    sessions: HashMap<String, Session>,
}

impl SessionTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sessions: HashMap::new(),
        }
    }

    pub fn decide(&mut self, identity_id: &str, now: DateTime<Utc>) -> Decision {
        let (decision, next) = evaluate(self.sessions.get(identity_id), now, self.timeout);
        if let Some(session) = next {
            self.sessions.insert(identity_id.to_string(), session);
        }
        decision
    }

    pub fn session(&self, identity_id: &str) -> Option<&Session> {
        self.sessions.get(identity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, h, m, 0).unwrap()
    }

    fn tracker() -> SessionTracker {
        SessionTracker::new(Duration::hours(1))
    }

    #[test]
    fn test_first_sighting_logs_in() {
        let mut t = tracker();
        let d = t.decide("alice", at(9, 0));
        assert_eq!(d.action, Some(Action::Login));
        assert_eq!(d.message, BadgeMessage::Welcome);
        let s = t.session("alice").unwrap();
        assert_eq!(s.status, SessionStatus::LoggedIn);
        assert_eq!(s.login_time, at(9, 0));
    }

    #[test]
    fn test_within_timeout_is_noop() {
        let mut t = tracker();
        t.decide("alice", at(9, 0));
        let d = t.decide("alice", at(9, 59));
        assert_eq!(d.action, None);
        assert_eq!(d.message, BadgeMessage::AlreadyLoggedIn);
        assert_eq!(t.session("alice").unwrap().login_time, at(9, 0));
    }

    #[test]
    fn test_timeout_boundary_logs_out() {
        let mut t = tracker();
        t.decide("alice", at(9, 0));
        let d = t.decide("alice", at(10, 0));
        assert_eq!(d.action, Some(Action::Logout));
        assert_eq!(d.message, BadgeMessage::LoggingOut);
        assert_eq!(t.session("alice").unwrap().status, SessionStatus::LoggedOut);
    }

    #[test]
    fn test_logged_out_is_terminal() {
        let mut t = tracker();
        t.decide("alice", at(9, 0));
        t.decide("alice", at(11, 0));
        for later in [at(11, 1), at(23, 0)] {
            let d = t.decide("alice", later);
            assert_eq!(d.action, None);
            assert_eq!(d.message, BadgeMessage::LoggedOut);
        }
    }

    #[test]
    fn test_clock_skew_counts_as_within_timeout() {
        let (d, _) = evaluate(
            Some(&Session { status: SessionStatus::LoggedIn, login_time: at(10, 0) }),
            at(9, 0),
            Duration::hours(1),
        );
        assert_eq!(d.action, None);
    }

    #[test]
    fn test_identities_are_independent() {
        let mut t = tracker();
        t.decide("alice", at(9, 0));
        let d = t.decide("bob", at(9, 1));
        assert_eq!(d.action, Some(Action::Login));
        assert!(t.session("carol").is_none());
    }

    #[test]
    fn test_message_keys() {
        let keys: Vec<_> = BadgeMessage::ALL.iter().map(|m| m.key()).collect();
        assert_eq!(keys, ["welcome", "already-logged-in", "logging-out", "logged-out"]);
    }
}
