//! Registration sessions for new profiles.
//!
//! Answers live in memory, keyed by address, until the form is complete or
//! the session expires. No task row is involved.

use coachline_core::model::Role;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub(crate) struct Session {
    /// Embedded in the cancel button so stale buttons can't cancel a newer session.
    pub token: String,
    pub role: Role,
    pub answers: Map<String, Value>,
    expires_at: Instant,
}

pub(crate) struct Registrations {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Registrations {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start (or restart) a session for an address.
    pub(crate) fn begin(&self, address: &str, role: Role) -> Session {
        let mut token = Uuid::new_v4().simple().to_string();
        token.truncate(8);
        let session = Session {
            token,
            role,
            answers: Map::new(),
            expires_at: Instant::now() + self.ttl,
        };
        self.sessions().insert(address.to_string(), session.clone());
        session
    }

    /// The live session of an address. Expired sessions are dropped.
    pub(crate) fn get(&self, address: &str) -> Option<Session> {
        let now = Instant::now();
        let mut sessions = self.sessions();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.get(address).cloned()
    }

    /// Store updated answers and extend the session.
    pub(crate) fn save(&self, address: &str, mut session: Session) {
        session.expires_at = Instant::now() + self.ttl;
        self.sessions().insert(address.to_string(), session);
    }

    /// Drop the session. With a token, only the matching session is dropped.
    pub(crate) fn cancel(&self, address: &str, token: Option<&str>) -> bool {
        let mut sessions = self.sessions();
        match (sessions.get(address), token) {
            (Some(s), Some(t)) if s.token != t => false,
            (Some(_), _) => sessions.remove(address).is_some(),
            (None, _) => false,
        }
    }

    /// Remove and return the session once its profile is created.
    pub(crate) fn finish(&self, address: &str) -> Option<Session> {
        self.sessions().remove(address)
    }
}

/// Map free text like "I'm a coach" to the role it names.
pub(crate) fn role_from_vocabulary(text: &str) -> Option<Role> {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let trainer = words
        .iter()
        .any(|w| matches!(*w, "trainer" | "coach" | "instructor" | "pt"));
    let client = words
        .iter()
        .any(|w| matches!(*w, "client" | "trainee" | "student" | "athlete"));
    match (trainer, client) {
        (true, false) => Some(Role::Trainer),
        (false, true) => Some(Role::Client),
        _ => None,
    }
}
