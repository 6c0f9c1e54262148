//! Session value storage
//!
//! Sessions are loaded, changed by value, and saved back. Cross-request
//! races on one session are the store's concern.

use dashmap::DashMap;

use super::registry::UserSession;

pub trait SessionStore: Send + Sync {
    fn load(&self, session_key: &str) -> Option<UserSession>;

    fn save(&self, session_key: &str, session: UserSession);

    fn discard(&self, session_key: &str) -> Option<UserSession>;
}

/// In-process store keyed by session token
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, UserSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, session_key: &str) -> Option<UserSession> {
        self.sessions.get(session_key).map(|s| s.value().clone())
    }

    fn save(&self, session_key: &str, session: UserSession) {
        self.sessions.insert(session_key.to_string(), session);
    }

    fn discard(&self, session_key: &str) -> Option<UserSession> {
        self.sessions.remove(session_key).map(|(_, s)| s)
    }
}
