use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ConversationSettings;
use crate::models::Message;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    turns: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The last `window` turns; older ones are never sent to the model.
    pub fn window(&self, window: usize) -> &[Message] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }

    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(Message::user(user));
        self.turns.push(Message::assistant(assistant));
    }

    pub fn keep_last(&mut self, max_turns: usize) {
        let excess = self.turns.len().saturating_sub(max_turns);
        self.turns.drain(..excess);
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub idle_ttl: Duration,
    pub max_sessions: usize,
    pub max_turns: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&ConversationSettings::default())
    }
}

impl From<&ConversationSettings> for SessionLimits {
    fn from(settings: &ConversationSettings) -> Self {
        Self {
            idle_ttl: settings.session_ttl(),
            max_sessions: settings.max_sessions,
            max_turns: settings.history_window,
        }
    }
}

#[derive(Debug)]
struct Session {
    state: ConversationState,
    touched: DateTime<Utc>,
}

/// Sessions idle for longer than the TTL are swept on every access, and the
/// least recently used one makes room once `max_sessions` is reached.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    limits: SessionLimits,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionLimits::default())
    }
}

impl SessionStore {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            limits,
        }
    }

    /// Copy of the session's history; unknown ids start empty.
    pub async fn snapshot(&self, id: Uuid) -> ConversationState {
        self.snapshot_at(id, Utc::now()).await
    }

    pub async fn append(&self, id: Uuid, user: &str, assistant: &str) {
        self.append_at(id, user, assistant, Utc::now()).await
    }

    pub async fn reset(&self, id: Uuid) -> bool {
        self.sessions.lock().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    async fn snapshot_at(&self, id: Uuid, now: DateTime<Utc>) -> ConversationState {
        let mut sessions = self.sessions.lock().await;
        self.evict_idle(&mut sessions, now);
        match sessions.get_mut(&id) {
            Some(session) => {
                session.touched = now;
                session.state.clone()
            }
            None => ConversationState::default(),
        }
    }

    async fn append_at(&self, id: Uuid, user: &str, assistant: &str, now: DateTime<Utc>) {
        let mut sessions = self.sessions.lock().await;
        self.evict_idle(&mut sessions, now);
        if !sessions.contains_key(&id) && sessions.len() >= self.limits.max_sessions {
            evict_least_recent(&mut sessions);
        }

        let session = sessions.entry(id).or_insert_with(|| Session {
            state: ConversationState::default(),
            touched: now,
        });
        session.touched = now;
        session.state.push_exchange(user, assistant);
        session.state.keep_last(self.limits.max_turns);
    }

    fn evict_idle(&self, sessions: &mut HashMap<Uuid, Session>, now: DateTime<Utc>) {
        let before = sessions.len();
        // A clock that moved backwards reads as "just touched".
        let ttl = self.limits.idle_ttl;
        sessions.retain(|_, s| (now - s.touched).to_std().map_or(true, |idle| idle <= ttl));
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!("Evicted {} idle session(s)", evicted);
        }
    }
}

fn evict_least_recent(sessions: &mut HashMap<Uuid, Session>) {
    let oldest = sessions
        .iter()
        .min_by_key(|(_, session)| session.touched)
        .map(|(id, _)| *id);
    if let Some(id) = oldest {
        sessions.remove(&id);
    }
}
