use crate::session::ConversationSession;
use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::Persona;
use std::collections::HashMap;
use tracing::info;

/// Owns every sender's conversation history.
///
/// A missing id is never an error: it is what triggers creation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the stored session, creating a seeded one on first use.
    async fn get_or_create(&self, session_id: &str) -> ConversationSession;
    /// Atomically stores the updated session.
    async fn replace(&self, session_id: &str, session: ConversationSession);
    /// Returns the stored session without creating one.
    async fn get(&self, session_id: &str) -> Option<ConversationSession>;
    /// Number of sessions currently held.
    async fn len(&self) -> usize;
    /// True when no session has been created yet.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Process-lifetime session store. Nothing survives a restart.
pub struct InMemorySessionStore {
    persona: Persona,
    sessions: Mutex<HashMap<String, ConversationSession>>,
}

impl InMemorySessionStore {
    pub fn new(persona: Persona) -> Self {
        Self {
            persona,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, session_id: &str) -> ConversationSession {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(session_id) {
            return existing.clone();
        }
        info!(session_id = %session_id, "Starting new chat history");
        let session = ConversationSession::seeded(session_id, &self.persona);
        sessions.insert(session_id.to_string(), session.clone());
        session
    }

    async fn replace(&self, session_id: &str, session: ConversationSession) {
        self.sessions.lock().insert(session_id.to_string(), session);
    }

    async fn get(&self, session_id: &str) -> Option<ConversationSession> {
        self.sessions.lock().get(session_id).cloned()
    }

    async fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}
