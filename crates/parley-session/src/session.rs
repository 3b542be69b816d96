use chrono::{DateTime, Utc};
use parley_core::{ContentPart, Persona, Turn};
use serde::Serialize;

/// The ordered conversation history of one sender.
///
/// A session always starts with the persona turn and the greeting turn, and
/// only ever grows by a (user, model) pair per successful exchange, so the
/// turn count is even and never below two.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationSession {
    pub session_id: String,
    turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    /// Creates a session seeded with the persona prompt and greeting.
    pub fn seeded(session_id: impl Into<String>, persona: &Persona) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            turns: vec![
                Turn::user_text(persona.system_prompt()),
                Turn::model_text(persona.greeting()),
            ],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Number of committed exchanges, excluding the seed pair.
    pub fn exchange_count(&self) -> usize {
        self.turns.len().saturating_sub(2) / 2
    }

    /// Appends one completed exchange: the user's parts followed by the
    /// model's text reply.
    pub fn commit_exchange(&mut self, user_parts: Vec<ContentPart>, reply: impl Into<String>) {
        self.updated_at = Utc::now();
        self.turns.push(Turn::user(user_parts));
        self.turns.push(Turn::model_text(reply));
    }
}
