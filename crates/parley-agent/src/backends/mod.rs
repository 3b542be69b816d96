pub mod gemini;

use async_trait::async_trait;
use parley_core::{ContentPart, ParleyResult, Turn};
use serde::{Deserialize, Serialize};

/// A safety classification attached to a prompt or candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyRating {
    pub category: String,
    pub probability: String,
    #[serde(default)]
    pub blocked: bool,
}

/// Outcome of one chat turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatResponse {
    /// The model produced a reply.
    Text(String),
    /// The model declined, usually because a safety filter tripped.
    Blocked {
        reason: Option<String>,
        safety_ratings: Vec<SafetyRating>,
    },
    /// The backend answered without any structured result.
    Missing,
}

/// Trait for generative-AI chat backends.
///
/// Implementations receive the full stored history plus the new prompt
/// parts and return exactly one [`ChatResponse`]. Transport or API failures
/// are errors; a refusal is not.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn chat_turn(&self, history: &[Turn], prompt: &[ContentPart])
        -> ParleyResult<ChatResponse>;
}
