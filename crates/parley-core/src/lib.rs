//! Core types and error definitions for the Parley chat relay.
//!
//! This crate provides the foundational types shared across all Parley
//! crates: the error enum, the multimodal conversation model, and the bot
//! persona.
//!
//! # Main types
//!
//! - [`ParleyError`]: Unified error enum for all Parley subsystems.
//! - [`ParleyResult`]: Convenience alias for `Result<T, ParleyError>`.
//! - [`ContentPart`]: Text or inline image.
//! - [`Turn`]: A role plus ordered content parts.
//! - [`Persona`]: Renders the seeded system prompt and greeting.

/// Error type shared by every crate.
pub mod error;
/// Conversation content model.
pub mod message;
/// Bot persona prompt and greeting.
pub mod persona;

pub use error::{ParleyError, ParleyResult};
pub use message::{ContentPart, Role, Turn};
pub use persona::Persona;

/// Truncates `text` to at most `max_chars` characters without splitting a
/// code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
