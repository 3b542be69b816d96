//! Chat transport abstraction for the Parley relay.
//!
//! Provides a unified [`Channel`] trait, the typed [`TransportEvent`] stream
//! transports emit, and concrete transports.
//!
//! # Main types
//!
//! - [`Channel`]: Trait for sending messages and typing signals on a platform.
//! - [`InboundMessage`]: Transport-agnostic inbound message descriptor.
//! - [`TelegramChannel`]: Telegram Bot API transport.
//! - [`ConsoleChannel`]: stdin/stdout transport for local use.

/// Core channel trait and message types.
pub mod channel;
/// Terminal channel implementation.
pub mod console;
/// Telegram channel integration.
pub mod telegram;

pub use channel::{
    Channel, InboundMessage, MediaPayload, MediaSource, OutboundMessage, TransportEvent,
};
pub use console::{ConsoleChannel, LocalFile};
pub use telegram::TelegramChannel;
