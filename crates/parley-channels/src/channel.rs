use async_trait::async_trait;
use parley_core::{truncate_chars, ParleyResult};
use std::fmt;
use std::sync::Arc;

/// Raw bytes of a downloaded attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl MediaPayload {
    pub fn new(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Lazily downloads the attachment of an inbound message.
#[async_trait]
pub trait MediaSource: Send + Sync + fmt::Debug {
    /// `Ok(None)` means the transport had nothing to hand over.
    async fn fetch(&self) -> ParleyResult<Option<MediaPayload>>;
}

/// Transport-agnostic description of one inbound message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Transport message id, used for reply-to.
    pub message_id: String,
    /// Sender identifier; also the session identifier.
    pub sender_id: String,
    pub body: Option<String>,
    pub has_media: bool,
    pub is_status: bool,
    pub from_self: bool,
    pub media: Option<Arc<dyn MediaSource>>,
}

impl InboundMessage {
    /// A plain text message.
    pub fn text(
        message_id: impl Into<String>,
        sender_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            sender_id: sender_id.into(),
            body: Some(body.into()),
            has_media: false,
            is_status: false,
            from_self: false,
            media: None,
        }
    }

    /// Attaches a media source and sets the media flag.
    pub fn with_media(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.has_media = true;
        self.media = Some(source);
        self
    }

    /// Replaces the body (the caption, for media messages).
    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    /// The body if it holds any text at all.
    pub fn text_body(&self) -> Option<&str> {
        self.body.as_deref().filter(|b| !b.is_empty())
    }

    /// One-line description for the "message received" log.
    pub fn log_summary(&self) -> String {
        match (self.has_media, self.text_body()) {
            (true, Some(caption)) => {
                format!("[MEDIA] Caption: \"{}\"", truncate_chars(caption, 100))
            }
            (true, None) => "[MEDIA]".to_string(),
            (false, Some(body)) => format!("\"{}\"", truncate_chars(body, 100)),
            (false, None) => "[EMPTY OR UNKNOWN MESSAGE TYPE]".to_string(),
        }
    }
}

/// A message going out through a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    /// Quote this transport message id, if set.
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            reply_to: None,
        }
    }

    /// A reply quoting `original`.
    pub fn reply(original: &InboundMessage, text: impl Into<String>) -> Self {
        Self {
            chat_id: original.sender_id.clone(),
            text: text.into(),
            reply_to: Some(original.message_id.clone()),
        }
    }
}

/// Lifecycle and message events emitted by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A pairing code the operator must scan.
    QrReady(String),
    Authenticated,
    /// Fatal: the relay must stop.
    AuthFailed(String),
    Ready,
    MessageReceived(InboundMessage),
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Connects and pumps [`TransportEvent`]s until [`Channel::shutdown`].
    async fn run(&self) -> ParleyResult<()>;

    async fn send(&self, message: OutboundMessage) -> ParleyResult<()>;

    async fn start_typing(&self, chat_id: &str) -> ParleyResult<()>;

    async fn clear_typing(&self, chat_id: &str) -> ParleyResult<()>;

    /// Stops [`Channel::run`] and releases the connection.
    async fn shutdown(&self) -> ParleyResult<()>;

    async fn reply(&self, original: &InboundMessage, text: &str) -> ParleyResult<()> {
        self.send(OutboundMessage::reply(original, text)).await
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> ParleyResult<()> {
        self.send(OutboundMessage::new(chat_id, text)).await
    }
}
