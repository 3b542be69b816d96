use chrono::{DateTime, Local};
use parley_channels::{InboundMessage, MediaPayload};
use parley_core::{truncate_chars, ContentPart};
use std::time::Duration;
use tracing::warn;

/// Why a message produced no exchange at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Status,
    SelfEcho,
    Empty,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Status => "status",
            SkipReason::SelfEcho => "self-echo",
            SkipReason::Empty => "empty",
        }
    }
}

/// Commands answered without consulting the AI backend or history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
}

/// A message ready for the AI backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTurn {
    /// What gets stored in history: the user's content as sent.
    pub user_parts: Vec<ContentPart>,
    /// What gets sent to the backend: the content behind a timestamp header.
    pub prompt_parts: Vec<ContentPart>,
    pub log_summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalization {
    Skip(SkipReason),
    Command(Command),
    Normalized(NormalizedTurn),
    Unsupported { mime_type: String },
    FetchFailed,
}

/// Turns inbound transport messages into canonical turns.
pub struct MessageNormalizer {
    fetch_timeout: Duration,
}

impl MessageNormalizer {
    pub fn new(fetch_timeout: Duration) -> Self {
        Self { fetch_timeout }
    }

    pub async fn normalize(&self, msg: &InboundMessage) -> Normalization {
        self.normalize_at(msg, Local::now()).await
    }

    /// Same as [`MessageNormalizer::normalize`] with an explicit clock.
    pub async fn normalize_at(&self, msg: &InboundMessage, now: DateTime<Local>) -> Normalization {
        if msg.is_status {
            return Normalization::Skip(SkipReason::Status);
        }
        if msg.from_self {
            return Normalization::Skip(SkipReason::SelfEcho);
        }

        let text = msg.text_body();
        if text.is_none() && !msg.has_media {
            return Normalization::Skip(SkipReason::Empty);
        }

        if text.is_some_and(|t| t.trim().to_lowercase() == "/ping") {
            return Normalization::Command(Command::Ping);
        }

        let timestamp = format_timestamp(&now);

        if msg.has_media {
            return match self.fetch_media(msg).await {
                Some(media) if media.is_image() => {
                    Normalization::Normalized(image_turn(text, media, &timestamp))
                }
                Some(media) => Normalization::Unsupported {
                    mime_type: media.mime_type,
                },
                None => Normalization::FetchFailed,
            };
        }

        match text {
            Some(body) => Normalization::Normalized(text_turn(body, &timestamp)),
            None => Normalization::Skip(SkipReason::Empty),
        }
    }

    async fn fetch_media(&self, msg: &InboundMessage) -> Option<MediaPayload> {
        let Some(source) = msg.media.as_ref() else {
            warn!(sender = %msg.sender_id, "Message flagged as media but carries no source");
            return None;
        };

        match tokio::time::timeout(self.fetch_timeout, source.fetch()).await {
            Ok(Ok(Some(media))) => Some(media),
            Ok(Ok(None)) => {
                warn!(sender = %msg.sender_id, "Media download returned nothing");
                None
            }
            Ok(Err(e)) => {
                warn!(sender = %msg.sender_id, error = %e, "Media download failed");
                None
            }
            Err(_) => {
                warn!(
                    sender = %msg.sender_id,
                    timeout_secs = self.fetch_timeout.as_secs(),
                    "Media download timed out"
                );
                None
            }
        }
    }
}

/// Long-form local date and time with the UTC offset.
pub fn format_timestamp(now: &DateTime<Local>) -> String {
    now.format("%A, %-d %B %Y %H:%M:%S %Z").to_string()
}

fn text_turn(body: &str, timestamp: &str) -> NormalizedTurn {
    let prompt = format!("(current time: {timestamp})\nUser message:\n{body}");
    NormalizedTurn {
        user_parts: vec![ContentPart::text(body)],
        log_summary: truncate_chars(&prompt, 100).to_string(),
        prompt_parts: vec![ContentPart::Text(prompt)],
    }
}

fn image_turn(caption: Option<&str>, media: MediaPayload, timestamp: &str) -> NormalizedTurn {
    let mut header = format!("(current time: {timestamp})\n");
    match caption {
        Some(caption) => {
            header.push_str("User message (with image):\n");
            header.push_str(caption);
        }
        None => header.push_str(
            "User message (analyze this image and give a description or a related answer):",
        ),
    }

    let log_summary = format!(
        "{}... [PLUS IMAGE {}]",
        truncate_chars(&header, 70),
        media.mime_type
    );
    let image = ContentPart::image(media.data, media.mime_type);

    let mut user_parts = Vec::with_capacity(2);
    if let Some(caption) = caption {
        user_parts.push(ContentPart::text(caption));
    }
    user_parts.push(image.clone());

    NormalizedTurn {
        user_parts,
        prompt_parts: vec![ContentPart::Text(header), image],
        log_summary,
    }
}
