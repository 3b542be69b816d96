use crate::channel::{
    Channel, InboundMessage, MediaPayload, MediaSource, OutboundMessage, TransportEvent,
};
use async_trait::async_trait;
use parley_core::{ParleyError, ParleyResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);
/// `sendMessage` text limit, counted in UTF-16 code units.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Telegram Bot API channel adapter.
///
/// Uses the Telegram Bot HTTP API for sending messages and long-polling
/// (`getUpdates`) for receiving them. Lifecycle and message events are
/// forwarded through a `tokio::sync::mpsc` channel as [`TransportEvent`]s.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
    bot_id: OnceLock<i64>,
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: Option<mpsc::Receiver<TransportEvent>>,
    shutdown: watch::Sender<bool>,
}

// ── Telegram API response types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

impl<T> TelegramResponse<T> {
    fn failure(&self, method: &str) -> ParleyError {
        ParleyError::Channel(format!(
            "Telegram {method} failed: {}",
            self.description.as_deref().unwrap_or("unknown error")
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessagePayload>,
    channel_post: Option<TelegramMessagePayload>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessagePayload {
    message_id: i64,
    from: Option<TelegramUser>,
    chat: TelegramChat,
    text: Option<String>,
    caption: Option<String>,
    #[serde(default)]
    photo: Vec<TelegramPhotoSize>,
    document: Option<TelegramFileRef>,
    video: Option<TelegramFileRef>,
    voice: Option<TelegramFileRef>,
    audio: Option<TelegramFileRef>,
    sticker: Option<TelegramSticker>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramPhotoSize {
    file_id: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct TelegramFileRef {
    file_id: String,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramSticker {
    file_id: String,
    #[serde(default)]
    is_animated: bool,
    #[serde(default)]
    is_video: bool,
}

impl TelegramSticker {
    /// Static stickers are WEBP images; animated ones are TGS (gzipped
    /// Lottie) and video ones WEBM.
    fn mime_type(&self) -> &'static str {
        if self.is_animated {
            "application/x-tgsticker"
        } else if self.is_video {
            "video/webm"
        } else {
            "image/webp"
        }
    }
}

#[derive(Debug, Deserialize)]
struct TelegramFileInfo {
    file_path: Option<String>,
}

impl TelegramMessagePayload {
    /// The attachment to hand to the relay, as `(file_id, mime_type)`.
    ///
    /// Photos arrive in several sizes; the largest one wins. Telegram always
    /// re-encodes photos as JPEG.
    fn attachment(&self) -> Option<(String, String)> {
        if let Some(largest) = self
            .photo
            .iter()
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
        {
            return Some((largest.file_id.clone(), "image/jpeg".to_string()));
        }

        [
            (&self.document, "application/octet-stream"),
            (&self.video, "video/mp4"),
            (&self.voice, "audio/ogg"),
            (&self.audio, "audio/mpeg"),
        ]
        .into_iter()
        .find_map(|(file, fallback)| {
            file.as_ref().map(|f| {
                (
                    f.file_id.clone(),
                    f.mime_type.clone().unwrap_or_else(|| fallback.to_string()),
                )
            })
        })
        .or_else(|| {
            self.sticker
                .as_ref()
                .map(|s| (s.file_id.clone(), s.mime_type().to_string()))
        })
    }
}

/// A Telegram attachment, downloaded on demand via `getFile`.
struct TelegramFile {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    file_id: String,
    mime_type: String,
}

impl fmt::Debug for TelegramFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramFile")
            .field("file_id", &self.file_id)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MediaSource for TelegramFile {
    async fn fetch(&self) -> ParleyResult<Option<MediaPayload>> {
        let url = api_url(&self.api_base, &self.bot_token, "getFile");
        let body: TelegramResponse<TelegramFileInfo> = self
            .client
            .get(&url)
            .query(&[("file_id", self.file_id.as_str())])
            .send()
            .await
            .map_err(|e| ParleyError::Media(format!("Telegram getFile error: {e}")))?
            .json()
            .await
            .map_err(|e| ParleyError::Media(format!("Telegram parse error: {e}")))?;

        if !body.ok {
            return Err(ParleyError::Media(format!(
                "Telegram getFile failed: {}",
                body.description.unwrap_or_default()
            )));
        }

        let Some(file_path) = body.result.and_then(|f| f.file_path) else {
            return Ok(None);
        };

        let download = format!("{}/file/bot{}/{}", self.api_base, self.bot_token, file_path);
        let response = self
            .client
            .get(&download)
            .send()
            .await
            .map_err(|e| ParleyError::Media(format!("Telegram download error: {e}")))?;

        if !response.status().is_success() {
            return Err(ParleyError::Media(format!(
                "Telegram download failed with status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ParleyError::Media(format!("Telegram download error: {e}")))?;

        Ok(Some(MediaPayload::new(bytes.to_vec(), self.mime_type.clone())))
    }
}

// ── Implementation ──────────────────────────────────────────────────────────

impl TelegramChannel {
    /// Create a new `TelegramChannel`.
    ///
    /// * `bot_token` – The bot token obtained from @BotFather.
    /// * `event_buffer` – Capacity of the internal mpsc event buffer.
    pub fn new(bot_token: impl Into<String>, event_buffer: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let (shutdown, _) = watch::channel(false);
        Self {
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: 30,
            client: reqwest::Client::new(),
            bot_id: OnceLock::new(),
            event_tx,
            event_rx: Some(event_rx),
            shutdown,
        }
    }

    /// Point the adapter at a different Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Long-poll timeout passed to `getUpdates`.
    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    /// Take the receiving half of the event channel.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.event_rx.take()
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn api_url(&self, method: &str) -> String {
        api_url(&self.api_base, &self.bot_token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> ParleyResult<TelegramResponse<T>> {
        self.client
            .post(self.api_url(method))
            .json(payload)
            .send()
            .await
            .map_err(|e| ParleyError::Channel(format!("Telegram {method} error: {e}")))?
            .json()
            .await
            .map_err(|e| ParleyError::Channel(format!("Telegram parse error: {e}")))
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }

    async fn authenticate(&self) -> ParleyResult<()> {
        let body: TelegramResponse<TelegramUser> =
            self.call("getMe", &serde_json::json!({})).await?;

        match body.result {
            Some(me) if body.ok => {
                info!(
                    bot_id = me.id,
                    username = me.username.as_deref().unwrap_or_default(),
                    "Telegram bot authenticated"
                );
                let _ = self.bot_id.set(me.id);
                self.emit(TransportEvent::Authenticated).await;
                Ok(())
            }
            _ => {
                let reason = body
                    .description
                    .unwrap_or_else(|| "getMe was rejected".to_string());
                self.emit(TransportEvent::AuthFailed(reason.clone())).await;
                Err(ParleyError::Auth(reason))
            }
        }
    }

    async fn get_updates(&self, offset: Option<i64>) -> ParleyResult<Vec<TelegramUpdate>> {
        let mut payload = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "channel_post"],
        });
        if let Some(off) = offset {
            payload["offset"] = serde_json::json!(off);
        }

        let body: TelegramResponse<Vec<TelegramUpdate>> = self.call("getUpdates", &payload).await?;
        if !body.ok {
            return Err(body.failure("getUpdates"));
        }
        Ok(body.result.unwrap_or_default())
    }

    fn to_event(&self, update: TelegramUpdate) -> Option<TransportEvent> {
        if let Some(msg) = update.message {
            return Some(TransportEvent::MessageReceived(self.to_inbound(msg, false)));
        }
        // Channel posts are broadcasts, not conversations.
        update
            .channel_post
            .map(|post| TransportEvent::MessageReceived(self.to_inbound(post, true)))
    }

    fn to_inbound(&self, msg: TelegramMessagePayload, is_status: bool) -> InboundMessage {
        let from_self = match (msg.from.as_ref(), self.bot_id.get()) {
            (Some(user), Some(bot_id)) => user.id == *bot_id,
            _ => false,
        };

        let media = msg.attachment().map(|(file_id, mime_type)| {
            Arc::new(TelegramFile {
                client: self.client.clone(),
                api_base: self.api_base.clone(),
                bot_token: self.bot_token.clone(),
                file_id,
                mime_type,
            }) as Arc<dyn MediaSource>
        });

        InboundMessage {
            message_id: msg.message_id.to_string(),
            sender_id: msg.chat.id.to_string(),
            body: msg.text.or(msg.caption),
            has_media: media.is_some(),
            is_status,
            from_self,
            media,
        }
    }
}

/// Splits `text` into pieces of at most `max_len` UTF-16 code units.
///
/// A piece ends after the last newline in its second half when there is one,
/// otherwise at the limit. Pieces never split a character.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.is_empty() {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut units = 0;
        let mut end = rest.len();
        let mut last_newline = None;
        for (idx, ch) in rest.char_indices() {
            if units + ch.len_utf16() > max_len {
                end = idx;
                break;
            }
            units += ch.len_utf16();
            if ch == '\n' {
                last_newline = Some(idx + 1);
            }
        }

        if end < rest.len() {
            if let Some(newline) = last_newline.filter(|&nl| nl >= end / 2) {
                end = newline;
            }
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }

        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

fn api_url(api_base: &str, bot_token: &str, method: &str) -> String {
    format!("{api_base}/bot{bot_token}/{method}")
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    /// Authenticates with `getMe`, then long-polls `getUpdates` until
    /// [`Channel::shutdown`] is called or the event receiver is dropped.
    async fn run(&self) -> ParleyResult<()> {
        let mut shutdown = self.shutdown.subscribe();

        self.authenticate().await?;
        if !self.emit(TransportEvent::Ready).await {
            return Ok(());
        }

        let mut offset: Option<i64> = None;

        while !*shutdown.borrow() {
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.get_updates(offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        // Advance the offset so we do not receive this update again.
                        offset = Some(update.update_id + 1);
                        if let Some(event) = self.to_event(update) {
                            if !self.emit(event).await {
                                return Ok(());
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Telegram poll failed, retrying");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        () = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!("Telegram polling stopped");
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> ParleyResult<()> {
        let reply_to = message
            .reply_to
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok());

        for (idx, chunk) in chunk_message(&message.text, TELEGRAM_MAX_MESSAGE_LEN)
            .into_iter()
            .enumerate()
        {
            let mut payload = serde_json::json!({
                "chat_id": message.chat_id,
                "text": chunk,
            });
            // Only the first piece quotes the original message.
            if let Some(reply_to) = reply_to.filter(|_| idx == 0) {
                payload["reply_parameters"] = serde_json::json!({
                    "message_id": reply_to,
                    "allow_sending_without_reply": true,
                });
            }

            let body: TelegramResponse<serde_json::Value> =
                self.call("sendMessage", &payload).await?;
            if !body.ok {
                return Err(body.failure("sendMessage"));
            }
        }
        Ok(())
    }

    async fn start_typing(&self, chat_id: &str) -> ParleyResult<()> {
        let payload = serde_json::json!({ "chat_id": chat_id, "action": "typing" });
        let body: TelegramResponse<serde_json::Value> =
            self.call("sendChatAction", &payload).await?;
        if !body.ok {
            return Err(body.failure("sendChatAction"));
        }
        Ok(())
    }

    async fn clear_typing(&self, chat_id: &str) -> ParleyResult<()> {
        // The Bot API has no "stop typing"; the indicator lapses on its own
        // and is cleared as soon as a message is sent.
        debug!(chat_id = %chat_id, "Telegram typing indicator left to expire");
        Ok(())
    }

    async fn shutdown(&self) -> ParleyResult<()> {
        self.shutdown.send_replace(true);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn update(json: serde_json::Value) -> TelegramUpdate {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn text_message_maps_to_inbound() {
        let channel = TelegramChannel::new("TOKEN", 8);
        let event = channel.to_event(update(serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": {"id": 77, "first_name": "Ana"},
                "chat": {"id": 77},
                "text": "Hello"
            }
        })));

        let Some(TransportEvent::MessageReceived(msg)) = event else {
            panic!("expected MessageReceived");
        };
        assert_eq!(msg.sender_id, "77");
        assert_eq!(msg.message_id, "5");
        assert_eq!(msg.body.as_deref(), Some("Hello"));
        assert!(!msg.has_media);
        assert!(!msg.is_status);
        assert!(!msg.from_self);
    }

    #[test]
    fn photo_picks_largest_size_and_caption() {
        let channel = TelegramChannel::new("TOKEN", 8);
        let payload: TelegramMessagePayload = serde_json::from_value(serde_json::json!({
            "message_id": 6,
            "chat": {"id": 1},
            "caption": "what is this",
            "photo": [
                {"file_id": "small", "width": 90, "height": 90},
                {"file_id": "large", "width": 1280, "height": 960},
                {"file_id": "medium", "width": 320, "height": 240}
            ]
        }))
        .unwrap();

        assert_eq!(
            payload.attachment(),
            Some(("large".to_string(), "image/jpeg".to_string()))
        );
        let msg = channel.to_inbound(payload, false);
        assert!(msg.has_media);
        assert_eq!(msg.body.as_deref(), Some("what is this"));
    }

    #[test]
    fn voice_note_keeps_declared_mime() {
        let payload: TelegramMessagePayload = serde_json::from_value(serde_json::json!({
            "message_id": 7,
            "chat": {"id": 1},
            "voice": {"file_id": "v1", "mime_type": "audio/ogg"}
        }))
        .unwrap();
        assert_eq!(
            payload.attachment(),
            Some(("v1".to_string(), "audio/ogg".to_string()))
        );
    }

    #[test]
    fn sticker_kinds_map_to_their_formats() {
        let sticker = |extra: serde_json::Value| -> Option<(String, String)> {
            let mut sticker = serde_json::json!({"file_id": "s1", "width": 512, "height": 512});
            for (k, v) in extra.as_object().unwrap() {
                sticker[k] = v.clone();
            }
            let payload: TelegramMessagePayload = serde_json::from_value(serde_json::json!({
                "message_id": 9,
                "chat": {"id": 1},
                "sticker": sticker
            }))
            .unwrap();
            payload.attachment()
        };

        assert_eq!(
            sticker(serde_json::json!({"is_animated": false, "is_video": false})),
            Some(("s1".to_string(), "image/webp".to_string()))
        );
        assert_eq!(
            sticker(serde_json::json!({"is_animated": true, "is_video": false})),
            Some(("s1".to_string(), "application/x-tgsticker".to_string()))
        );
        assert_eq!(
            sticker(serde_json::json!({"is_animated": false, "is_video": true})),
            Some(("s1".to_string(), "video/webm".to_string()))
        );
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(chunk_message("hello", 4096), vec!["hello"]);
        assert_eq!(chunk_message("", 4096), vec![""]);
    }

    #[test]
    fn long_text_is_split_at_the_limit() {
        let text = "a".repeat(5000);
        let chunks = chunk_message(&text, TELEGRAM_MAX_MESSAGE_LEN);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunks_prefer_newlines_and_respect_characters() {
        let text = format!("{}\n{}", "a".repeat(3000), "b".repeat(3000));
        let chunks = chunk_message(&text, TELEGRAM_MAX_MESSAGE_LEN);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with('\n'));
        assert_eq!(chunks[1], "b".repeat(3000));

        // Astral characters count as two UTF-16 units each.
        let emoji = "\u{1F600}".repeat(3000);
        let chunks = chunk_message(&emoji, TELEGRAM_MAX_MESSAGE_LEN);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 2048);
        assert_eq!(chunks.concat(), emoji);
    }

    #[test]
    fn channel_post_is_flagged_as_status() {
        let channel = TelegramChannel::new("TOKEN", 8);
        let event = channel.to_event(update(serde_json::json!({
            "update_id": 11,
            "channel_post": {"message_id": 1, "chat": {"id": -100}, "text": "news"}
        })));
        let Some(TransportEvent::MessageReceived(msg)) = event else {
            panic!("expected MessageReceived");
        };
        assert!(msg.is_status);
    }

    #[test]
    fn own_messages_are_flagged_as_self() {
        let channel = TelegramChannel::new("TOKEN", 8);
        channel.bot_id.set(999).unwrap();
        let payload: TelegramMessagePayload = serde_json::from_value(serde_json::json!({
            "message_id": 8,
            "from": {"id": 999, "first_name": "Bot"},
            "chat": {"id": 1},
            "text": "echo"
        }))
        .unwrap();
        assert!(channel.to_inbound(payload, false).from_self);
    }

    #[test]
    fn unrelated_updates_are_ignored() {
        let channel = TelegramChannel::new("TOKEN", 8);
        assert!(channel
            .to_event(update(serde_json::json!({"update_id": 12})))
            .is_none());
    }

    #[test]
    fn take_event_receiver_only_once() {
        let mut channel = TelegramChannel::new("TOKEN", 8);
        assert!(channel.take_event_receiver().is_some());
        assert!(channel.take_event_receiver().is_none());
    }
}
