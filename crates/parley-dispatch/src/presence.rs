use parley_channels::Channel;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shows and clears the "typing..." indicator for a chat.
///
/// Failures are logged and swallowed; a missing indicator never aborts an
/// exchange.
#[derive(Clone)]
pub struct PresenceSignaler {
    channel: Arc<dyn Channel>,
    timeout: Duration,
}

impl PresenceSignaler {
    pub fn new(channel: Arc<dyn Channel>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    pub async fn begin(&self, chat_id: &str) {
        match tokio::time::timeout(self.timeout, self.channel.start_typing(chat_id)).await {
            Ok(Ok(())) => debug!(chat_id, "Typing indicator on"),
            Ok(Err(e)) => warn!(chat_id, error = %e, "Failed to show typing indicator"),
            Err(_) => warn!(chat_id, "Timed out showing typing indicator"),
        }
    }

    pub async fn end(&self, chat_id: &str) {
        match tokio::time::timeout(self.timeout, self.channel.clear_typing(chat_id)).await {
            Ok(Ok(())) => debug!(chat_id, "Typing indicator off"),
            Ok(Err(e)) => warn!(chat_id, error = %e, "Failed to clear typing indicator"),
            Err(_) => warn!(chat_id, "Timed out clearing typing indicator"),
        }
    }
}
