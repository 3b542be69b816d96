use crate::presence::PresenceSignaler;
use parley_channels::Channel;
use parley_core::ParleyError;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Turns a failed exchange into a user-visible apology.
pub struct ErrorRecoveryHandler {
    channel: Arc<dyn Channel>,
    presence: PresenceSignaler,
    send_timeout: Duration,
}

impl ErrorRecoveryHandler {
    pub fn new(channel: Arc<dyn Channel>, presence: PresenceSignaler, send_timeout: Duration) -> Self {
        Self {
            channel,
            presence,
            send_timeout,
        }
    }

    /// Logs `err`, clears the typing indicator if it may still be on and
    /// tells the user something went wrong. Never fails.
    pub async fn recover(&self, chat_id: &str, err: &ParleyError, presence_active: bool) {
        error!(chat_id, error = %err, "Exchange failed");

        if presence_active {
            self.presence.end(chat_id).await;
        }

        let text = apology_for(err);
        match tokio::time::timeout(self.send_timeout, self.channel.send_text(chat_id, &text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(chat_id, error = %e, "Failed to send error message to user"),
            Err(_) => error!(chat_id, "Timed out sending error message to user"),
        }
    }
}

/// The apology text for a failed exchange, embedding the error message.
pub fn apology_for(err: &ParleyError) -> String {
    format!(
        "Whoops, looks like my system hit a snag. Please try again later.\n\n(Error details: {err})"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apology_embeds_error_message() {
        let text = apology_for(&ParleyError::Backend("quota exceeded".into()));
        assert!(text.starts_with("Whoops, looks like my system hit a snag."));
        assert!(text.ends_with("(Error details: Backend error: quota exceeded)"));
    }
}
