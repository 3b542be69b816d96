use crate::normalizer::{Command, MessageNormalizer, Normalization, NormalizedTurn, SkipReason};
use crate::presence::PresenceSignaler;
use crate::recovery::ErrorRecoveryHandler;
use parley_agent::{ChatBackend, ChatResponse};
use parley_channels::{Channel, InboundMessage};
use parley_core::{truncate_chars, ParleyError, ParleyResult};
use parley_session::SessionStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const PONG_REPLY: &str = "Pong!";
pub const UNSUPPORTED_MEDIA_REPLY: &str =
    "Sorry, I can only handle text and image messages right now. Other media isn't supported yet.";
pub const FETCH_FAILED_REPLY: &str =
    "Sorry, something went wrong while downloading the media you sent. Please try again.";
pub const ANOMALY_REPLY: &str = "Sorry, something went wrong while processing your request.";
pub const BLOCKED_REPLY: &str = "Sorry, I can't give a response to that.";

/// Timeouts applied to every external call made during an exchange.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Backend calls, media downloads and message sends.
    pub call_timeout: Duration,
    /// Typing indicator calls.
    pub presence_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
            presence_timeout: Duration::from_secs(10),
        }
    }
}

/// How a single inbound message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Skipped(SkipReason),
    /// A command was answered directly.
    Command,
    /// Unsupported or undownloadable media; the user was told.
    Rejected,
    /// The model declined; history is unchanged.
    Blocked,
    /// The reply was delivered and the exchange appended to history.
    Committed { turns: usize },
    Failed,
}

/// Runs one inbound message through normalization, the AI backend and the
/// reply path.
///
/// The dispatcher holds no per-session lock. Callers must not run two
/// exchanges for the same sender concurrently; see
/// [`SessionRouter`](crate::router::SessionRouter).
pub struct TurnDispatcher {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn ChatBackend>,
    channel: Arc<dyn Channel>,
    normalizer: MessageNormalizer,
    presence: PresenceSignaler,
    recovery: ErrorRecoveryHandler,
    call_timeout: Duration,
}

/// A failure during the AI exchange, and whether typing may still be shown.
struct ExchangeFailure {
    error: ParleyError,
    presence_active: bool,
}

impl ExchangeFailure {
    fn after_presence(error: ParleyError) -> Self {
        Self {
            error,
            presence_active: false,
        }
    }
}

impl TurnDispatcher {
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn ChatBackend>,
        channel: Arc<dyn Channel>,
        config: DispatcherConfig,
    ) -> Self {
        let presence = PresenceSignaler::new(channel.clone(), config.presence_timeout);
        let recovery =
            ErrorRecoveryHandler::new(channel.clone(), presence.clone(), config.call_timeout);
        Self {
            store,
            backend,
            channel,
            normalizer: MessageNormalizer::new(config.call_timeout),
            presence,
            recovery,
            call_timeout: config.call_timeout,
        }
    }

    /// Handles one inbound message end to end. Never fails; every error is
    /// turned into a user-visible apology.
    pub async fn handle(&self, msg: InboundMessage) -> ExchangeOutcome {
        let span = info_span!(
            "exchange",
            exchange_id = %Uuid::new_v4(),
            session_id = %msg.sender_id,
        );
        self.dispatch(&msg).instrument(span).await
    }

    async fn dispatch(&self, msg: &InboundMessage) -> ExchangeOutcome {
        let turn = match self.normalizer.normalize(msg).await {
            Normalization::Skip(reason) => {
                info!(reason = reason.as_str(), "Message ignored");
                return ExchangeOutcome::Skipped(reason);
            }
            Normalization::Command(Command::Ping) => {
                info!("Answering /ping");
                return self.quick_reply(msg, PONG_REPLY, ExchangeOutcome::Command).await;
            }
            Normalization::Unsupported { mime_type } => {
                info!(%mime_type, "Ignoring non-image media");
                return self
                    .quick_reply(msg, UNSUPPORTED_MEDIA_REPLY, ExchangeOutcome::Rejected)
                    .await;
            }
            Normalization::FetchFailed => {
                warn!("Could not download media");
                return self
                    .quick_reply(msg, FETCH_FAILED_REPLY, ExchangeOutcome::Rejected)
                    .await;
            }
            Normalization::Normalized(turn) => turn,
        };

        let chat_id = msg.sender_id.as_str();
        self.presence.begin(chat_id).await;

        match self.exchange(chat_id, turn).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.recovery
                    .recover(chat_id, &failure.error, failure.presence_active)
                    .await;
                ExchangeOutcome::Failed
            }
        }
    }

    async fn exchange(
        &self,
        chat_id: &str,
        turn: NormalizedTurn,
    ) -> Result<ExchangeOutcome, ExchangeFailure> {
        let mut session = self.store.get_or_create(chat_id).await;
        info!(
            history_turns = session.turn_count(),
            "Sending to AI: \"{}...\"", turn.log_summary
        );

        let response = bounded(
            self.call_timeout,
            "AI backend call",
            self.backend.chat_turn(session.turns(), &turn.prompt_parts),
        )
        .await
        .map_err(|error| ExchangeFailure {
            error,
            presence_active: true,
        })?;

        self.presence.end(chat_id).await;

        match response {
            ChatResponse::Text(reply) => {
                info!("AI reply: \"{}...\"", truncate_chars(&reply, 100));
                self.send(chat_id, &reply).await?;

                session.commit_exchange(turn.user_parts, reply);
                let turns = session.turn_count();
                self.store.replace(chat_id, session).await;
                Ok(ExchangeOutcome::Committed { turns })
            }
            ChatResponse::Blocked {
                reason,
                safety_ratings,
            } => {
                warn!(
                    block_reason = reason.as_deref().unwrap_or("none"),
                    safety_ratings = %serde_json::to_string(&safety_ratings).unwrap_or_default(),
                    "AI response blocked"
                );
                self.send(chat_id, &blocked_reply(reason.as_deref())).await?;
                Ok(ExchangeOutcome::Blocked)
            }
            ChatResponse::Missing => {
                error!("AI backend returned no result");
                self.send(chat_id, ANOMALY_REPLY).await?;
                Ok(ExchangeOutcome::Failed)
            }
        }
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ExchangeFailure> {
        bounded(
            self.call_timeout,
            "sending message",
            self.channel.send_text(chat_id, text),
        )
        .await
        .map_err(ExchangeFailure::after_presence)
    }

    async fn quick_reply(
        &self,
        msg: &InboundMessage,
        text: &str,
        outcome: ExchangeOutcome,
    ) -> ExchangeOutcome {
        match bounded(self.call_timeout, "sending reply", self.channel.reply(msg, text)).await {
            Ok(()) => outcome,
            Err(e) => {
                self.recovery.recover(&msg.sender_id, &e, false).await;
                ExchangeOutcome::Failed
            }
        }
    }
}

/// The reply sent when the model declines, naming the reason if known.
pub fn blocked_reply(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("{BLOCKED_REPLY} (Reason: {reason})"),
        None => BLOCKED_REPLY.to_string(),
    }
}

async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = ParleyResult<T>>,
) -> ParleyResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ParleyError::Timeout(format!("{what} after {}s", limit.as_secs_f32())))?
}
