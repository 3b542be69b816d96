use thiserror::Error;

/// A convenience `Result` alias using [`ParleyError`].
pub type ParleyResult<T> = Result<T, ParleyError>;

/// Top-level error type for the Parley relay.
///
/// Each variant corresponds to a subsystem that can fail during startup or
/// while an exchange is in flight.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Invalid or incomplete configuration (e.g. a missing API key).
    #[error("Config error: {0}")]
    Config(String),

    /// The chat transport rejected our credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A transport-level failure (send, typing indicator, polling).
    #[error("Channel error: {0}")]
    Channel(String),

    /// The AI backend returned an error response.
    #[error("Backend error: {0}")]
    Backend(String),

    /// An outbound HTTP request failed before a response was read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Downloading or reading inbound media failed.
    #[error("Media error: {0}")]
    Media(String),

    /// An external call exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
