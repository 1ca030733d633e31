//! Shared error type across sockchan crates.

use thiserror::Error;

/// Stable error codes (logged, and asserted on by tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Socket could not be established, or the connect timed out.
    Connection,
    /// Read/write failure on an established connection.
    Transport,
    /// Malformed frame or undecodable envelope.
    Protocol,
    /// Server understood the request but reported failure.
    Application,
    /// Sender loop gave up after the retry budget.
    RetryExhausted,
    /// Caller revoked interest, or the channel was disposed underneath it.
    Cancelled,
    /// Operation attempted on a disposed channel.
    Disposed,
    /// Invalid configuration.
    Config,
}

impl ErrorCode {
    /// String representation used in logs and test vectors.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Connection => "CONNECTION",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Application => "APPLICATION",
            ErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Disposed => "DISPOSED",
            ErrorCode::Config => "CONFIG",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Unified error type used by core, client and server.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("{0}")]
    Application(String),
    #[error("failed to send request after {retries} retries: {last_error}")]
    RetryExhausted { retries: u32, last_error: String },
    #[error("cancelled")]
    Cancelled,
    #[error("channel disposed")]
    Disposed,
    #[error("config: {0}")]
    Config(String),
}

impl ChannelError {
    /// Map to the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ChannelError::Connection(_) => ErrorCode::Connection,
            ChannelError::Transport(_) => ErrorCode::Transport,
            ChannelError::Protocol(_) => ErrorCode::Protocol,
            ChannelError::Application(_) => ErrorCode::Application,
            ChannelError::RetryExhausted { .. } => ErrorCode::RetryExhausted,
            ChannelError::Cancelled => ErrorCode::Cancelled,
            ChannelError::Disposed => ErrorCode::Disposed,
            ChannelError::Config(_) => ErrorCode::Config,
        }
    }

    /// Faults the loops recover from by reconnecting.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            ChannelError::Connection(_) | ChannelError::Transport(_) | ChannelError::Protocol(_)
        )
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Transport(e.to_string())
    }
}
