use std::time::Duration;

use thiserror::Error;

/// Errors produced by the command session, the event server and the codec.
#[derive(Debug, Error)]
pub enum Error {
    /// The command payload could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    /// A received line is not valid JSON for the expected envelope.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),
    /// Socket-level failure. The affected connection is dropped.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// The terminal answered `success=false`.
    #[error("terminal rejected `{command}`: {message}")]
    Protocol { command: String, message: String },
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    /// An earlier call was abandoned mid-exchange; its response may still be
    /// pending on the socket.
    #[error("session desynchronized by an abandoned call, reconnect required")]
    Desynchronized,
    #[error("session closed")]
    SessionClosed,
    #[error("shutdown in progress")]
    ShutdownInProgress,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl Error {
    /// True when the session must be re-established before the next call.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Timeout(_) | Error::Desynchronized | Error::SessionClosed
        )
    }

    /// True when the terminal rejected the command but the connection is intact.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol { .. })
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::ShutdownInProgress)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
