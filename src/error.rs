//! Error types for the room client.

use thiserror::Error;

/// Errors that can occur when using the room client.
#[derive(Debug, Error)]
pub enum RoomClientError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// The transport connection was already closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configured server URL could not be turned into a room URL.
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A connection attempt failed before the transport opened.
    ///
    /// The reason is a rendered description because a single attempt may be
    /// awaited by several callers at once.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The connection attempt completed after a `disconnect()` or a newer
    /// attempt replaced it; its transport was closed immediately.
    #[error("connection attempt superseded")]
    Superseded,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for room client operations.
pub type Result<T> = std::result::Result<T, RoomClientError>;
