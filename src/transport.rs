//! Transport abstraction for room connections.
//!
//! A [`Transport`] is one open, bidirectional text channel to the room
//! server. A [`Connector`] opens a fresh transport for a room URL; the
//! connection layer calls it once per attempt, so reconnecting never reuses a
//! transport.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use mystery_room_client::error::RoomClientError;
//! use mystery_room_client::transport::{Received, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), RoomClientError> {
//!         // Send one JSON text message
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Received {
//!         // Wait for the next JSON text message or the close
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RoomClientError> {
//!         unimplemented!()
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::close_codes::CloseCode;
use crate::error::RoomClientError;

/// Code and reason reported when a transport closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFrame {
    pub code: CloseCode,
    #[serde(default)]
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: impl Into<CloseCode>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// The peer closed without sending a status code (1005).
    pub fn no_status() -> Self {
        Self::new(CloseCode::NoStatus, "")
    }

    /// The link dropped without a close handshake (1006).
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Abnormal, reason)
    }

    /// Local, user-requested close (1000).
    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "client disconnect")
    }
}

/// Outcome of one [`Transport::recv`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A complete text frame.
    Text(String),
    /// The transport is closed; no further frames will arrive.
    Closed(CloseFrame),
}

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message
/// and each call to [`recv`](Transport::recv) yields one. Read errors are not
/// surfaced separately: a broken link is reported as
/// [`Received::Closed`] with [`CloseCode::Abnormal`].
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the connection
/// task polls it inside `tokio::select!`.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`RoomClientError::TransportSend`] if the write fails, or
    /// [`RoomClientError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), RoomClientError>;

    /// Wait for the next text frame or the close.
    async fn recv(&mut self) -> Received;

    /// Close the transport gracefully. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), RoomClientError>;
}

/// Opens transports to a room URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new transport to `url`.
    ///
    /// # Errors
    ///
    /// Any error means the transport never opened.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, RoomClientError>;
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_decodes_without_reason() {
        let frame: CloseFrame = serde_json::from_str(r#"{"code":4001}"#).unwrap();
        assert_eq!(frame.code, CloseCode::Unauthorized);
        assert!(frame.reason.is_empty());
    }

    #[test]
    fn transport_trait_is_object_safe() {
        fn assert_object_safe(_: Option<Box<dyn Transport>>) {}
        assert_object_safe(None);
    }
}
