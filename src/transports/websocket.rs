//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries room envelopes as WebSocket text frames.
//! Both `ws://` and `wss://` URLs are accepted; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//! [`WebSocketConnector`] is the [`Connector`] the registry uses by default.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), mystery_room_client::RoomClientError> {
//! use mystery_room_client::{Received, Transport, WebSocketTransport};
//!
//! let mut transport =
//!     WebSocketTransport::connect("ws://localhost:8000/ws/ABC123?token=t").await?;
//! transport.send(r#"{"type":"ping"}"#.to_string()).await?;
//!
//! if let Received::Text(msg) = transport.recv().await {
//!     println!("received: {msg}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::RoomClientError;
use crate::transport::{CloseFrame, Connector, Received, Transport};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// For custom TLS, proxies or headers, build the stream yourself and wrap it
/// with [`WebSocketTransport::from_stream`].
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future never loses
/// a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomClientError::Io`] if the URL is invalid, the server is
    /// unreachable, or the handshake is rejected. I/O error kinds are kept;
    /// everything else maps to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, RoomClientError> {
        // The query carries the credential; keep it out of the logs.
        let endpoint = url.split('?').next().unwrap_or(url);
        tracing::debug!(endpoint, "opening room socket");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            RoomClientError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::debug!(endpoint, "room socket open");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Like [`connect`](Self::connect), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomClientError::Timeout`] if the deadline elapses, or any
    /// error [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: Duration,
    ) -> Result<Self, RoomClientError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| RoomClientError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), RoomClientError> {
        if self.closed {
            return Err(RoomClientError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| RoomClientError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Received {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "room socket read failed");
                    return Received::Closed(CloseFrame::abnormal(e.to_string()));
                }
                None if self.closed => return Received::Closed(CloseFrame::normal()),
                None => return Received::Closed(CloseFrame::abnormal("stream ended")),
            };

            match msg {
                Message::Text(text) => return Received::Text(text.to_string()),
                Message::Close(Some(frame)) => {
                    tracing::debug!(
                        code = u16::from(frame.code),
                        reason = %frame.reason.as_str(),
                        "close frame"
                    );
                    return Received::Closed(CloseFrame::new(
                        u16::from(frame.code),
                        frame.reason.to_string(),
                    ));
                }
                Message::Close(None) => return Received::Closed(CloseFrame::no_status()),
                // tungstenite queues the pong reply itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("unexpected binary frame, skipping");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), RoomClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| RoomClientError::TransportSend(e.to_string()))
    }
}

/// Opens a [`WebSocketTransport`] per connection attempt.
///
/// Without a timeout a hung handshake only ends when the socket itself
/// errors.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail attempts whose handshake takes longer than `timeout`.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, RoomClientError> {
        let transport = match self.connect_timeout {
            Some(timeout) => WebSocketTransport::connect_with_timeout(url, timeout).await?,
            None => WebSocketTransport::connect(url).await?,
        };
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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
    use crate::close_codes::CloseCode;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;

    #[test]
    fn websocket_transport_is_send_and_debug() {
        fn assert_send_debug<T: Send + std::fmt::Debug>() {}
        assert_send_debug::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomClientError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomClientError::Io(_)));
    }

    /// Serve one WebSocket connection with `handler`; returns the URL.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}/ws/ROOM1?token=t")
    }

    #[tokio::test]
    async fn recv_yields_text_frames_in_order() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("hello".into())).await.unwrap();
            ws.send(Message::Text("world".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await, Received::Text("hello".into()));
        assert_eq!(transport.recv().await, Received::Text("world".into()));
    }

    #[tokio::test]
    async fn close_without_code_reports_no_status() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        match transport.recv().await {
            Received::Closed(frame) => assert_eq!(frame.code, CloseCode::NoStatus),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn application_close_code_is_reported() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(WsCloseFrame {
                code: WsCloseCode::from(4004),
                reason: "room not found".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        match transport.recv().await {
            Received::Closed(frame) => {
                assert_eq!(frame.code, CloseCode::RoomUnavailable);
                assert_eq!(frame.reason, "room not found");
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await, Received::Text("after_binary".into()));
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, RoomClientError::TransportClosed));
    }

    #[tokio::test]
    async fn connector_boxes_an_open_transport() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let connector = WebSocketConnector::new().with_connect_timeout(Duration::from_secs(5));
        let mut transport = connector.connect(&url).await.unwrap();
        transport.send(r#"{"type":"ping"}"#.into()).await.unwrap();
        assert_eq!(
            transport.recv().await,
            Received::Text(r#"{"type":"ping"}"#.into())
        );
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Accepts TCP through the backlog but never answers the handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let result = WebSocketTransport::connect_with_timeout(&url, Duration::from_millis(50)).await;
        assert!(matches!(result.unwrap_err(), RoomClientError::Timeout));
        drop(listener);
    }
}
