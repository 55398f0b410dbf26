//! # Mystery Room Client
//!
//! Async client transport for a multiplayer murder-mystery room server.
//!
//! The crate keeps one long-lived connection per room and turns the server's
//! JSON frames into typed [`RoomEvent`]s:
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   bidirectional text channel
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   [`WebSocketConnector`]
//! - **Resilient**: linear-capped reconnection backoff and a periodic `ping`
//!   heartbeat while open
//! - **Shared**: a [`ConnectionRegistry`] hands every consumer of a room the
//!   same [`RoomConnection`]
//! - **Projected**: a [`RoomProjector`] folds events into a [`RoomView`] with
//!   the latest [`RoomStatus`] and a message log
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mystery_room_client::{
//!     ConnectionConfig, ConnectionRegistry, EventKind, RoomEvent, RoomClientError,
//! };
//!
//! # async fn example() -> Result<(), RoomClientError> {
//! let registry = ConnectionRegistry::new(
//!     ConnectionConfig::new("ws://127.0.0.1:8000").with_token("my-token"),
//! );
//! let room = registry.connection("ABC123");
//!
//! room.on(EventKind::Chat, |event| {
//!     if let RoomEvent::Notice { payload, .. } = event {
//!         println!("{:?}: {:?}", payload.send_nickname, payload.message);
//!     }
//! });
//!
//! room.connect().await?;
//! room.send(&mystery_room_client::ClientCommand::Chat {
//!     message: "Who has the key?".into(),
//! });
//! # Ok(())
//! # }
//! ```

pub mod close_codes;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod heartbeat;
pub mod projector;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod transport;
pub mod transports;

pub use close_codes::CloseCode;
pub use config::{ConnectionConfig, Ownership, ProjectorOptions};
pub use connection::{ConnectionState, RoomConnection};
pub use error::{Result, RoomClientError};
pub use event::{EventKind, RoomEvent};
pub use event_bus::{EventBus, ListenerId, Subscription};
pub use heartbeat::HeartbeatMonitor;
pub use projector::{DisplayedMessage, RoomProjector, RoomView};
pub use protocol::{ClientCommand, Envelope, RoomStatus};
pub use reconnect::{ReconnectPolicy, ReconnectScheduler};
pub use registry::ConnectionRegistry;
pub use transport::{CloseFrame, Connector, Received, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
