//! Room code to [`RoomConnection`] table.
//!
//! Create one registry at startup and hand clones to whatever needs a room
//! connection. A connection lives from the first
//! [`connection`](ConnectionRegistry::connection) call for its room until
//! [`disconnect`](ConnectionRegistry::disconnect) removes it, independent of
//! how many consumers come and go in between.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::connection::RoomConnection;
use crate::transport::Connector;

struct Shared {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    connections: Mutex<HashMap<String, RoomConnection>>,
}

/// Get-or-create table of room connections. Cloning shares the table.
#[derive(Clone)]
pub struct ConnectionRegistry {
    shared: Arc<Shared>,
}

impl ConnectionRegistry {
    /// Registry whose connections open WebSocket transports.
    #[cfg(feature = "transport-websocket")]
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(config, Arc::new(crate::transports::WebSocketConnector::new()))
    }

    /// Registry whose connections open transports through `connector`.
    pub fn with_connector(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// The connection for `room_code`, created (but not connected) on first
    /// use.
    pub fn connection(&self, room_code: &str) -> RoomConnection {
        let mut connections = self.shared.connections.lock();
        if let Some(existing) = connections.get(room_code) {
            return existing.clone();
        }
        debug!(room_code, "creating room connection");
        let connection = RoomConnection::new(
            room_code,
            self.shared.config.clone(),
            Arc::clone(&self.shared.connector),
        );
        connections.insert(room_code.to_string(), connection.clone());
        connection
    }

    /// The connection for `room_code` if one exists.
    pub fn get(&self, room_code: &str) -> Option<RoomConnection> {
        self.shared.connections.lock().get(room_code).cloned()
    }

    /// Disconnect and forget the connection for `room_code`. Returns `false`
    /// if there was none.
    pub fn disconnect(&self, room_code: &str) -> bool {
        let removed = self.shared.connections.lock().remove(room_code);
        match removed {
            Some(connection) => {
                connection.disconnect();
                info!(room_code, "room connection disposed");
                true
            }
            None => false,
        }
    }

    /// Disconnect and forget every connection.
    pub fn disconnect_all(&self) {
        let drained: Vec<RoomConnection> = {
            let mut connections = self.shared.connections.lock();
            connections.drain().map(|(_, connection)| connection).collect()
        };
        for connection in &drained {
            connection.disconnect();
        }
        info!(count = drained.len(), "all room connections disposed");
    }

    pub fn contains(&self, room_code: &str) -> bool {
        self.shared.connections.lock().contains_key(room_code)
    }

    pub fn len(&self) -> usize {
        self.shared.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Managed room codes, sorted.
    pub fn room_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.shared.connections.lock().keys().cloned().collect();
        codes.sort_unstable();
        codes
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("server_url", &self.shared.config.server_url)
            .field("rooms", &self.room_codes())
            .finish()
    }
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
    use crate::error::{Result, RoomClientError};
    use crate::transport::Transport;
    use async_trait::async_trait;

    struct NoConnector;

    #[async_trait]
    impl Connector for NoConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
            Err(RoomClientError::TransportClosed)
        }
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::with_connector(
            ConnectionConfig::new("ws://test"),
            Arc::new(NoConnector),
        )
    }

    #[test]
    fn get_or_create_returns_same_connection() {
        let registry = registry();
        let a = registry.connection("ROOM1");
        let b = registry.connection("ROOM1");
        let c = registry.connection("ROOM2");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.room_codes(), vec!["ROOM1", "ROOM2"]);
    }

    #[test]
    fn disconnect_removes_and_closes() {
        let registry = registry();
        let conn = registry.connection("ROOM1");
        assert!(registry.disconnect("ROOM1"));
        assert!(!registry.disconnect("ROOM1"));
        assert!(conn.is_manually_closed());
        assert!(!registry.contains("ROOM1"));

        let fresh = registry.connection("ROOM1");
        assert!(!fresh.ptr_eq(&conn));
        assert!(!fresh.is_manually_closed());
    }

    #[test]
    fn disconnect_all_clears_everything() {
        let registry = registry();
        let a = registry.connection("A");
        let b = registry.connection("B");
        registry.disconnect_all();
        assert!(registry.is_empty());
        assert!(a.is_manually_closed());
        assert!(b.is_manually_closed());
        assert!(registry.get("A").is_none());
    }

    #[test]
    fn clones_share_the_table() {
        let registry = registry();
        let other = registry.clone();
        let conn = registry.connection("ROOM1");
        assert!(other.get("ROOM1").unwrap().ptr_eq(&conn));
    }
}
