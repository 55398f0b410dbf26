//! Connection and projector configuration.

use std::time::Duration;

use url::Url;

use crate::error::Result;

/// Default number of automatic reconnection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default delay unit for the linear reconnection backoff.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default ceiling for a single reconnection delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Default period between heartbeat probes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default timeout for closing the transport on disconnect.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default delay before a projector reconnects after `disconnected`.
pub const DEFAULT_AUTO_RECONNECT_DELAY: Duration = Duration::from_secs(2);

// ── Connection ──────────────────────────────────────────────────────

/// Settings shared by every connection a registry creates.
///
/// # Example
///
/// ```
/// use mystery_room_client::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::new("ws://127.0.0.1:8000")
///     .with_token("secret")
///     .with_max_reconnect_attempts(5)
///     .with_heartbeat_interval(Duration::from_secs(15));
///
/// let url = config.room_url("ABC123").unwrap();
/// assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/ABC123?token=secret");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server origin, e.g. `ws://host:8000` or `https://host`. `http(s)` is
    /// rewritten to `ws(s)`.
    pub server_url: String,
    /// Bearer credential appended as the `token` query parameter.
    pub token: Option<String>,
    /// Automatic retries allowed after an unexpected close. Defaults to **10**.
    pub max_reconnect_attempts: u32,
    /// Retry `n` waits `n × reconnect_base_delay`. Defaults to **1 s**.
    pub reconnect_base_delay: Duration,
    /// Upper bound for any single retry delay. Defaults to **30 s**.
    pub reconnect_max_delay: Duration,
    /// Heartbeat probe period while open. Defaults to **10 s**.
    pub heartbeat_interval: Duration,
    /// How long `disconnect()` waits for the transport to close before the
    /// connection task is aborted. Defaults to **1 s**.
    pub shutdown_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    #[must_use]
    pub fn with_reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Values below 1 ms are clamped to 1 ms.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Build `<server_url>/ws/<room_code>?token=<token>`.
    ///
    /// The room code and token are percent-encoded. Any path already on
    /// `server_url` is kept as a prefix.
    ///
    /// # Errors
    ///
    /// Returns [`RoomClientError::InvalidUrl`](crate::RoomClientError::InvalidUrl)
    /// if `server_url` is not an absolute hierarchical URL.
    pub fn room_url(&self, room_code: &str) -> Result<Url> {
        let mut url = Url::parse(&self.server_url)?;

        let ws_scheme = match url.scheme() {
            "http" => Some("ws"),
            "https" => Some("wss"),
            _ => None,
        };
        if let Some(scheme) = ws_scheme {
            // Both schemes are "special", so the switch cannot fail.
            let _ = url.set_scheme(scheme);
        }

        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(["ws", room_code]);

        url.set_query(None);
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

// ── Projector ───────────────────────────────────────────────────────

/// Who is responsible for closing a projector's connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Ownership {
    /// Other consumers may still use the connection; dropping the projector
    /// only removes its listeners.
    #[default]
    Shared,
    /// Dropping the projector also disposes the connection through the
    /// registry.
    Owner,
}

/// Options for [`RoomProjector::mount`](crate::RoomProjector::mount).
#[derive(Debug, Clone)]
pub struct ProjectorOptions {
    /// Call `connect()` as part of mounting. Defaults to `true`.
    pub auto_connect: bool,
    /// Wait before reconnecting after `disconnected`. Defaults to **2 s**.
    pub auto_reconnect_delay: Duration,
    /// Defaults to [`Ownership::Shared`].
    pub ownership: Ownership,
}

impl Default for ProjectorOptions {
    fn default() -> Self {
        Self {
            auto_connect: true,
            auto_reconnect_delay: DEFAULT_AUTO_RECONNECT_DELAY,
            ownership: Ownership::Shared,
        }
    }
}

impl ProjectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    #[must_use]
    pub fn with_auto_reconnect_delay(mut self, delay: Duration) -> Self {
        self.auto_reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
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
    use crate::error::RoomClientError;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::new("ws://localhost:8000");
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnect_max_delay, Duration::from_millis(30_000));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.token.is_none());

        let options = ProjectorOptions::default();
        assert!(options.auto_connect);
        assert_eq!(options.auto_reconnect_delay, Duration::from_secs(2));
        assert_eq!(options.ownership, Ownership::Shared);
    }

    #[test]
    fn heartbeat_interval_is_clamped() {
        let config = ConnectionConfig::new("ws://h").with_heartbeat_interval(Duration::ZERO);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(1));
    }

    #[test]
    fn room_url_without_token() {
        let url = ConnectionConfig::new("ws://localhost:8000")
            .room_url("ROOM42")
            .unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/ROOM42");
    }

    #[test]
    fn room_url_rewrites_http_scheme() {
        let config = ConnectionConfig::new("https://game.example.com").with_token("t");
        let url = config.room_url("ABC").unwrap();
        assert_eq!(url.as_str(), "wss://game.example.com/ws/ABC?token=t");
    }

    #[test]
    fn room_url_keeps_path_prefix_and_encodes() {
        let config = ConnectionConfig::new("ws://host/api/").with_token("a b&c");
        let url = config.room_url("x/y").unwrap();
        assert_eq!(url.as_str(), "ws://host/api/ws/x%2Fy?token=a+b%26c");
    }

    #[test]
    fn room_url_rejects_relative_server_url() {
        let err = ConnectionConfig::new("not a url")
            .room_url("ABC")
            .unwrap_err();
        assert!(matches!(err, RoomClientError::InvalidUrl(_)));
    }
}
