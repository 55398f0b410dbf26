//! One logical connection to a room.
//!
//! [`RoomConnection`] is a cheap, cloneable handle. It owns at most one open
//! transport at a time, driven by a background transport loop that
//! multiplexes outgoing frames, a shutdown signal and incoming frames with
//! `tokio::select!`. Incoming frames are decoded and fanned out through the
//! connection's [`EventBus`].
//!
//! Lifecycle:
//!
//! ```text
//! Idle ─connect()─▶ Connecting ─open─▶ Open ─close─▶ Reconnecting ─timer─▶ Connecting …
//!                       │                 │                │
//!                       └─fail─▶ (close) ─┘    disconnect()─┴─▶ ClosedManual
//!                                   attempts exhausted ─▶ ClosedError
//! ```
//!
//! An unexpected close schedules a retry with linear-capped backoff. Only
//! [`RoomConnection::disconnect`] suppresses retries, until the next explicit
//! [`RoomConnection::connect`].

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{Result, RoomClientError};
use crate::event::{EventKind, RoomEvent};
use crate::event_bus::{EventBus, ListenerId, Subscription};
use crate::heartbeat::HeartbeatMonitor;
use crate::protocol::{ClientCommand, Envelope, ErrorPayload};
use crate::reconnect::{ReconnectPolicy, ReconnectScheduler, Retry};
use crate::transport::{CloseFrame, Connector, Received, Transport};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// A transport-open attempt is in flight.
    Connecting,
    /// The transport is open.
    Open,
    /// Waiting `delay` before retry number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Closed by [`RoomConnection::disconnect`]; no automatic retries.
    ClosedManual,
    /// Closed unexpectedly with no retry left.
    ClosedError,
}

// ── Internal state ──────────────────────────────────────────────────

/// Failure shared by every caller awaiting the same attempt.
#[derive(Debug, Clone)]
enum AttemptError {
    Failed(String),
    Superseded,
}

impl From<AttemptError> for RoomClientError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::Failed(reason) => Self::ConnectFailed(reason),
            AttemptError::Superseded => Self::Superseded,
        }
    }
}

type PendingConnect = Shared<BoxFuture<'static, std::result::Result<(), AttemptError>>>;

/// The transport loop serving one open transport.
///
/// Dropping a link drops both senders, which makes its loop close the
/// transport and exit.
struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: Option<oneshot::Sender<Arc<Inner>>>,
}

impl Link {
    /// Ask the loop to close. The loop holds `keepalive` until it has
    /// reported the close, so the `disconnected` event still goes out when
    /// the caller drops its last handle right after.
    fn request_shutdown(&mut self, keepalive: &Arc<Inner>) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(Arc::clone(keepalive));
        }
    }
}

struct ConnState {
    phase: ConnectionState,
    manual_close: bool,
    next_attempt: u64,
    pending: Option<(u64, PendingConnect)>,
    generation: u64,
    link: Option<Link>,
    /// A link closed by `disconnect()` whose loop has not reported back yet.
    retiring: Option<Link>,
    scheduler: ReconnectScheduler,
    heartbeat: HeartbeatMonitor,
}

struct Inner {
    room_code: String,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    state: Mutex<ConnState>,
}

// ── Handle ──────────────────────────────────────────────────────────

/// Handle to one room's connection. Clones share the same connection.
///
/// Normally obtained from
/// [`ConnectionRegistry::connection`](crate::ConnectionRegistry::connection)
/// rather than constructed directly.
#[derive(Clone)]
pub struct RoomConnection {
    inner: Arc<Inner>,
}

impl RoomConnection {
    pub fn new(
        room_code: impl Into<String>,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let state = ConnState {
            phase: ConnectionState::Idle,
            manual_close: false,
            next_attempt: 0,
            pending: None,
            generation: 0,
            link: None,
            retiring: None,
            scheduler: ReconnectScheduler::new(ReconnectPolicy::from_config(&config)),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval),
        };
        Self {
            inner: Arc::new(Inner {
                room_code: room_code.into(),
                config,
                connector,
                bus: EventBus::new(),
                state: Mutex::new(state),
            }),
        }
    }

    /// Open the transport, or join the attempt already in flight.
    ///
    /// Resolves immediately when already open. Calling `connect` re-enables
    /// automatic reconnection after a [`disconnect`](Self::disconnect). The
    /// attempt counter is left alone; only a successful open resets it.
    ///
    /// # Errors
    ///
    /// - [`RoomClientError::InvalidUrl`] if the room URL cannot be built.
    /// - [`RoomClientError::ConnectFailed`] if the transport did not open. An
    ///   `error` and a `disconnected` event have been emitted and a retry is
    ///   scheduled.
    /// - [`RoomClientError::Superseded`] if `disconnect()` was called while the
    ///   attempt was in flight.
    pub async fn connect(&self) -> Result<()> {
        self.inner.state.lock().manual_close = false;
        self.inner.open_or_join().await
    }

    /// Close the connection and disable automatic reconnection.
    ///
    /// Cancels any retry timer, stops the heartbeat and asks the transport
    /// loop to close, which then emits `disconnected` with code 1000. An
    /// attempt still in flight is abandoned: its transport is closed as soon
    /// as it opens and its callers get [`RoomClientError::Superseded`].
    pub fn disconnect(&self) {
        let mut st = self.inner.state.lock();
        st.manual_close = true;
        st.scheduler.cancel();
        st.heartbeat.stop();
        st.pending = None;
        st.phase = ConnectionState::ClosedManual;
        if let Some(mut link) = st.link.take() {
            link.request_shutdown(&self.inner);
            if let Some(mut previous) = st.retiring.replace(link) {
                previous.request_shutdown(&self.inner);
            }
        }
        info!(room_code = %self.inner.room_code, "disconnect requested");
    }

    /// Queue a command. Logged and dropped when not open.
    pub fn send(&self, command: &ClientCommand) {
        self.inner
            .send_frame(command.kind(), serde_json::to_string(command));
    }

    /// Queue `{"type": kind, "data": data}`. Logged and dropped when not open.
    pub fn send_raw(&self, kind: &str, data: Option<Value>) {
        self.inner
            .send_frame(kind, serde_json::to_string(&Envelope::new(kind, data)));
    }

    // ── Events ──────────────────────────────────────────────────────

    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&RoomEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, listener)
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.bus.off(kind, id)
    }

    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        self.inner.bus.remove_all_listeners(kind);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.bus.listener_count(kind)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn room_code(&self) -> &str {
        &self.inner.room_code
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns `true` while a transport-open attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    pub fn is_manually_closed(&self) -> bool {
        self.inner.state.lock().manual_close
    }

    /// Retries scheduled since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().scheduler.attempts()
    }

    /// Returns `true` if the two handles refer to the same connection.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RoomConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("RoomConnection")
            .field("room_code", &self.inner.room_code)
            .field("state", &st.phase)
            .field("manual_close", &st.manual_close)
            .field("reconnect_attempts", &st.scheduler.attempts())
            .finish()
    }
}

// ── Connection internals ────────────────────────────────────────────

impl Inner {
    async fn open_or_join(self: &Arc<Self>) -> Result<()> {
        let url = self.config.room_url(&self.room_code)?;
        let pending = {
            let mut st = self.state.lock();
            if st.phase == ConnectionState::Open {
                return Ok(());
            }
            match &st.pending {
                Some((_, pending)) => {
                    trace!(room_code = %self.room_code, "joining in-flight connect");
                    pending.clone()
                }
                None => self.start_attempt(&mut st, url.into()),
            }
        };
        pending.await.map_err(RoomClientError::from)
    }

    /// Spawn the open attempt so it completes even if every caller stops
    /// waiting. Called with the state lock held.
    fn start_attempt(self: &Arc<Self>, st: &mut ConnState, url: String) -> PendingConnect {
        st.next_attempt += 1;
        let attempt_id = st.next_attempt;
        st.phase = ConnectionState::Connecting;
        debug!(room_code = %self.room_code, attempt_id, "opening transport");

        let weak = Arc::downgrade(self);
        let connector = Arc::clone(&self.connector);
        let task = tokio::spawn(async move {
            let opened = connector.connect(&url).await;
            match weak.upgrade() {
                Some(inner) => inner.finish_attempt(attempt_id, opened).await,
                None => {
                    if let Ok(mut transport) = opened {
                        let _ = transport.close().await;
                    }
                    Err(AttemptError::Superseded)
                }
            }
        });

        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(AttemptError::Failed(join_err.to_string())),
            }
        }
        .boxed()
        .shared();
        st.pending = Some((attempt_id, pending.clone()));
        pending
    }

    async fn finish_attempt(
        self: &Arc<Self>,
        attempt_id: u64,
        opened: Result<Box<dyn Transport>>,
    ) -> std::result::Result<(), AttemptError> {
        let transport = match opened {
            Ok(transport) => transport,
            Err(err) => return self.fail_attempt(attempt_id, &err),
        };

        let claimed = {
            let mut st = self.state.lock();
            if st.pending.as_ref().is_some_and(|(id, _)| *id == attempt_id) {
                st.pending = None;
                st.generation += 1;
                let generation = st.generation;
                let (outbound, outbound_rx) = mpsc::unbounded_channel();
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                st.scheduler.cancel();
                st.scheduler.reset();
                st.heartbeat.start(outbound.clone());
                st.phase = ConnectionState::Open;
                st.link = Some(Link {
                    generation,
                    outbound,
                    shutdown: Some(shutdown_tx),
                });
                Some((generation, outbound_rx, shutdown_rx))
            } else {
                None
            }
        };

        let Some((generation, outbound_rx, shutdown_rx)) = claimed else {
            debug!(room_code = %self.room_code, attempt_id, "attempt superseded");
            let mut transport = transport;
            let _ = transport.close().await;
            return Err(AttemptError::Superseded);
        };

        info!(room_code = %self.room_code, generation, "room connection open");
        // `connected` reaches listeners before any caller of `connect()`
        // resumes, and before the loop can dispatch a server frame.
        self.bus.emit(&RoomEvent::Connected(None));
        tokio::spawn(transport_loop(
            Arc::downgrade(self),
            generation,
            transport,
            outbound_rx,
            shutdown_rx,
            self.config.shutdown_timeout,
        ));
        Ok(())
    }

    fn fail_attempt(
        self: &Arc<Self>,
        attempt_id: u64,
        err: &RoomClientError,
    ) -> std::result::Result<(), AttemptError> {
        {
            let mut st = self.state.lock();
            if !st.pending.as_ref().is_some_and(|(id, _)| *id == attempt_id) {
                return Err(AttemptError::Superseded);
            }
            st.pending = None;
        }

        warn!(room_code = %self.room_code, error = %err, "transport failed to open");
        self.bus.emit(&RoomEvent::Error(ErrorPayload {
            message: err.to_string(),
            code: None,
        }));
        self.handle_close(None, CloseFrame::abnormal(err.to_string()));
        Err(AttemptError::Failed(err.to_string()))
    }

    /// Close path shared by transport loops (`Some(generation)`) and failed
    /// opens (`None`). Reports from stale loops are ignored.
    fn handle_close(self: &Arc<Self>, generation: Option<u64>, frame: CloseFrame) {
        let scheduled = {
            let mut st = self.state.lock();
            let retiring = match generation {
                None => false,
                Some(g) if st.link.as_ref().is_some_and(|l| l.generation == g) => {
                    st.link = None;
                    false
                }
                Some(g) if st.retiring.as_ref().is_some_and(|l| l.generation == g) => {
                    st.retiring = None;
                    true
                }
                Some(g) => {
                    trace!(room_code = %self.room_code, generation = g, "stale close ignored");
                    return;
                }
            };

            if retiring || st.manual_close {
                None
            } else {
                st.heartbeat.stop();
                let weak = Arc::downgrade(self);
                let retry = st.scheduler.schedule(move |retry| async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.fire_reconnect(retry).await;
                    }
                });
                match retry {
                    Some(retry) => {
                        st.phase = ConnectionState::Reconnecting {
                            attempt: retry.attempt,
                            delay: retry.delay,
                        };
                    }
                    None if st.scheduler.is_pending() => {
                        let attempt = st.scheduler.attempts();
                        st.phase = ConnectionState::Reconnecting {
                            attempt,
                            delay: st.scheduler.policy().delay_for(attempt),
                        };
                    }
                    None => st.phase = ConnectionState::ClosedError,
                }
                retry
            }
        };

        match scheduled {
            Some(retry) => info!(
                room_code = %self.room_code,
                code = frame.code.as_u16(),
                attempt = retry.attempt,
                delay_ms = u64::try_from(retry.delay.as_millis()).unwrap_or(u64::MAX),
                "room connection closed; retry scheduled"
            ),
            None => info!(
                room_code = %self.room_code,
                code = frame.code.as_u16(),
                reason = %frame.reason,
                "room connection closed"
            ),
        }
        if frame.code.is_rejection() {
            warn!(room_code = %self.room_code, "{}", frame.code.description());
        }
        self.bus.emit(&RoomEvent::Disconnected(frame));
    }

    async fn fire_reconnect(self: &Arc<Self>, retry: Retry) {
        {
            let mut st = self.state.lock();
            st.scheduler.fired();
            if st.manual_close {
                debug!(room_code = %self.room_code, "retry skipped after manual close");
                return;
            }
            if !st.scheduler.permits(retry.attempt) {
                debug!(room_code = %self.room_code, attempt = retry.attempt, "retry over ceiling");
                return;
            }
        }

        info!(room_code = %self.room_code, attempt = retry.attempt, "reconnecting");
        if let Err(err) = self.open_or_join().await {
            // A failed open already went through the close path, which
            // scheduled the next retry.
            debug!(room_code = %self.room_code, attempt = retry.attempt, error = %err, "retry failed");
        }
    }

    fn send_frame(&self, kind: &str, frame: serde_json::Result<String>) {
        let st = self.state.lock();
        let Some(link) = st.link.as_ref() else {
            warn!(room_code = %self.room_code, kind, "not connected; command dropped");
            return;
        };
        match frame {
            Ok(text) => {
                if link.outbound.send(text).is_err() {
                    warn!(room_code = %self.room_code, kind, "transport loop gone; command dropped");
                } else {
                    debug!(room_code = %self.room_code, kind, "command queued");
                }
            }
            Err(err) => error!(room_code = %self.room_code, kind, error = %err, "failed to encode command"),
        }
    }

    fn dispatch_frame(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(room_code = %self.room_code, error = %err, "dropping malformed frame");
                return;
            }
        };
        if envelope.is_heartbeat() {
            trace!(room_code = %self.room_code, kind = %envelope.kind, "heartbeat frame");
            return;
        }
        match RoomEvent::try_from(envelope) {
            Ok(event) => {
                trace!(room_code = %self.room_code, event = %event.kind(), "dispatching");
                self.bus.emit(&event);
            }
            Err(err) => warn!(room_code = %self.room_code, error = %err, "dropping frame"),
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Drive one open transport until it closes or its link asks it to stop.
async fn transport_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<Arc<Inner>>,
    shutdown_timeout: Duration,
) {
    let (frame, keepalive) = loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(text) => {
                    if let Err(err) = transport.send(text).await {
                        error!(generation, error = %err, "transport send failed");
                        let _ = transport.close().await;
                        break (CloseFrame::abnormal(err.to_string()), None);
                    }
                }
                None => {
                    debug!(generation, "outbound queue closed");
                    close_within(&mut transport, shutdown_timeout).await;
                    break (CloseFrame::normal(), None);
                }
            },

            requested = &mut shutdown => {
                debug!(generation, "shutdown requested");
                close_within(&mut transport, shutdown_timeout).await;
                break (CloseFrame::normal(), requested.ok());
            }

            incoming = transport.recv() => match incoming {
                Received::Text(text) => match inner.upgrade() {
                    Some(inner) => inner.dispatch_frame(&text),
                    None => {
                        close_within(&mut transport, shutdown_timeout).await;
                        return;
                    }
                },
                Received::Closed(frame) => break (frame, None),
            },
        }
    };

    if let Some(inner) = keepalive.or_else(|| inner.upgrade()) {
        inner.handle_close(Some(generation), frame);
    }
    debug!(generation, "transport loop exited");
}

async fn close_within(transport: &mut Box<dyn Transport>, timeout: Duration) {
    match tokio::time::timeout(timeout, transport.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "transport close failed"),
        Err(_) => warn!("transport did not close within timeout"),
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
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Opens transports that never receive and hang in `close()`.
    struct HangingConnector {
        opened: Arc<AtomicUsize>,
        close_called: Arc<AtomicBool>,
    }

    struct HangingTransport {
        close_called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for HangingTransport {
        async fn send(&mut self, _message: String) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Received {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            self.close_called.store(true, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(HangingTransport {
                close_called: Arc::clone(&self.close_called),
            }))
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
            Err(RoomClientError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        }
    }

    fn hanging() -> (Arc<HangingConnector>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let close_called = Arc::new(AtomicBool::new(false));
        let connector = Arc::new(HangingConnector {
            opened: Arc::clone(&opened),
            close_called: Arc::clone(&close_called),
        });
        (connector, opened, close_called)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_when_open_is_immediate() {
        let (connector, opened, _) = hanging();
        let conn = RoomConnection::new("R1", ConnectionConfig::new("ws://test"), connector);

        conn.connect().await.unwrap();
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_within_shutdown_timeout() {
        let (connector, _, close_called) = hanging();
        let config =
            ConnectionConfig::new("ws://test").with_shutdown_timeout(Duration::from_millis(20));
        let conn = RoomConnection::new("R1", config, connector);
        let codes = Arc::new(Mutex::new(Vec::new()));
        {
            let codes = Arc::clone(&codes);
            conn.on(EventKind::Disconnected, move |event| {
                if let RoomEvent::Disconnected(frame) = event {
                    codes.lock().push(frame.code.as_u16());
                }
            });
        }

        conn.connect().await.unwrap();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::ClosedManual);

        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;
        assert!(close_called.load(Ordering::SeqCst));
        assert_eq!(*codes.lock(), vec![1000]);
        assert_eq!(conn.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_open_emits_error_then_disconnected() {
        let conn = RoomConnection::new(
            "R1",
            ConnectionConfig::new("ws://test"),
            Arc::new(RefusingConnector),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::Error, EventKind::Disconnected] {
            let seen = Arc::clone(&seen);
            conn.on(kind, move |event| seen.lock().push(event.kind()));
        }

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, RoomClientError::ConnectFailed(_)));
        assert_eq!(*seen.lock(), vec![EventKind::Error, EventKind::Disconnected]);
        assert_eq!(
            conn.state(),
            ConnectionState::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        conn.disconnect();
    }

    #[tokio::test]
    async fn invalid_server_url_fails_without_events() {
        let (connector, opened, _) = hanging();
        let conn = RoomConnection::new("R1", ConnectionConfig::new("nope"), connector);
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, RoomClientError::InvalidUrl(_)));
        assert_eq!(opened.load(Ordering::SeqCst), 0);
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn clones_share_one_connection() {
        let (connector, _, _) = hanging();
        let conn = RoomConnection::new("R1", ConnectionConfig::new("ws://test"), connector);
        let other = conn.clone();
        assert!(conn.ptr_eq(&other));
        other.on(EventKind::Chat, |_| {});
        assert_eq!(conn.listener_count(EventKind::Chat), 1);
    }
}
