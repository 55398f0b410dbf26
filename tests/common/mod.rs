#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the room client integration tests.
//!
//! [`MockConnector`] opens in-memory transports according to a scripted
//! queue of outcomes. Every accepted open produces a [`ServerHandle`] that
//! plays the server side: push frames, close with a code, inspect what the
//! client sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use mystery_room_client::heartbeat::is_probe;
use mystery_room_client::{
    CloseFrame, ConnectionConfig, Connector, EventKind, Received, RoomClientError, RoomConnection,
    RoomEvent, Transport,
};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

// ── MockTransport ───────────────────────────────────────────────────

/// Client half of an in-memory connection.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Received>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), RoomClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RoomClientError::TransportClosed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Received {
        match self.incoming.recv().await {
            Some(item) => item,
            // Server handle dropped: stay open until the client closes.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), RoomClientError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Server half of an in-memory connection.
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Received>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    pub url: String,
}

impl ServerHandle {
    pub fn push_text(&self, text: &str) {
        let _ = self.tx.send(Received::Text(text.to_string()));
    }

    pub fn push_json(&self, value: Value) {
        self.push_text(&value.to_string());
    }

    /// Close from the server side with `code`.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Received::Closed(CloseFrame::new(code, reason)));
    }

    /// Frames the client sent, heartbeat probes excluded.
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| !is_probe(frame))
            .cloned()
            .collect()
    }

    /// Frames the client sent, parsed.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    pub fn probes(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| is_probe(frame))
            .count()
    }

    /// Returns `true` once the client has closed its half.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// What the next open attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse,
}

/// Opens [`MockTransport`]s. Attempts beyond the scripted queue are accepted.
#[derive(Default)]
pub struct MockConnector {
    script: StdMutex<VecDeque<Outcome>>,
    opens: AtomicUsize,
    servers: StdMutex<Vec<ServerHandle>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connector whose opens each wait for a permit on the returned gate.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let connector = Arc::new(Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        });
        (connector, gate)
    }

    pub fn script(&self, outcomes: &[Outcome]) {
        self.script.lock().unwrap().extend(outcomes.iter().copied());
    }

    /// Open attempts so far, refused ones included.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Server side of the most recently accepted transport.
    pub fn server(&self) -> ServerHandle {
        self.servers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport accepted yet")
    }

    pub fn accepted(&self) -> usize {
        self.servers.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, RoomClientError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Accept);
        if outcome == Outcome::Refuse {
            return Err(RoomClientError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let (tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.servers.lock().unwrap().push(ServerHandle {
            tx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
            url: url.to_string(),
        });
        Ok(Box::new(MockTransport {
            incoming,
            sent,
            closed,
        }))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("ws://rooms.test").with_token("secret")
}

/// Let spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock by `ms` and let woken tasks run.
pub async fn advance_ms(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

/// Record every event the connection emits.
pub fn record(connection: &RoomConnection) -> Arc<StdMutex<Vec<RoomEvent>>> {
    let events = Arc::new(StdMutex::new(Vec::new()));
    for &kind in EventKind::ALL {
        let events = Arc::clone(&events);
        connection.on(kind, move |event| events.lock().unwrap().push(event.clone()));
    }
    events
}

pub fn kinds(events: &StdMutex<Vec<RoomEvent>>) -> Vec<EventKind> {
    events.lock().unwrap().iter().map(RoomEvent::kind).collect()
}

/// Close codes of the recorded `disconnected` events.
pub fn close_codes(events: &StdMutex<Vec<RoomEvent>>) -> Vec<u16> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            RoomEvent::Disconnected(frame) => Some(frame.code.as_u16()),
            _ => None,
        })
        .collect()
}

/// Install a `tracing` subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
