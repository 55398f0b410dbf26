//! Folds a room's event stream into a UI-ready [`RoomView`].
//!
//! A [`RoomProjector`] borrows its connection from a [`ConnectionRegistry`],
//! listens to every event kind, and publishes the folded view through a
//! [`tokio::sync::watch`] channel:
//!
//! - `room_status` replaces the snapshot wholesale
//! - `connected`/`disconnected` flip `is_connected`
//! - `disconnected`, `error` and every notice append a [`DisplayedMessage`]
//!
//! After `disconnected` the projector schedules its own delayed `connect()`
//! while auto-reconnect is armed, on top of the connection's backoff.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), mystery_room_client::RoomClientError> {
//! use mystery_room_client::{ConnectionConfig, ConnectionRegistry, ProjectorOptions, RoomProjector};
//!
//! let registry = ConnectionRegistry::new(ConnectionConfig::new("ws://127.0.0.1:8000").with_token("t"));
//! let projector = RoomProjector::mount(&registry, "ABC123", ProjectorOptions::default());
//! let mut view = projector.subscribe();
//!
//! projector.send_chat("hello");
//! while view.changed().await.is_ok() {
//!     let view = view.borrow();
//!     println!("{} messages", view.messages.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::config::{Ownership, ProjectorOptions};
use crate::connection::RoomConnection;
use crate::error::Result;
use crate::event::{EventKind, RoomEvent};
use crate::event_bus::Subscription;
use crate::protocol::{
    ClientCommand, ErrorPayload, NoticePayload, RoomSettings, RoomStatus, UserId,
};
use crate::registry::ConnectionRegistry;
use crate::transport::CloseFrame;

/// Sender name shown on locally generated error entries.
pub const SYSTEM_SENDER: &str = "System";

// ── View ────────────────────────────────────────────────────────────

/// One entry of the message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayedMessage {
    pub message_type: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub datetime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DisplayedMessage {
    fn empty(message_type: EventKind) -> Self {
        Self {
            message_type,
            message: None,
            datetime: now_rfc3339(),
            send_id: None,
            send_nickname: None,
            recipient_id: None,
            recipient_nickname: None,
            action: None,
            extra: Map::new(),
        }
    }

    /// A notice, with `player_action` entries showing their action text.
    pub fn from_notice(kind: EventKind, payload: &NoticePayload) -> Self {
        let message = match (kind, &payload.action) {
            (EventKind::PlayerAction, Some(action)) => Some(action.clone()),
            _ => payload.message.clone(),
        };
        Self {
            message,
            datetime: payload.datetime.clone().unwrap_or_else(now_rfc3339),
            send_id: payload.send_id,
            send_nickname: payload.send_nickname.clone(),
            recipient_id: payload.recipient_id,
            recipient_nickname: payload.recipient_nickname.clone(),
            action: payload.action.clone(),
            extra: payload.extra.clone(),
            ..Self::empty(kind)
        }
    }

    /// `"Error: <message>"` from [`SYSTEM_SENDER`].
    pub fn from_error(payload: &ErrorPayload) -> Self {
        let mut entry = Self::empty(EventKind::Error);
        entry.message = Some(format!("Error: {}", payload.message));
        entry.send_nickname = Some(SYSTEM_SENDER.to_string());
        if let Some(code) = &payload.code {
            entry.extra.insert("code".into(), Value::String(code.clone()));
        }
        entry
    }

    /// Close code and reason, carried in `extra`.
    pub fn from_close(frame: &CloseFrame) -> Self {
        let mut entry = Self::empty(EventKind::Disconnected);
        entry
            .extra
            .insert("code".into(), Value::from(frame.code.as_u16()));
        entry
            .extra
            .insert("reason".into(), Value::String(frame.reason.clone()));
        entry
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Folded room state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomView {
    pub is_connected: bool,
    /// Latest snapshot; replaced, never merged.
    pub room_status: Option<Arc<RoomStatus>>,
    /// Append-only, in arrival order.
    pub messages: Vec<DisplayedMessage>,
}

impl RoomView {
    /// Apply one event.
    pub fn fold(&mut self, event: &RoomEvent) {
        match event {
            RoomEvent::Connected(_) => self.is_connected = true,
            RoomEvent::Disconnected(frame) => {
                self.is_connected = false;
                self.messages.push(DisplayedMessage::from_close(frame));
            }
            RoomEvent::Error(payload) => self.messages.push(DisplayedMessage::from_error(payload)),
            RoomEvent::RoomStatus(status) => self.room_status = Some(Arc::clone(status)),
            RoomEvent::Notice { kind, payload } => {
                self.messages
                    .push(DisplayedMessage::from_notice(*kind, payload));
            }
        }
    }
}

// ── Projector ───────────────────────────────────────────────────────

struct ProjectorShared {
    connection: RoomConnection,
    view: watch::Sender<RoomView>,
    auto_reconnect: AtomicBool,
    connecting: AtomicBool,
    reconnect_delay: Duration,
    delayed_reconnect: Mutex<Option<AbortHandle>>,
}

/// Clears the in-flight flag however `connect` ends.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ProjectorShared {
    async fn connect(&self) -> Result<()> {
        if self.connecting.swap(true, Ordering::AcqRel) {
            debug!(room_code = self.connection.room_code(), "projector connect already running");
            return Ok(());
        }
        let _guard = ConnectingGuard(&self.connecting);
        self.auto_reconnect.store(true, Ordering::Release);
        let result = self.connection.connect().await;
        if let Err(err) = &result {
            warn!(room_code = self.connection.room_code(), error = %err, "projector connect failed");
        }
        result
    }

    fn disarm(&self) {
        self.auto_reconnect.store(false, Ordering::Release);
        if let Some(handle) = self.delayed_reconnect.lock().take() {
            handle.abort();
        }
    }

    fn apply(self: &Arc<Self>, event: &RoomEvent) {
        self.view.send_modify(|view| view.fold(event));
        if matches!(event, RoomEvent::Disconnected(_)) {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.auto_reconnect.load(Ordering::Acquire) || self.connecting.load(Ordering::Acquire)
        {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime; projector reconnect skipped");
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let delay = self.reconnect_delay;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.auto_reconnect.load(Ordering::Acquire)
                && !shared.connection.is_manually_closed()
            {
                let _ = shared.connect().await;
            }
        });
        if let Some(previous) = self.delayed_reconnect.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }
}

/// Room view plus command surface for one consumer.
///
/// Dropping the projector removes its listeners. With
/// [`Ownership::Owner`] it also disposes the connection.
pub struct RoomProjector {
    shared: Arc<ProjectorShared>,
    registry: ConnectionRegistry,
    ownership: Ownership,
    subscriptions: Vec<Subscription>,
}

impl RoomProjector {
    /// Attach to `room_code`'s connection, creating it if needed.
    ///
    /// With `options.auto_connect` a connect is started in the background,
    /// which requires a tokio runtime.
    pub fn mount(registry: &ConnectionRegistry, room_code: &str, options: ProjectorOptions) -> Self {
        let connection = registry.connection(room_code);
        let (view, _) = watch::channel(RoomView {
            is_connected: connection.is_connected(),
            ..RoomView::default()
        });
        let shared = Arc::new(ProjectorShared {
            connection,
            view,
            auto_reconnect: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            reconnect_delay: options.auto_reconnect_delay,
            delayed_reconnect: Mutex::new(None),
        });

        let subscriptions = EventKind::ALL
            .iter()
            .map(|&kind| {
                let weak = Arc::downgrade(&shared);
                shared.connection.on(kind, move |event| {
                    if let Some(shared) = weak.upgrade() {
                        shared.apply(event);
                    }
                })
            })
            .collect();

        let projector = Self {
            shared,
            registry: registry.clone(),
            ownership: options.ownership,
            subscriptions,
        };

        if options.auto_connect {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let shared = Arc::clone(&projector.shared);
                    runtime.spawn(async move {
                        let _ = shared.connect().await;
                    });
                }
                Err(_) => warn!(room_code, "no runtime; call connect() to open the room"),
            }
        }
        projector
    }

    /// Connect and arm auto-reconnect. Returns `Ok(())` at once if a
    /// projector connect is already running.
    ///
    /// # Errors
    ///
    /// Whatever [`RoomConnection::connect`] returns.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect().await
    }

    /// Disarm auto-reconnect and close the connection.
    pub fn disconnect(&self) {
        self.shared.disarm();
        self.shared.connection.disconnect();
    }

    /// Disarm, and dispose the connection through the registry.
    pub fn leave(self) {
        self.shared.disarm();
        self.registry.disconnect(self.shared.connection.room_code());
    }

    // ── View ────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> watch::Receiver<RoomView> {
        self.shared.view.subscribe()
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> RoomView {
        self.shared.view.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.view.borrow().is_connected
    }

    pub fn room_status(&self) -> Option<Arc<RoomStatus>> {
        self.shared.view.borrow().room_status.clone()
    }

    pub fn message_count(&self) -> usize {
        self.shared.view.borrow().messages.len()
    }

    pub fn connection(&self) -> &RoomConnection {
        &self.shared.connection
    }

    pub fn room_code(&self) -> &str {
        self.shared.connection.room_code()
    }

    // ── Commands ────────────────────────────────────────────────────

    pub fn send_chat(&self, message: impl Into<String>) {
        self.send(ClientCommand::Chat {
            message: message.into(),
        });
    }

    pub fn select_character(&self, character_id: i64) {
        self.send(ClientCommand::SelectCharacter { character_id });
    }

    pub fn set_ready(&self, ready: bool) {
        self.send(ClientCommand::Ready { ready });
    }

    pub fn start_game(&self) {
        self.send(ClientCommand::StartGame);
    }

    pub fn send_private_message(&self, recipient_id: UserId, message: impl Into<String>) {
        self.send(ClientCommand::PrivateMessage {
            recipient_id,
            message: message.into(),
        });
    }

    pub fn send_player_action(&self, action: impl Into<String>) {
        self.send(ClientCommand::PlayerAction {
            action: action.into(),
        });
    }

    pub fn update_room_settings(&self, settings: RoomSettings) {
        self.send(ClientCommand::UpdateRoomSettings(settings));
    }

    pub fn generate_script(&self) {
        self.send(ClientCommand::GenerateScript);
    }

    pub fn next_stage(&self) {
        self.send(ClientCommand::NextStage);
    }

    pub fn send_vote(&self, voted_user_id: UserId) {
        self.send(ClientCommand::GameVote { voted_user_id });
    }

    pub fn start_vote(&self) {
        self.send(ClientCommand::StartVote);
    }

    pub fn end_vote(&self) {
        self.send(ClientCommand::EndVote);
    }

    pub fn search_begin(&self) {
        self.send(ClientCommand::SearchBegin);
    }

    pub fn search_end(&self) {
        self.send(ClientCommand::SearchEnd);
    }

    pub fn search_script_clue(&self, clue_id: Option<i64>) {
        self.send(ClientCommand::SearchScriptClue { clue_id });
    }

    fn send(&self, command: ClientCommand) {
        self.shared.connection.send(&command);
    }
}

impl fmt::Debug for RoomProjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomProjector")
            .field("room_code", &self.room_code())
            .field("ownership", &self.ownership)
            .field("is_connected", &self.is_connected())
            .field("messages", &self.message_count())
            .finish()
    }
}

impl Drop for RoomProjector {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.shared.disarm();
        if self.ownership == Ownership::Owner {
            self.registry.disconnect(self.shared.connection.room_code());
        }
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
    use crate::close_codes::CloseCode;
    use crate::protocol::RoomInfo;
    use serde_json::json;

    fn notice(kind: EventKind, payload: Value) -> RoomEvent {
        RoomEvent::Notice {
            kind,
            payload: serde_json::from_value(payload).unwrap(),
        }
    }

    #[test]
    fn player_action_shows_action_text() {
        let mut view = RoomView::default();
        view.fold(&notice(
            EventKind::PlayerAction,
            json!({"action": "opens the drawer", "send_nickname": "Ann", "datetime": "t0"}),
        ));
        let entry = &view.messages[0];
        assert_eq!(entry.message.as_deref(), Some("opens the drawer"));
        assert_eq!(entry.datetime, "t0");
        assert_eq!(entry.message_type, EventKind::PlayerAction);
    }

    #[test]
    fn error_entry_comes_from_system() {
        let mut view = RoomView::default();
        view.fold(&RoomEvent::Error(ErrorPayload {
            message: "not host".into(),
            code: None,
        }));
        let entry = &view.messages[0];
        assert_eq!(entry.message.as_deref(), Some("Error: not host"));
        assert_eq!(entry.send_nickname.as_deref(), Some(SYSTEM_SENDER));
        assert!(!entry.datetime.is_empty());
    }

    #[test]
    fn missing_datetime_is_generated() {
        let entry = DisplayedMessage::from_notice(EventKind::Chat, &NoticePayload::default());
        assert!(chrono::DateTime::parse_from_rfc3339(&entry.datetime).is_ok());
    }

    #[test]
    fn room_status_is_replaced_not_merged() {
        let mut view = RoomView::default();
        let first = Arc::new(RoomStatus {
            room: RoomInfo {
                code: "A".into(),
                status: "waiting".into(),
                ..RoomInfo::default()
            },
            solution: Some(json!({"murderer": "Maid"})),
            ..RoomStatus::default()
        });
        let second = Arc::new(RoomStatus {
            room: RoomInfo {
                code: "A".into(),
                status: "playing".into(),
                ..RoomInfo::default()
            },
            ..RoomStatus::default()
        });

        view.fold(&RoomEvent::RoomStatus(Arc::clone(&first)));
        view.fold(&RoomEvent::RoomStatus(Arc::clone(&second)));
        let current = view.room_status.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(current.solution.is_none());
        assert!(view.messages.is_empty());
    }

    #[test]
    fn connection_flag_follows_lifecycle() {
        let mut view = RoomView::default();
        view.fold(&RoomEvent::Connected(None));
        assert!(view.is_connected);
        view.fold(&RoomEvent::Disconnected(CloseFrame::new(
            CloseCode::Abnormal,
            "gone",
        )));
        assert!(!view.is_connected);
        assert_eq!(view.messages[0].extra.get("code"), Some(&json!(1006)));
    }

    #[test]
    fn displayed_message_serializes_flat() {
        let entry = DisplayedMessage::from_notice(
            EventKind::Chat,
            &serde_json::from_value(json!({"message": "hi", "datetime": "t", "mood": "calm"}))
                .unwrap(),
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            json!({"message_type": "chat", "message": "hi", "datetime": "t", "mood": "calm"})
        );
    }
}
