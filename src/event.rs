//! Typed events dispatched to room listeners.
//!
//! Server frames are decoded from an [`Envelope`] into a [`RoomEvent`]; the
//! event's [`EventKind`] selects which listeners run. The catalog is closed:
//! envelopes whose `type` is not listed in [`EventKind`] are dropped by the
//! connection before they reach any listener.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{ConnectedPayload, Envelope, ErrorPayload, NoticePayload, RoomStatus};
use crate::transport::CloseFrame;

/// Every event name a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Connection lifecycle
    Connected,
    Disconnected,
    Error,

    // Room snapshot
    RoomStatus,

    // Room membership
    RoomSettingsUpdated,
    PlayerJoined,
    PlayerLeft,
    RoomDissolved,

    // Chat
    Chat,
    PrivateMessage,

    // Character selection
    CharacterSelected,
    CharacterDeselected,

    // Readiness
    PlayerReady,
    AllReady,

    // Game flow
    GameStarted,
    GameEnded,
    StageChanged,
    StageUpdated,
    NextStage,
    GamePhaseChanged,
    GameStatus,

    // Player actions
    PlayerAction,
    ActionResult,

    // Voting
    GameVote,
    StartVote,
    EndVote,
    VoteStarted,
    VoteUpdated,
    VoteEnded,

    // Clues
    ClueDiscovered,
    ClueShared,

    // AI game master
    AiMessage,
    AiPrompt,

    // Script generation
    ScriptGenerationStarted,
    ScriptGenerationCompleted,
    ScriptGenerationFailed,
}

impl EventKind {
    /// The full catalog, in declaration order.
    pub const ALL: &'static [EventKind] = &[
        Self::Connected,
        Self::Disconnected,
        Self::Error,
        Self::RoomStatus,
        Self::RoomSettingsUpdated,
        Self::PlayerJoined,
        Self::PlayerLeft,
        Self::RoomDissolved,
        Self::Chat,
        Self::PrivateMessage,
        Self::CharacterSelected,
        Self::CharacterDeselected,
        Self::PlayerReady,
        Self::AllReady,
        Self::GameStarted,
        Self::GameEnded,
        Self::StageChanged,
        Self::StageUpdated,
        Self::NextStage,
        Self::GamePhaseChanged,
        Self::GameStatus,
        Self::PlayerAction,
        Self::ActionResult,
        Self::GameVote,
        Self::StartVote,
        Self::EndVote,
        Self::VoteStarted,
        Self::VoteUpdated,
        Self::VoteEnded,
        Self::ClueDiscovered,
        Self::ClueShared,
        Self::AiMessage,
        Self::AiPrompt,
        Self::ScriptGenerationStarted,
        Self::ScriptGenerationCompleted,
        Self::ScriptGenerationFailed,
    ];

    /// The wire name of this event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::RoomStatus => "room_status",
            Self::RoomSettingsUpdated => "room_settings_updated",
            Self::PlayerJoined => "player_joined",
            Self::PlayerLeft => "player_left",
            Self::RoomDissolved => "room_dissolved",
            Self::Chat => "chat",
            Self::PrivateMessage => "private_message",
            Self::CharacterSelected => "character_selected",
            Self::CharacterDeselected => "character_deselected",
            Self::PlayerReady => "player_ready",
            Self::AllReady => "all_ready",
            Self::GameStarted => "game_started",
            Self::GameEnded => "game_ended",
            Self::StageChanged => "stage_changed",
            Self::StageUpdated => "stage_updated",
            Self::NextStage => "next_stage",
            Self::GamePhaseChanged => "game_phase_changed",
            Self::GameStatus => "game_status",
            Self::PlayerAction => "player_action",
            Self::ActionResult => "action_result",
            Self::GameVote => "game_vote",
            Self::StartVote => "start_vote",
            Self::EndVote => "end_vote",
            Self::VoteStarted => "vote_started",
            Self::VoteUpdated => "vote_updated",
            Self::VoteEnded => "vote_ended",
            Self::ClueDiscovered => "clue_discovered",
            Self::ClueShared => "clue_shared",
            Self::AiMessage => "ai_message",
            Self::AiPrompt => "ai_prompt",
            Self::ScriptGenerationStarted => "script_generation_started",
            Self::ScriptGenerationCompleted => "script_generation_completed",
            Self::ScriptGenerationFailed => "script_generation_failed",
        }
    }

    /// Look up a kind by its wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }

    /// Returns `true` for kinds whose payload is a [`NoticePayload`].
    pub fn is_notice(self) -> bool {
        !matches!(
            self,
            Self::Connected | Self::Disconnected | Self::Error | Self::RoomStatus
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered to room listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// The transport opened (`None`), or the server sent its welcome payload.
    Connected(Option<ConnectedPayload>),
    /// The transport closed.
    Disconnected(CloseFrame),
    /// A connection error, or an error reply from the server.
    Error(ErrorPayload),
    /// A fresh room snapshot.
    RoomStatus(Arc<RoomStatus>),
    /// Any chat/lobby/stage/vote/clue/script notification.
    Notice {
        kind: EventKind,
        payload: NoticePayload,
    },
}

impl RoomEvent {
    /// The kind listeners are keyed by.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected(_) => EventKind::Connected,
            Self::Disconnected(_) => EventKind::Disconnected,
            Self::Error(_) => EventKind::Error,
            Self::RoomStatus(_) => EventKind::RoomStatus,
            Self::Notice { kind, .. } => *kind,
        }
    }
}

/// Why an envelope could not be turned into a [`RoomEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// `ping`/`pong` frames belong to the heartbeat.
    #[error("heartbeat frame")]
    Heartbeat,

    /// The `type` is outside the event catalog.
    #[error("unknown event type `{0}`")]
    UnknownType(String),

    /// The payload did not match the event's shape.
    #[error("invalid `{kind}` payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

impl TryFrom<Envelope> for RoomEvent {
    type Error = DecodeError;

    fn try_from(envelope: Envelope) -> Result<Self, DecodeError> {
        if envelope.is_heartbeat() {
            return Err(DecodeError::Heartbeat);
        }
        let kind = EventKind::from_wire(&envelope.kind)
            .ok_or_else(|| DecodeError::UnknownType(envelope.kind.clone()))?;
        let payload_err = |source| DecodeError::Payload { kind, source };

        let event = match kind {
            EventKind::Connected => match envelope.data {
                Some(data) => {
                    Self::Connected(Some(serde_json::from_value(data).map_err(payload_err)?))
                }
                None => Self::Connected(None),
            },
            EventKind::Disconnected => match envelope.data {
                Some(data) => Self::Disconnected(serde_json::from_value(data).map_err(payload_err)?),
                None => Self::Disconnected(CloseFrame::no_status()),
            },
            EventKind::Error => {
                let mut payload: ErrorPayload = match envelope.data {
                    Some(serde_json::Value::String(message)) => ErrorPayload {
                        message,
                        code: None,
                    },
                    Some(data) => serde_json::from_value(data).map_err(payload_err)?,
                    None => ErrorPayload::default(),
                };
                if payload.message.is_empty() {
                    if let Some(message) = envelope.message {
                        payload.message = message;
                    }
                }
                RoomEvent::Error(payload)
            }
            EventKind::RoomStatus => {
                let data = envelope.data.unwrap_or(serde_json::Value::Null);
                let status: RoomStatus = serde_json::from_value(data).map_err(payload_err)?;
                Self::RoomStatus(Arc::new(status))
            }
            _ => {
                let mut payload: NoticePayload = match envelope.data {
                    Some(data) => serde_json::from_value(data).map_err(payload_err)?,
                    None => NoticePayload::default(),
                };
                if payload.message.is_none() {
                    payload.message = envelope.message;
                }
                if payload.datetime.is_none() {
                    payload.datetime = envelope.timestamp;
                }
                Self::Notice { kind, payload }
            }
        };
        Ok(event)
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
    use serde_json::json;

    fn envelope(value: serde_json::Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn wire_names_round_trip_through_catalog() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(*kind));
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, json!(kind.as_str()));
        }
    }

    #[test]
    fn catalog_has_no_duplicates() {
        let mut names: Vec<&str> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventKind::ALL.len());
    }

    #[test]
    fn heartbeat_frames_are_rejected() {
        for kind in ["ping", "pong"] {
            let err = RoomEvent::try_from(envelope(json!({"type": kind}))).unwrap_err();
            assert!(matches!(err, DecodeError::Heartbeat));
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = RoomEvent::try_from(envelope(json!({"type": "npc_added"}))).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(name) if name == "npc_added"));
    }

    #[test]
    fn server_welcome_decodes_as_connected() {
        let event = RoomEvent::try_from(envelope(json!({
            "type": "connected",
            "data": {"room_code": "ABC123", "user_id": 3, "nickname": "Ann"}
        })))
        .unwrap();
        match event {
            RoomEvent::Connected(Some(payload)) => {
                assert_eq!(payload.room_code, "ABC123");
                assert_eq!(payload.user_id, Some(3));
            }
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    #[test]
    fn error_falls_back_to_top_level_message() {
        let event =
            RoomEvent::try_from(envelope(json!({"type": "error", "message": "invalid JSON"})))
                .unwrap();
        assert_eq!(
            event,
            RoomEvent::Error(ErrorPayload {
                message: "invalid JSON".into(),
                code: None
            })
        );
    }

    #[test]
    fn error_accepts_a_bare_string_payload() {
        let event = RoomEvent::try_from(envelope(json!({
            "type": "error",
            "data": "room is full"
        })))
        .unwrap();
        assert_eq!(
            event,
            RoomEvent::Error(ErrorPayload {
                message: "room is full".into(),
                code: None
            })
        );
    }

    #[test]
    fn disconnected_without_data_has_no_status() {
        let event = RoomEvent::try_from(envelope(json!({"type": "disconnected"}))).unwrap();
        match event {
            RoomEvent::Disconnected(frame) => assert_eq!(frame.code, CloseCode::NoStatus),
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[test]
    fn notice_takes_envelope_timestamp_when_missing() {
        let event = RoomEvent::try_from(envelope(json!({
            "type": "chat",
            "data": {"message": "hi", "send_id": 1, "send_nickname": "Ann"},
            "timestamp": "2026-01-01T00:00:00"
        })))
        .unwrap();
        assert_eq!(event.kind(), EventKind::Chat);
        match event {
            RoomEvent::Notice { payload, .. } => {
                assert_eq!(payload.datetime.as_deref(), Some("2026-01-01T00:00:00"));
            }
            other => panic!("expected Notice, got {other:?}"),
        }
    }

    #[test]
    fn room_status_without_room_is_a_payload_error() {
        let err = RoomEvent::try_from(envelope(json!({"type": "room_status", "data": {}})))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Payload {
                kind: EventKind::RoomStatus,
                ..
            }
        ));
    }

    #[test]
    fn notice_kinds_exclude_lifecycle_and_snapshot() {
        assert!(!EventKind::Connected.is_notice());
        assert!(!EventKind::RoomStatus.is_notice());
        assert!(EventKind::VoteEnded.is_notice());
    }
}
