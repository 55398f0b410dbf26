//! Wire-compatible protocol types for the room server.
//!
//! Every frame in both directions is a JSON [`Envelope`]:
//! `{"type": "<event>", "data": <payload>}`. Server frames may additionally
//! carry a top-level `message` (used by some error replies) and a
//! `timestamp`.
//!
//! Key adaptations from the server's Python models:
//!
//! - `datetime` values stay `String` (ISO 8601) and are never parsed
//! - every `RoomStatus` sub-object is optional or defaulted, because the server
//!   sends a phase-dependent subset of them
//! - numeric ids are `i64`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Heartbeat request type (client → server).
pub const PING: &str = "ping";

/// Heartbeat reply type (server → client). Never dispatched to listeners.
pub const PONG: &str = "pong";

/// Identifier of a user account.
pub type UserId = i64;

// ── Envelope ────────────────────────────────────────────────────────

/// The wire unit exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Selects the logical event or command.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event- or command-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Top-level human-readable message (server error replies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Server-side send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Envelope {
    /// Create an outgoing envelope with the given type and payload.
    pub fn new(kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
            message: None,
            timestamp: None,
        }
    }

    /// Returns `true` for `ping`/`pong`, which are reserved for the heartbeat.
    pub fn is_heartbeat(&self) -> bool {
        self.kind == PING || self.kind == PONG
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// Room settings a host may change before the script is generated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_dm_personality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_mins: Option<u32>,
}

/// Commands sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Public chat line.
    Chat { message: String },
    /// Claim a script character.
    SelectCharacter { character_id: i64 },
    /// Toggle the lobby ready flag.
    Ready { ready: bool },
    /// Host starts the game.
    StartGame,
    /// Direct message to one player.
    PrivateMessage { recipient_id: UserId, message: String },
    /// Free-form in-game action.
    PlayerAction { action: String },
    /// Cast a vote for the suspected murderer.
    GameVote { voted_user_id: UserId },
    /// Host opens the final vote.
    StartVote,
    /// Host closes the final vote.
    EndVote,
    /// Host updates the room settings.
    UpdateRoomSettings(RoomSettings),
    /// Host asks the AI to generate a script from the room settings.
    GenerateScript,
    /// Host advances the story to the next stage.
    NextStage,
    /// Open the evidence search phase.
    SearchBegin,
    /// Close the evidence search phase.
    SearchEnd,
    /// Search for one script clue.
    SearchScriptClue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clue_id: Option<i64>,
    },
    /// Heartbeat probe.
    Ping,
}

impl ClientCommand {
    /// The wire `type` of this command.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::SelectCharacter { .. } => "select_character",
            Self::Ready { .. } => "ready",
            Self::StartGame => "start_game",
            Self::PrivateMessage { .. } => "private_message",
            Self::PlayerAction { .. } => "player_action",
            Self::GameVote { .. } => "game_vote",
            Self::StartVote => "start_vote",
            Self::EndVote => "end_vote",
            Self::UpdateRoomSettings(_) => "update_room_settings",
            Self::GenerateScript => "generate_script",
            Self::NextStage => "next_stage",
            Self::SearchBegin => "search_begin",
            Self::SearchEnd => "search_end",
            Self::SearchScriptClue { .. } => "search_script_clue",
            Self::Ping => PING,
        }
    }
}

// ── Event payloads ──────────────────────────────────────────────────

/// Welcome payload the server sends right after accepting the connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    #[serde(default)]
    pub room_code: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// Payload of an `error` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// The server's formatted notification payload, shared by every
/// chat/lobby/stage/vote/clue/script event.
///
/// Fields the server adds beyond the common set are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoticePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
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

// ── Room status ─────────────────────────────────────────────────────

/// Point-in-time snapshot of a room, replaced wholesale on every
/// `room_status` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomStatus {
    pub room: RoomInfo,
    #[serde(default)]
    pub script: Option<ScriptInfo>,
    #[serde(default)]
    pub players: Vec<PlayerInfo>,
    #[serde(default)]
    pub characters: Vec<CharacterInfo>,
    #[serde(default)]
    pub story_timeline: Option<StoryTimeline>,
    #[serde(default)]
    pub current_stage: Option<StageProgress>,
    #[serde(default)]
    pub clues: Option<CluesInfo>,
    #[serde(default)]
    pub voting_info: Option<VotingInfo>,
    #[serde(default)]
    pub search_info: Option<SearchInfo>,
    #[serde(default)]
    pub solution: Option<Value>,
}

/// Room-level settings that may be edited before generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSettings {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub ai_dm_personality: Option<String>,
    #[serde(default)]
    pub duration_mins: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub code: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub current_stage: Option<String>,
    #[serde(default)]
    pub host_user_id: Option<UserId>,
    #[serde(default)]
    pub ai_dm_personality: Option<String>,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub game_settings: Option<GameSettings>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptInfo {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub player_count_min: Option<u32>,
    #[serde(default)]
    pub player_count_max: Option<u32>,
    #[serde(default)]
    pub duration_mins: Option<u32>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub total_stages: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: UserId,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_ready: bool,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub is_alive: Option<bool>,
    #[serde(default)]
    pub character_name: Option<String>,
    #[serde(default)]
    pub character_id: Option<i64>,
}

/// A script character.
///
/// The lobby shape carries `id`/`name`/`selected_by`; once the game runs the
/// server sends the detailed shape with `character_id`/`character_name` and
/// the owning player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterInfo {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub character_id: Option<i64>,
    #[serde(default)]
    pub character_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub public_info: Option<String>,
    #[serde(default)]
    pub selected_by: Option<UserId>,
    #[serde(default)]
    pub player_nickname: Option<String>,
    #[serde(default)]
    pub is_alive: Option<bool>,
    #[serde(default)]
    pub is_self: Option<bool>,
}

impl CharacterInfo {
    /// Character id regardless of which shape the server sent.
    pub fn resolved_id(&self) -> Option<i64> {
        self.id.or(self.character_id)
    }

    /// Character name regardless of which shape the server sent.
    pub fn resolved_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.character_name.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryTimeline {
    #[serde(default)]
    pub public: Vec<TimelineEvent>,
    #[serde(default)]
    pub private: Vec<TimelineEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: i64,
    #[serde(default)]
    pub event_description: String,
    #[serde(default)]
    pub sys_description: Option<String>,
    #[serde(default)]
    pub character_name: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Current stage plus every stage reached so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    #[serde(default)]
    pub current_stage: Option<StageInfo>,
    #[serde(default)]
    pub all_stages: Vec<StageInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub stage_number: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub opening_narrative: String,
    #[serde(default)]
    pub stage_goal: String,
    #[serde(default)]
    pub is_evidence: bool,
    #[serde(default)]
    pub is_current: Option<bool>,
    #[serde(default)]
    pub character_goal: Option<CharacterGoal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterGoal {
    #[serde(default)]
    pub goal_description: String,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub search_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClueInfo {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub discovery_location: Option<String>,
    #[serde(default)]
    pub discovery_stage: Option<String>,
    #[serde(default)]
    pub stage_number: Option<u32>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub searched_from: Option<String>,
    #[serde(default)]
    pub searched_from_character: Option<String>,
    #[serde(default)]
    pub is_public_search: Option<bool>,
    #[serde(default)]
    pub search_timestamp: Option<String>,
    #[serde(default)]
    pub owner_character: Option<String>,
    #[serde(default)]
    pub owner_user_id: Option<UserId>,
    #[serde(default)]
    pub owner_nickname: Option<String>,
}

/// Clues visible to the receiving player, flat and grouped by stage name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CluesInfo {
    #[serde(default)]
    pub public: Vec<ClueInfo>,
    #[serde(default)]
    pub private: Vec<ClueInfo>,
    #[serde(default)]
    pub searched: Vec<ClueInfo>,
    #[serde(default)]
    pub public_by_stage: HashMap<String, Vec<ClueInfo>>,
    #[serde(default)]
    pub private_by_stage: HashMap<String, Vec<ClueInfo>>,
    #[serde(default)]
    pub searched_by_stage: HashMap<String, Vec<ClueInfo>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCount {
    pub user_id: UserId,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub vote_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteDetail {
    pub voter_user_id: UserId,
    #[serde(default)]
    pub voter_nickname: String,
    pub voted_user_id: UserId,
    #[serde(default)]
    pub voted_nickname: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingInfo {
    #[serde(default)]
    pub vote_counts: Vec<VoteCount>,
    #[serde(default)]
    pub vote_details: Vec<VoteDetail>,
    #[serde(default)]
    pub total_votes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchableCharacter {
    pub user_id: UserId,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub character_name: String,
    #[serde(default)]
    pub character_id: i64,
    #[serde(default)]
    pub is_online: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchInfo {
    #[serde(default)]
    pub searchable_characters: Vec<SearchableCharacter>,
    #[serde(default)]
    pub available_clues: Vec<ClueInfo>,
    #[serde(default)]
    pub owned_clues: Vec<ClueInfo>,
    #[serde(default)]
    pub available_clues_by_stage: HashMap<String, Vec<ClueInfo>>,
    #[serde(default)]
    pub owned_clues_by_stage: HashMap<String, Vec<ClueInfo>>,
    #[serde(default)]
    pub search_attempts_left: u32,
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
    use serde_json::json;

    #[test]
    fn unit_commands_omit_data() {
        let json = serde_json::to_value(ClientCommand::StartGame).unwrap();
        assert_eq!(json, json!({"type": "start_game"}));
        let json = serde_json::to_value(ClientCommand::Ping).unwrap();
        assert_eq!(json, json!({"type": "ping"}));
    }

    #[test]
    fn payload_commands_nest_under_data() {
        let json = serde_json::to_value(ClientCommand::PrivateMessage {
            recipient_id: 7,
            message: "psst".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            json!({"type": "private_message", "data": {"recipient_id": 7, "message": "psst"}})
        );
    }

    #[test]
    fn room_settings_skip_unset_fields() {
        let json = serde_json::to_value(ClientCommand::UpdateRoomSettings(RoomSettings {
            theme: Some("palace".into()),
            duration_mins: Some(90),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(
            json,
            json!({"type": "update_room_settings", "data": {"theme": "palace", "duration_mins": 90}})
        );
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let commands = [
            ClientCommand::Chat { message: "hi".into() },
            ClientCommand::SelectCharacter { character_id: 1 },
            ClientCommand::Ready { ready: true },
            ClientCommand::StartGame,
            ClientCommand::PlayerAction { action: "look".into() },
            ClientCommand::GameVote { voted_user_id: 3 },
            ClientCommand::StartVote,
            ClientCommand::EndVote,
            ClientCommand::GenerateScript,
            ClientCommand::NextStage,
            ClientCommand::SearchBegin,
            ClientCommand::SearchEnd,
            ClientCommand::SearchScriptClue { clue_id: Some(5) },
            ClientCommand::Ping,
        ];
        for command in commands {
            let json = serde_json::to_value(&command).unwrap();
            assert_eq!(json["type"], command.kind());
        }
    }

    #[test]
    fn envelope_tolerates_missing_and_null_data() {
        let env: Envelope = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert!(env.data.is_none());
        assert!(env.is_heartbeat());

        let env: Envelope = serde_json::from_str(r#"{"type":"chat","data":null}"#).unwrap();
        assert!(env.data.is_none());
        assert!(!env.is_heartbeat());
    }

    #[test]
    fn envelope_keeps_top_level_message() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"error","message":"bad json"}"#).unwrap();
        assert_eq!(env.message.as_deref(), Some("bad json"));
    }

    #[test]
    fn notice_payload_preserves_extra_fields() {
        let payload: NoticePayload = serde_json::from_value(json!({
            "message": "hello",
            "send_id": 4,
            "send_nickname": "Ann",
            "recipient_id": null,
            "mood": "tense"
        }))
        .unwrap();
        assert_eq!(payload.message.as_deref(), Some("hello"));
        assert_eq!(payload.send_id, Some(4));
        assert!(payload.recipient_id.is_none());
        assert_eq!(payload.extra.get("mood"), Some(&json!("tense")));
    }

    #[test]
    fn lobby_room_status_decodes() {
        let status: RoomStatus = serde_json::from_value(json!({
            "room": {
                "code": "ABC123",
                "status": "waiting",
                "ai_dm_personality": "lively",
                "max_players": 6,
                "game_settings": {"theme": "palace"}
            },
            "script": null,
            "players": [
                {"user_id": 1, "nickname": "Ann", "is_ready": true, "is_host": true, "is_online": true}
            ],
            "characters": [
                {"id": 10, "name": "Prince", "gender": "m", "public_info": "heir", "selected_by": 1}
            ]
        }))
        .unwrap();

        assert_eq!(status.room.code, "ABC123");
        assert!(status.script.is_none());
        assert_eq!(status.players.len(), 1);
        assert_eq!(status.characters[0].resolved_id(), Some(10));
        assert_eq!(status.characters[0].resolved_name(), Some("Prince"));
    }

    #[test]
    fn in_game_character_shape_resolves() {
        let character: CharacterInfo = serde_json::from_value(json!({
            "player_nickname": "Ann",
            "character_name": "Maid",
            "character_id": 12,
            "is_alive": true,
            "is_self": false
        }))
        .unwrap();
        assert_eq!(character.resolved_id(), Some(12));
        assert_eq!(character.resolved_name(), Some("Maid"));
    }
}
