#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Wire-format tests against frames shaped like the room server's output.
//!
//! Frames are decoded the way the connection does it: text → [`Envelope`]
//! → [`RoomEvent`].

use mystery_room_client::event::DecodeError;
use mystery_room_client::protocol::RoomSettings;
use mystery_room_client::{ClientCommand, CloseCode, Envelope, EventKind, RoomEvent};
use serde_json::{json, Value};

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

fn decode(frame: Value) -> Result<RoomEvent, DecodeError> {
    let envelope: Envelope = serde_json::from_str(&frame.to_string()).expect("envelope");
    RoomEvent::try_from(envelope)
}

fn encode(command: &ClientCommand) -> Value {
    serde_json::to_value(command).expect("serialize")
}

// ════════════════════════════════════════════════════════════════════
// Outgoing commands
// ════════════════════════════════════════════════════════════════════

#[test]
fn every_command_has_its_wire_shape() {
    let cases = [
        (
            ClientCommand::Chat {
                message: "hello".into(),
            },
            json!({"type": "chat", "data": {"message": "hello"}}),
        ),
        (
            ClientCommand::SelectCharacter { character_id: 3 },
            json!({"type": "select_character", "data": {"character_id": 3}}),
        ),
        (
            ClientCommand::Ready { ready: false },
            json!({"type": "ready", "data": {"ready": false}}),
        ),
        (ClientCommand::StartGame, json!({"type": "start_game"})),
        (
            ClientCommand::PrivateMessage {
                recipient_id: 12,
                message: "meet me in the library".into(),
            },
            json!({"type": "private_message", "data": {"recipient_id": 12, "message": "meet me in the library"}}),
        ),
        (
            ClientCommand::PlayerAction {
                action: "searches the study".into(),
            },
            json!({"type": "player_action", "data": {"action": "searches the study"}}),
        ),
        (
            ClientCommand::GameVote { voted_user_id: 5 },
            json!({"type": "game_vote", "data": {"voted_user_id": 5}}),
        ),
        (ClientCommand::StartVote, json!({"type": "start_vote"})),
        (ClientCommand::EndVote, json!({"type": "end_vote"})),
        (ClientCommand::GenerateScript, json!({"type": "generate_script"})),
        (ClientCommand::NextStage, json!({"type": "next_stage"})),
        (ClientCommand::SearchBegin, json!({"type": "search_begin"})),
        (ClientCommand::SearchEnd, json!({"type": "search_end"})),
        (
            ClientCommand::SearchScriptClue { clue_id: Some(40) },
            json!({"type": "search_script_clue", "data": {"clue_id": 40}}),
        ),
        (ClientCommand::Ping, json!({"type": "ping"})),
    ];

    for (command, expected) in cases {
        assert_eq!(encode(&command), expected, "{}", command.kind());
        assert_eq!(expected["type"], command.kind());
    }
}

#[test]
fn room_settings_update_carries_only_set_fields() {
    let command = ClientCommand::UpdateRoomSettings(RoomSettings {
        theme: Some("victorian".into()),
        duration_mins: Some(90),
        ..RoomSettings::default()
    });
    assert_eq!(
        encode(&command),
        json!({"type": "update_room_settings", "data": {"theme": "victorian", "duration_mins": 90}})
    );
}

// ════════════════════════════════════════════════════════════════════
// Incoming events
// ════════════════════════════════════════════════════════════════════

#[test]
fn in_game_room_status_decodes() {
    let event = decode(json!({
        "type": "room_status",
        "data": {
            "room": {
                "code": "MANOR1",
                "status": "playing",
                "current_stage": "investigation",
                "host_user_id": 1,
                "max_players": 4,
                "started_at": "2026-03-01T20:00:00"
            },
            "script": {"id": 9, "title": "Death at Blackwood Manor", "total_stages": 3},
            "players": [
                {"user_id": 1, "nickname": "Ann", "is_host": true, "is_online": true},
                {"user_id": 2, "nickname": "Ben", "is_online": false}
            ],
            "characters": [
                {"character_id": 11, "character_name": "The Butler", "player_nickname": "Ann", "is_self": true}
            ],
            "story_timeline": {
                "public": [{"id": 1, "event_description": "A scream at midnight", "is_public": true}],
                "private": []
            },
            "current_stage": {
                "current_stage": {"stage_number": 2, "name": "Investigation", "is_evidence": true},
                "all_stages": [
                    {"stage_number": 1, "name": "Introduction"},
                    {"stage_number": 2, "name": "Investigation", "is_current": true,
                     "character_goal": {"goal_description": "Hide the letter", "is_mandatory": true, "search_attempts": 2}}
                ]
            },
            "clues": {
                "public": [{"id": 100, "name": "Muddy boots"}],
                "public_by_stage": {"Investigation": [{"id": 100, "name": "Muddy boots"}]}
            },
            "voting_info": {
                "vote_counts": [{"user_id": 2, "nickname": "Ben", "vote_count": 1}],
                "vote_details": [{"voter_user_id": 1, "voter_nickname": "Ann", "voted_user_id": 2, "voted_nickname": "Ben"}],
                "total_votes": 1
            },
            "search_info": {
                "searchable_characters": [{"user_id": 2, "nickname": "Ben", "character_name": "The Maid", "character_id": 12}],
                "search_attempts_left": 2
            }
        }
    }))
    .unwrap();

    let RoomEvent::RoomStatus(status) = event else {
        panic!("expected room_status");
    };
    assert_eq!(status.room.status, "playing");
    assert_eq!(status.script.as_ref().unwrap().title, "Death at Blackwood Manor");
    assert!(status.players[0].is_host);
    assert_eq!(status.characters[0].resolved_name(), Some("The Butler"));
    assert_eq!(status.characters[0].resolved_id(), Some(11));

    let stages = status.current_stage.as_ref().unwrap();
    assert_eq!(stages.current_stage.as_ref().unwrap().stage_number, 2);
    assert_eq!(
        stages.all_stages[1].character_goal.as_ref().unwrap().search_attempts,
        2
    );
    assert_eq!(
        status.clues.as_ref().unwrap().public_by_stage["Investigation"][0].name,
        "Muddy boots"
    );
    assert_eq!(status.voting_info.as_ref().unwrap().total_votes, 1);
    assert_eq!(status.search_info.as_ref().unwrap().search_attempts_left, 2);
    assert!(status.solution.is_none());
}

#[test]
fn every_notice_kind_decodes_a_formatted_payload() {
    for &kind in EventKind::ALL.iter().filter(|kind| kind.is_notice()) {
        let event = decode(json!({
            "type": kind.as_str(),
            "data": {
                "message": "something happened",
                "datetime": "2026-03-01T20:00:00",
                "send_id": 1,
                "send_nickname": "Ann"
            }
        }))
        .unwrap();
        let RoomEvent::Notice { kind: decoded, payload } = event else {
            panic!("{kind} did not decode as a notice");
        };
        assert_eq!(decoded, kind);
        assert_eq!(payload.send_nickname.as_deref(), Some("Ann"));
    }
}

#[test]
fn private_message_keeps_recipient() {
    let event = decode(json!({
        "type": "private_message",
        "data": {
            "message": "it was the maid",
            "send_id": 1,
            "send_nickname": "Ann",
            "recipient_id": 2,
            "recipient_nickname": "Ben"
        }
    }))
    .unwrap();
    let RoomEvent::Notice { payload, .. } = event else {
        panic!("expected notice");
    };
    assert_eq!(payload.recipient_id, Some(2));
    assert_eq!(payload.recipient_nickname.as_deref(), Some("Ben"));
}

#[test]
fn vote_ended_keeps_result_fields() {
    let event = decode(json!({
        "type": "vote_ended",
        "data": {"message": "Voting closed", "winner_user_id": 2, "tally": {"2": 3}}
    }))
    .unwrap();
    let RoomEvent::Notice { payload, .. } = event else {
        panic!("expected notice");
    };
    assert_eq!(payload.extra["winner_user_id"], 2);
    assert_eq!(payload.extra["tally"], json!({"2": 3}));
}

#[test]
fn server_close_frame_decodes_as_disconnected() {
    let event = decode(json!({
        "type": "disconnected",
        "data": {"code": 4001, "reason": "token expired"}
    }))
    .unwrap();
    let RoomEvent::Disconnected(frame) = event else {
        panic!("expected disconnected");
    };
    assert_eq!(frame.code, CloseCode::Unauthorized);
    assert!(frame.code.is_rejection());
}

#[test]
fn mistyped_payload_is_rejected_with_its_kind() {
    let err = decode(json!({"type": "chat", "data": {"send_id": "not a number"}})).unwrap_err();
    match err {
        DecodeError::Payload { kind, .. } => assert_eq!(kind, EventKind::Chat),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn extra_envelope_fields_are_ignored() {
    let event = decode(json!({
        "type": "game_started",
        "data": {"message": "The game begins"},
        "room_code": "MANOR1",
        "seq": 17
    }))
    .unwrap();
    assert_eq!(event.kind(), EventKind::GameStarted);
}
