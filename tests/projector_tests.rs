#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Projector tests: view folding, auto-reconnect and ownership.

mod common;

use std::sync::Arc;

use mystery_room_client::{
    ConnectionRegistry, EventKind, Ownership, ProjectorOptions, RoomProjector,
};
use serde_json::json;

use common::{advance_ms, init_tracing, settle, test_config, MockConnector};

fn registry(connector: &Arc<MockConnector>) -> ConnectionRegistry {
    init_tracing();
    ConnectionRegistry::with_connector(test_config(), Arc::clone(connector) as _)
}

fn manual() -> ProjectorOptions {
    ProjectorOptions::new().with_auto_connect(false)
}

// ════════════════════════════════════════════════════════════════════
// Mounting
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn mount_connects_automatically() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let projector = RoomProjector::mount(&registry, "MANOR1", ProjectorOptions::default());
    settle().await;

    assert_eq!(connector.opens(), 1);
    assert!(projector.is_connected());
    assert!(projector.connection().is_connected());
    assert_eq!(projector.message_count(), 0);
    projector.disconnect();
}

#[tokio::test(start_paused = true)]
async fn projectors_share_the_room_connection() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let a = RoomProjector::mount(&registry, "MANOR1", ProjectorOptions::default());
    let b = RoomProjector::mount(&registry, "MANOR1", ProjectorOptions::default());
    settle().await;

    assert_eq!(connector.opens(), 1);
    assert!(a.connection().ptr_eq(b.connection()));
    assert_eq!(a.connection().listener_count(EventKind::Chat), 2);

    connector
        .server()
        .push_json(json!({"type": "chat", "data": {"message": "hi"}}));
    settle().await;
    assert_eq!(a.message_count(), 1);
    assert_eq!(b.message_count(), 1);
    a.disconnect();
}

// ════════════════════════════════════════════════════════════════════
// Folding
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn view_tracks_snapshot_and_message_log() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let projector = RoomProjector::mount(&registry, "MANOR1", manual());
    projector.connect().await.unwrap();
    settle().await;

    let server = connector.server();
    server.push_json(json!({
        "type": "room_status",
        "data": {"room": {"code": "MANOR1", "status": "waiting"}}
    }));
    server.push_json(json!({
        "type": "chat",
        "data": {"message": "evening all", "send_id": 1, "send_nickname": "Ann", "datetime": "2026-03-01T20:00:00"}
    }));
    server.push_json(json!({
        "type": "player_action",
        "data": {"action": "lights a candle", "send_nickname": "Ben"}
    }));
    server.push_json(json!({"type": "error", "data": {"message": "not your turn"}}));
    server.push_json(json!({
        "type": "room_status",
        "data": {"room": {"code": "MANOR1", "status": "playing"}}
    }));
    settle().await;

    let view = projector.view();
    assert!(view.is_connected);
    assert_eq!(view.room_status.as_ref().unwrap().room.status, "playing");

    let log: Vec<_> = view
        .messages
        .iter()
        .map(|m| (m.message_type, m.message.clone().unwrap_or_default()))
        .collect();
    assert_eq!(
        log,
        vec![
            (EventKind::Chat, "evening all".to_string()),
            (EventKind::PlayerAction, "lights a candle".to_string()),
            (EventKind::Error, "Error: not your turn".to_string()),
        ]
    );
    assert_eq!(view.messages[0].datetime, "2026-03-01T20:00:00");
    assert_eq!(view.messages[2].send_nickname.as_deref(), Some("System"));
    projector.disconnect();
}

#[tokio::test(start_paused = true)]
async fn subscribers_are_woken_on_change() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let projector = RoomProjector::mount(&registry, "MANOR1", manual());
    projector.connect().await.unwrap();
    settle().await;

    let mut view = projector.subscribe();
    connector.server().push_json(json!({
        "type": "clue_discovered",
        "data": {"message": "A torn letter"}
    }));
    view.changed().await.unwrap();
    assert_eq!(view.borrow().messages[0].message_type, EventKind::ClueDiscovered);
    projector.disconnect();
}

// ════════════════════════════════════════════════════════════════════
// Commands
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn commands_reach_the_server() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let projector = RoomProjector::mount(&registry, "MANOR1", manual());
    projector.connect().await.unwrap();

    projector.select_character(11);
    projector.set_ready(true);
    projector.send_private_message(2, "psst");
    projector.send_vote(2);
    projector.search_script_clue(None);
    settle().await;

    assert_eq!(
        connector.server().sent_json(),
        vec![
            json!({"type": "select_character", "data": {"character_id": 11}}),
            json!({"type": "ready", "data": {"ready": true}}),
            json!({"type": "private_message", "data": {"recipient_id": 2, "message": "psst"}}),
            json!({"type": "game_vote", "data": {"voted_user_id": 2}}),
            json!({"type": "search_script_clue", "data": {}}),
        ]
    );
    projector.disconnect();
}

// ════════════════════════════════════════════════════════════════════
// Auto-reconnect
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn reconnects_after_delay_when_backoff_is_exhausted() {
    init_tracing();
    let connector = MockConnector::new();
    let registry = ConnectionRegistry::with_connector(
        test_config().with_max_reconnect_attempts(0),
        Arc::clone(&connector) as _,
    );
    let projector = RoomProjector::mount(&registry, "MANOR1", manual());
    projector.connect().await.unwrap();
    settle().await;

    connector.server().close(1006, "network lost");
    settle().await;
    assert!(!projector.is_connected());
    assert_eq!(
        projector.view().messages[0].extra.get("code"),
        Some(&json!(1006))
    );

    advance_ms(1999).await;
    assert_eq!(connector.opens(), 1);
    advance_ms(1).await;
    assert_eq!(connector.opens(), 2);
    assert!(projector.is_connected());
    projector.disconnect();
}

#[tokio::test(start_paused = true)]
async fn disconnect_disarms_auto_reconnect() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let projector = RoomProjector::mount(&registry, "MANOR1", manual());
    projector.connect().await.unwrap();
    settle().await;

    projector.disconnect();
    settle().await;
    advance_ms(30_000).await;

    assert_eq!(connector.opens(), 1);
    assert!(!projector.is_connected());
    let last = projector.view().messages.pop().unwrap();
    assert_eq!(last.message_type, EventKind::Disconnected);
    assert_eq!(last.extra.get("code"), Some(&json!(1000)));
}

#[tokio::test(start_paused = true)]
async fn manual_close_by_another_consumer_suppresses_reconnect() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let projector = RoomProjector::mount(&registry, "MANOR1", manual());
    projector.connect().await.unwrap();
    settle().await;

    registry.connection("MANOR1").disconnect();
    settle().await;
    advance_ms(30_000).await;
    assert_eq!(connector.opens(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Ownership
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn dropping_shared_projector_keeps_connection() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let projector = RoomProjector::mount(&registry, "MANOR1", ProjectorOptions::default());
    settle().await;
    let connection = projector.connection().clone();
    assert_eq!(connection.listener_count(EventKind::RoomStatus), 1);

    drop(projector);
    settle().await;
    assert_eq!(connection.listener_count(EventKind::RoomStatus), 0);
    assert!(connection.is_connected());
    assert!(registry.contains("MANOR1"));
    connection.disconnect();
}

#[tokio::test(start_paused = true)]
async fn dropping_owner_projector_disposes_connection() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let projector = RoomProjector::mount(
        &registry,
        "MANOR1",
        ProjectorOptions::default().with_ownership(Ownership::Owner),
    );
    settle().await;

    drop(projector);
    settle().await;
    assert!(!registry.contains("MANOR1"));
    assert!(connector.server().is_closed());
}

#[tokio::test(start_paused = true)]
async fn leave_disposes_connection() {
    let connector = MockConnector::new();
    let registry = registry(&connector);
    let projector = RoomProjector::mount(&registry, "MANOR1", ProjectorOptions::default());
    settle().await;

    projector.leave();
    settle().await;
    advance_ms(30_000).await;
    assert!(registry.is_empty());
    assert!(connector.server().is_closed());
    assert_eq!(connector.opens(), 1);
}
