//! # Basic Room Demo
//!
//! Joins one murder-mystery room and prints what happens in it:
//!
//! 1. Build a registry pointed at the room server
//! 2. Mount a projector for the room (connects automatically)
//! 3. Say hello and mark ready once connected
//! 4. Print new log entries and room status changes
//! 5. Leave the room on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! ROOM_SERVER_URL=ws://127.0.0.1:8000 ROOM_TOKEN=... ROOM_CODE=ABC123 \
//!     cargo run --example basic_room
//! ```

use mystery_room_client::{ConnectionConfig, ConnectionRegistry, ProjectorOptions, RoomProjector};

const DEFAULT_URL: &str = "ws://127.0.0.1:8000";
const DEFAULT_ROOM: &str = "ABC123";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=mystery_room_client=debug` for connection details.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("ROOM_SERVER_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let room = std::env::var("ROOM_CODE").unwrap_or_else(|_| DEFAULT_ROOM.to_string());
    let mut config = ConnectionConfig::new(url);
    if let Ok(token) = std::env::var("ROOM_TOKEN") {
        config = config.with_token(token);
    }
    tracing::info!(url = %config.room_url(&room)?, "joining room");

    // ── Mount ───────────────────────────────────────────────────────
    let registry = ConnectionRegistry::new(config);
    let projector = RoomProjector::mount(&registry, &room, ProjectorOptions::default());
    let mut view = projector.subscribe();

    // ── Event loop ──────────────────────────────────────────────────
    let mut printed = 0;
    let mut was_connected = false;
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();

                if snapshot.is_connected && !was_connected {
                    tracing::info!("connected");
                    projector.send_chat("Good evening, everyone.");
                    projector.set_ready(true);
                }
                was_connected = snapshot.is_connected;

                for entry in snapshot.messages.iter().skip(printed) {
                    println!(
                        "[{}] {} {}: {}",
                        entry.datetime,
                        entry.message_type,
                        entry.send_nickname.as_deref().unwrap_or("-"),
                        entry.message.as_deref().unwrap_or(""),
                    );
                }
                printed = snapshot.messages.len();

                if let Some(status) = &snapshot.room_status {
                    tracing::info!(
                        status = %status.room.status,
                        players = status.players.len(),
                        "room status"
                    );
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving room");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    projector.leave();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}
