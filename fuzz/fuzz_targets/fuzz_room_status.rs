#![no_main]

use libfuzzer_sys::fuzz_target;
use mystery_room_client::RoomStatus;

fuzz_target!(|data: &[u8]| {
    if let Ok(status) = serde_json::from_slice::<RoomStatus>(data) {
        // Whatever decodes must encode again.
        let _ = serde_json::to_vec(&status);
        let _ = status.characters.iter().map(|c| c.resolved_name()).count();
    }
});
