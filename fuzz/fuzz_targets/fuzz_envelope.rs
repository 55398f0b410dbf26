#![no_main]

use libfuzzer_sys::fuzz_target;
use mystery_room_client::{Envelope, RoomEvent};

fuzz_target!(|data: &[u8]| {
    // Same path as an incoming text frame: envelope first, then the typed
    // event. Neither step may panic on arbitrary input.
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(envelope) = serde_json::from_str::<Envelope>(text) {
        let _ = RoomEvent::try_from(envelope);
    }
});
