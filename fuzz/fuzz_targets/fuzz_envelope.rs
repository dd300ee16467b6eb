#![no_main]
use libfuzzer_sys::fuzz_target;
use panelbot::backend::envelope::{normalize_bulk, normalize_item, normalize_list};
use panelbot::entity::EntityKind;

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = serde_json::from_slice::<serde_json::Value>(data) {
        for kind in EntityKind::ALL {
            let _ = normalize_list(kind, &body);
            let _ = normalize_item(kind, &body);
        }
        let _ = normalize_bulk(&body, 3);
    }
});
