#![no_main]
use libfuzzer_sys::fuzz_target;
use panelbot::console::CallbackToken;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(token) = CallbackToken::parse(s) {
            // Whatever parses must survive its own encoding.
            let _ = CallbackToken::parse(&token.encode());
        }
    }
});
