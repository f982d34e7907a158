#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(name) = chatdesk::sessions::extract_name(s) {
            assert!(!name.trim().is_empty(), "accepted a blank name");
        }
    }
});
