#![no_main]

use libfuzzer_sys::fuzz_target;
use modbank::{parse_request, Request};

fuzz_target!(|data: &[u8]| {
    if let Ok(name) = std::str::from_utf8(data) {
        if let Request::Modules { tokens, .. } = parse_request(Some(name), false) {
            assert!(tokens.iter().all(|token| !token.name.contains(',')));
        }
    }
});
