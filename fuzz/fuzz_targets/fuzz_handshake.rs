//! Fuzz target for the HTTP upgrade handshake.
//!
//! # Safety Properties Tested
//!
//! - No panics on arbitrary request heads, valid UTF-8 or not
//! - `find_header_end` always points just past a `\r\n\r\n`
//! - Every accepted request yields a 101 response with a 28-character key

#![no_main]

use companion_gateway::protocol::handshake::{accept, find_header_end, is_upgrade_request, HEADER_TERMINATOR};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(end) = find_header_end(data) {
        assert!(end >= HEADER_TERMINATOR.len());
        assert_eq!(&data[end - HEADER_TERMINATOR.len()..end], HEADER_TERMINATOR);
    }

    let request = String::from_utf8_lossy(data);
    let upgrade = is_upgrade_request(&request);
    if let Ok(response) = accept(&request) {
        assert!(upgrade, "accepted a request without Upgrade: websocket");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        let key = response
            .split("\r\n")
            .find_map(|line| line.strip_prefix("Sec-WebSocket-Accept: "))
            .expect("accept header present");
        assert_eq!(key.len(), 28);
    }
});
