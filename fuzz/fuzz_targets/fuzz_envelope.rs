//! Fuzz target for inbound envelope handling.
//!
//! # Safety Properties Tested
//!
//! - The routing filter and envelope parser never panic
//! - Decoding `data` into every command shape never panics
//! - Unroutable text never parses as an envelope

#![no_main]

use companion_gateway::protocol::envelope::{InboundEnvelope, SelectProfileData, StartGameData};
use companion_gateway::server::connection::is_routable;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|text: &str| {
    let routable = is_routable(text);
    let parsed = InboundEnvelope::parse(text);
    if !routable {
        let trimmed = text.trim();
        if !trimmed.contains(char::REPLACEMENT_CHARACTER) {
            assert!(parsed.is_err() || trimmed.starts_with('{') || trimmed.starts_with('['));
        }
        return;
    }

    if let Ok(envelope) = parsed {
        let _ = envelope.decode_data::<StartGameData>();
        let _ = envelope.decode_data::<SelectProfileData>();
    }
});
