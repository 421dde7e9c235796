//! Fuzz target for WebSocket frame decoding.
//!
//! # Safety Properties Tested
//!
//! - No panics on arbitrary byte sequences, including truncated headers and
//!   64-bit lengths with the high bit set
//! - Announced lengths over the limit are refused before any allocation
//! - Masked frames built by `encode_masked` decode back to their payload

#![no_main]

use std::io::Cursor;

use arbitrary::Arbitrary;
use companion_gateway::protocol::frame::{decode, encode_masked, FrameError, Opcode};
use libfuzzer_sys::fuzz_target;

const LIMIT: usize = 65_535;

#[derive(Debug, Arbitrary)]
enum FrameInput {
    /// Raw bytes straight into the decoder.
    Raw { bytes: Vec<u8>, limit: u16 },
    /// A well-formed client frame.
    Masked {
        opcode: u8,
        payload: Vec<u8>,
        mask: [u8; 4],
    },
    /// Several frames back to back on one stream.
    Stream { frames: Vec<(Vec<u8>, [u8; 4])> },
}

fuzz_target!(|input: FrameInput| {
    match input {
        FrameInput::Raw { bytes, limit } => {
            let limit = usize::from(limit);
            match decode(&mut Cursor::new(bytes), limit) {
                Ok(frame) => assert!(frame.payload.len() <= limit),
                Err(FrameError::PayloadTooLarge { length, limit: reported }) => {
                    assert_eq!(reported, limit);
                    assert!(length > limit as u64);
                },
                Err(_) => {},
            }
        },
        FrameInput::Masked { opcode, payload, mask } => {
            let opcode = Opcode::from_nibble(opcode & 0x0F);
            let bytes = encode_masked(opcode, &payload, mask);
            match decode(&mut Cursor::new(bytes), LIMIT) {
                Ok(frame) => {
                    assert_eq!(frame.opcode, opcode);
                    assert_eq!(frame.payload, payload);
                    assert_eq!(frame.mask_key, Some(mask));
                },
                Err(FrameError::PayloadTooLarge { .. }) => assert!(payload.len() > LIMIT),
                Err(err) => panic!("well-formed frame rejected: {err}"),
            }
        },
        FrameInput::Stream { frames } => {
            let mut bytes = Vec::new();
            for (payload, mask) in &frames {
                bytes.extend(encode_masked(Opcode::Text, payload, *mask));
            }
            let mut cursor = Cursor::new(bytes);
            for (payload, _) in &frames {
                let frame = decode(&mut cursor, usize::MAX).expect("stream frame decodes");
                assert_eq!(&frame.payload, payload);
            }
            assert!(matches!(decode(&mut cursor, LIMIT), Err(FrameError::PeerClosed)));
        },
    }
});
