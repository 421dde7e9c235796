//! WebSocket data-frame codec.
//!
//! Pure functions only: [`decode`] pulls one frame out of any [`Read`], [`encode`]
//! produces the bytes of one unfragmented, unmasked text frame. Neither touches a
//! socket directly, so both are exercised by unit tests, property tests, the
//! `frame_codec` benchmark and the `fuzz_frame_decode` target.
//!
//! # Length regimes
//!
//! | payload length | header |
//! |----------------|--------|
//! | `< 126` | 2 bytes, length in byte 1 |
//! | `126..=65535` | 4 bytes, marker `126` + big-endian `u16` |
//! | `>= 65536` | 10 bytes, marker `127` + big-endian `u64` |
//!
//! The decoder parses all three regimes, then checks the announced length against
//! the caller's `max_payload_len` before allocating. Clients of this gateway send
//! short commands, so with the default limit of 65535 any `127`-marked inbound
//! frame fails with [`FrameError::PayloadTooLarge`] and the connection is closed.
//! A 64-bit length with the most significant bit set is malformed and fails with
//! [`FrameError::UnsupportedLength`].
//!
//! # Examples
//!
//! ```
//! use companion_gateway::protocol::frame::{decode, encode, Opcode};
//!
//! let bytes = encode("{\"type\":\"response\"}");
//! assert_eq!(bytes[0], 0x81); // FIN + text
//! assert_eq!(bytes[1] & 0x80, 0); // never masked
//!
//! let frame = decode(&mut bytes.as_slice(), 65_535).unwrap();
//! assert_eq!(frame.opcode, Opcode::Text);
//! assert_eq!(frame.text(), "{\"type\":\"response\"}");
//! ```

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read};

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN_MASK: u8 = 0x7F;

/// Length marker announcing a 16-bit extended payload length.
pub const LEN_MARKER_16: u8 = 126;
/// Length marker announcing a 64-bit extended payload length.
pub const LEN_MARKER_64: u8 = 127;

/// Frame opcodes. Only [`Opcode::Text`] carries gateway traffic; everything else
/// is decoded so the caller can decide to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continuation of a fragmented message (never produced by the gateway).
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Connection close.
    Close,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
    /// One of the reserved opcodes, kept verbatim.
    Reserved(u8),
}

impl Opcode {
    /// Decodes the low nibble of the first header byte.
    #[must_use]
    pub const fn from_nibble(value: u8) -> Self {
        match value & OPCODE_MASK {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    /// The wire value of this opcode.
    #[must_use]
    pub const fn as_nibble(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(value) => value & OPCODE_MASK,
        }
    }
}

/// One decoded WebSocket frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Whether the sender masked the payload.
    pub masked: bool,
    /// Payload length as announced in the header.
    pub payload_len: u64,
    /// Mask key, present iff `masked`.
    pub mask_key: Option<[u8; 4]>,
    /// Unmasked payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Payload as text. Invalid UTF-8 is replaced with U+FFFD, which the
    /// connection's inbound filter then drops.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Errors produced while decoding a frame. Every variant means "close this
/// connection"; none of them is fatal to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    /// The peer closed the stream cleanly between frames.
    PeerClosed,
    /// The stream ended in the middle of a frame.
    UnexpectedEof {
        /// Bytes still required by the part being read.
        needed: usize,
    },
    /// The 64-bit extended length had its most significant bit set.
    UnsupportedLength,
    /// The announced payload exceeds the configured limit.
    PayloadTooLarge {
        /// Announced payload length.
        length: u64,
        /// Configured maximum.
        limit: usize,
    },
    /// The underlying reader failed.
    Io {
        /// The I/O error kind.
        kind: io::ErrorKind,
        /// The I/O error message.
        message: String,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the stream"),
            Self::UnexpectedEof { needed } => {
                write!(f, "stream ended with {needed} frame bytes outstanding")
            },
            Self::UnsupportedLength => {
                write!(f, "64-bit extended payload length has its high bit set")
            },
            Self::PayloadTooLarge { length, limit } => {
                write!(f, "payload of {length} bytes exceeds limit of {limit}")
            },
            Self::Io { kind, message } => write!(f, "read failed ({kind:?}): {message}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Reads exactly `buf.len()` bytes, translating a short read into
/// [`FrameError::UnexpectedEof`].
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        let Some(rest) = buf.get_mut(filled..) else {
            break;
        };
        match reader.read(rest) {
            Ok(0) => {
                return Err(FrameError::UnexpectedEof {
                    needed: buf.len() - filled,
                })
            },
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// XORs `payload` in place with the 4-byte mask key. Masking and unmasking are
/// the same operation.
pub fn mask_payload(payload: &mut [u8], key: [u8; 4]) {
    for (byte, k) in payload.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Decodes one frame from `reader`.
///
/// A clean end of stream before the first header byte is reported as
/// [`FrameError::PeerClosed`]; any other short read is
/// [`FrameError::UnexpectedEof`]. A zero-length payload is valid.
pub fn decode<R: Read>(reader: &mut R, max_payload_len: usize) -> Result<Frame, FrameError> {
    let mut header = [0_u8; 2];
    match read_full(reader, &mut header) {
        Err(FrameError::UnexpectedEof { needed: 2 }) => return Err(FrameError::PeerClosed),
        other => other?,
    }

    let [byte0, byte1] = header;
    let fin = byte0 & FIN_BIT != 0;
    let opcode = Opcode::from_nibble(byte0);
    let masked = byte1 & MASK_BIT != 0;

    let payload_len = match byte1 & LEN_MASK {
        LEN_MARKER_64 => {
            let mut ext = [0_u8; 8];
            read_full(reader, &mut ext)?;
            let len = u64::from_be_bytes(ext);
            if len & (1 << 63) != 0 {
                return Err(FrameError::UnsupportedLength);
            }
            len
        },
        LEN_MARKER_16 => {
            let mut ext = [0_u8; 2];
            read_full(reader, &mut ext)?;
            u64::from(u16::from_be_bytes(ext))
        },
        short => u64::from(short),
    };

    if payload_len > max_payload_len as u64 {
        return Err(FrameError::PayloadTooLarge {
            length: payload_len,
            limit: max_payload_len,
        });
    }

    let mask_key = if masked {
        let mut key = [0_u8; 4];
        read_full(reader, &mut key)?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0_u8; payload_len as usize];
    read_full(reader, &mut payload)?;
    if let Some(key) = mask_key {
        mask_payload(&mut payload, key);
    }

    Ok(Frame {
        fin,
        opcode,
        masked,
        payload_len,
        mask_key,
        payload,
    })
}

/// Appends a frame header for `len` payload bytes to `buf`.
fn write_header(buf: &mut Vec<u8>, opcode: Opcode, len: usize, mask_key: Option<[u8; 4]>) {
    let mask_bit = if mask_key.is_some() { MASK_BIT } else { 0 };
    buf.push(FIN_BIT | opcode.as_nibble());
    if len < LEN_MARKER_16 as usize {
        buf.push(mask_bit | len as u8);
    } else if let Ok(short) = u16::try_from(len) {
        buf.push(mask_bit | LEN_MARKER_16);
        buf.extend_from_slice(&short.to_be_bytes());
    } else {
        buf.push(mask_bit | LEN_MARKER_64);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }
    if let Some(key) = mask_key {
        buf.extend_from_slice(&key);
    }
}

/// Size of the header [`encode`] produces for a payload of `len` bytes.
#[must_use]
pub const fn header_len(len: usize) -> usize {
    if len < LEN_MARKER_16 as usize {
        2
    } else if len <= u16::MAX as usize {
        4
    } else {
        10
    }
}

/// Encodes `text` as one unmasked, final text frame.
#[must_use]
pub fn encode(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header_len(text.len()) + text.len());
    encode_into(text, &mut buf);
    buf
}

/// Like [`encode`], but clears and reuses `buf`.
pub fn encode_into(text: &str, buf: &mut Vec<u8>) {
    buf.clear();
    buf.reserve(header_len(text.len()) + text.len());
    write_header(buf, Opcode::Text, text.len(), None);
    buf.extend_from_slice(text.as_bytes());
}

/// Encodes a masked, final frame the way a browser client would.
///
/// The gateway never sends masked frames; this exists for test clients, the
/// fuzz corpus and benchmarks.
#[must_use]
pub fn encode_masked(opcode: Opcode, payload: &[u8], mask_key: [u8; 4]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header_len(payload.len()) + 4 + payload.len());
    write_header(&mut buf, opcode, payload.len(), Some(mask_key));
    let start = buf.len();
    buf.extend_from_slice(payload);
    if let Some(body) = buf.get_mut(start..) {
        mask_payload(body, mask_key);
    }
    buf
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];
    const LIMIT: usize = 65_535;

    /// Re-masks a server frame as a client would send it, so it can go through
    /// `decode` with the mask bit set.
    fn as_client_frame(server_frame: &[u8]) -> Vec<u8> {
        let decoded = decode(&mut &server_frame[..], usize::MAX).unwrap();
        encode_masked(decoded.opcode, &decoded.payload, KEY)
    }

    #[test]
    fn short_payload_uses_two_byte_header() {
        let bytes = encode("hello");
        assert_eq!(bytes.len(), 2 + 5);
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1], 5);
    }

    #[test]
    fn medium_payload_uses_sixteen_bit_length() {
        let text = "a".repeat(130);
        let bytes = encode(&text);
        assert_eq!(bytes[1], LEN_MARKER_16);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 130);
        assert_eq!(bytes.len(), 4 + 130);
    }

    #[test]
    fn large_payload_uses_sixty_four_bit_length() {
        let text = "b".repeat(70_000);
        let bytes = encode(&text);
        assert_eq!(bytes[1], LEN_MARKER_64);
        let mut len = [0_u8; 8];
        len.copy_from_slice(&bytes[2..10]);
        assert_eq!(u64::from_be_bytes(len), 70_000);
        // high byte first
        assert_eq!(bytes[2], 0);
        assert_eq!(bytes.len(), 10 + 70_000);
    }

    #[test]
    fn boundary_lengths_pick_the_right_header() {
        assert_eq!(encode(&"x".repeat(125)).len(), 2 + 125);
        assert_eq!(encode(&"x".repeat(126)).len(), 4 + 126);
        assert_eq!(encode(&"x".repeat(65_535)).len(), 4 + 65_535);
        assert_eq!(encode(&"x".repeat(65_536)).len(), 10 + 65_536);
    }

    #[test]
    fn encode_never_sets_mask_bit() {
        for len in [0, 10, 130, 70_000] {
            let bytes = encode(&"z".repeat(len));
            assert_eq!(bytes[1] & MASK_BIT, 0, "mask bit set for len {len}");
            assert_eq!(bytes[0], FIN_BIT | 0x1);
        }
    }

    #[test]
    fn masked_frames_are_unmasked_on_decode() {
        let bytes = encode_masked(Opcode::Text, b"{\"type\":\"goHome\"}", KEY);
        assert_eq!(bytes[1] & MASK_BIT, MASK_BIT);
        // payload on the wire is not plaintext
        assert_ne!(&bytes[6..], b"{\"type\":\"goHome\"}");

        let frame = decode(&mut bytes.as_slice(), LIMIT).unwrap();
        assert!(frame.masked);
        assert_eq!(frame.mask_key, Some(KEY));
        assert_eq!(frame.text(), "{\"type\":\"goHome\"}");
    }

    #[test]
    fn round_trip_through_client_masking() {
        for len in [0, 10, 130] {
            let text: String = "é".repeat(len / 2) + &"q".repeat(len % 2);
            let client = as_client_frame(&encode(&text));
            let frame = decode(&mut client.as_slice(), LIMIT).unwrap();
            assert_eq!(frame.text(), text);
        }
    }

    #[test]
    fn round_trip_large_payload_with_raised_limit() {
        let text = "w".repeat(70_000);
        let client = as_client_frame(&encode(&text));
        let frame = decode(&mut client.as_slice(), usize::MAX).unwrap();
        assert_eq!(frame.payload_len, 70_000);
        assert_eq!(frame.text(), text);
    }

    #[test]
    fn zero_length_payload_is_empty_text() {
        let bytes = encode_masked(Opcode::Text, b"", KEY);
        let frame = decode(&mut bytes.as_slice(), LIMIT).unwrap();
        assert_eq!(frame.payload_len, 0);
        assert_eq!(frame.text(), "");
    }

    #[test]
    fn sixty_four_bit_length_exceeds_default_limit() {
        let bytes = [0x81, MASK_BIT | LEN_MARKER_64, 0, 0, 0, 0, 0, 1, 0, 0];
        assert_eq!(
            decode(&mut &bytes[..], LIMIT),
            Err(FrameError::PayloadTooLarge {
                length: 65_536,
                limit: LIMIT
            })
        );
    }

    #[test]
    fn sixty_four_bit_length_with_high_bit_is_malformed() {
        let bytes = [0x81, LEN_MARKER_64, 0x80, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(
            decode(&mut &bytes[..], usize::MAX),
            Err(FrameError::UnsupportedLength)
        );
    }

    #[test]
    fn empty_stream_is_peer_closed() {
        assert_eq!(decode(&mut &[][..], LIMIT), Err(FrameError::PeerClosed));
    }

    #[test]
    fn truncated_header_is_unexpected_eof() {
        assert_eq!(
            decode(&mut &[0x81][..], LIMIT),
            Err(FrameError::UnexpectedEof { needed: 1 })
        );
    }

    #[test]
    fn truncated_payload_is_unexpected_eof() {
        let mut bytes = encode_masked(Opcode::Text, b"abcdef", KEY);
        bytes.truncate(bytes.len() - 2);
        assert_eq!(
            decode(&mut bytes.as_slice(), LIMIT),
            Err(FrameError::UnexpectedEof { needed: 2 })
        );
    }

    #[test]
    fn truncated_mask_key_is_unexpected_eof() {
        let bytes = [0x81, MASK_BIT | 3, KEY[0], KEY[1]];
        assert_eq!(
            decode(&mut &bytes[..], LIMIT),
            Err(FrameError::UnexpectedEof { needed: 2 })
        );
    }

    #[test]
    fn payload_over_limit_is_rejected() {
        let bytes = encode_masked(Opcode::Text, &[b'a'; 200], KEY);
        assert_eq!(
            decode(&mut bytes.as_slice(), 100),
            Err(FrameError::PayloadTooLarge {
                length: 200,
                limit: 100
            })
        );
    }

    #[test]
    fn control_opcodes_decode() {
        for opcode in [Opcode::Close, Opcode::Ping, Opcode::Pong, Opcode::Binary] {
            let bytes = encode_masked(opcode, b"", KEY);
            let frame = decode(&mut bytes.as_slice(), LIMIT).unwrap();
            assert_eq!(frame.opcode, opcode);
            assert!(frame.fin);
        }
        assert_eq!(Opcode::from_nibble(0x3), Opcode::Reserved(0x3));
    }

    #[test]
    fn invalid_utf8_becomes_replacement_character() {
        let bytes = encode_masked(Opcode::Text, &[0x7B, 0xFF, 0x7D], KEY);
        let frame = decode(&mut bytes.as_slice(), LIMIT).unwrap();
        assert!(frame.text().contains('\u{FFFD}'));
    }

    #[test]
    fn consecutive_frames_decode_in_order() {
        let mut stream = encode_masked(Opcode::Text, b"first", KEY);
        stream.extend(encode_masked(Opcode::Text, b"second", [1, 2, 3, 4]));
        let mut reader = stream.as_slice();
        assert_eq!(decode(&mut reader, LIMIT).unwrap().text(), "first");
        assert_eq!(decode(&mut reader, LIMIT).unwrap().text(), "second");
        assert_eq!(decode(&mut reader, LIMIT), Err(FrameError::PeerClosed));
    }

    #[test]
    fn encode_into_reuses_buffer() {
        let mut buf = encode(&"x".repeat(300));
        encode_into("hi", &mut buf);
        assert_eq!(buf, vec![0x81, 2, b'h', b'i']);
    }

    proptest! {
        #[test]
        fn prop_client_round_trip(text in "\\PC{0,400}", key in any::<[u8; 4]>()) {
            let bytes = encode_masked(Opcode::Text, text.as_bytes(), key);
            let frame = decode(&mut bytes.as_slice(), LIMIT).unwrap();
            prop_assert_eq!(frame.text(), text.as_str());
        }

        #[test]
        fn prop_header_matches_length_regime(len in 0_usize..70_000) {
            let bytes = encode(&"a".repeat(len));
            prop_assert_eq!(bytes.len(), header_len(len) + len);
            prop_assert_eq!(bytes[1] & MASK_BIT, 0);
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode(&mut bytes.as_slice(), LIMIT);
        }
    }
}
