//! HTTP upgrade handshake.
//!
//! The connection thread buffers the raw request, asks [`is_upgrade_request`]
//! whether it is a WebSocket upgrade at all, and only then calls [`accept`] to
//! build the `101 Switching Protocols` response. Nothing here does I/O.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};

use crate::GatewayError;

/// Fixed GUID appended to the client key before hashing (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Terminator of the HTTP request head.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Response sent to plain HTTP requests that reach the gateway port.
pub const BAD_REQUEST_RESPONSE: &str =
    "HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// The parts of an upgrade request the gateway cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request target from the request line, e.g. `/`.
    pub path: String,
    /// Value of `Sec-WebSocket-Key`.
    pub key: String,
}

/// Derives the `Sec-WebSocket-Accept` value for a client key:
/// `base64(SHA1(key + GUID))`.
///
/// ```
/// use companion_gateway::protocol::handshake::accept_key;
///
/// assert_eq!(
///     accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let mut input = String::with_capacity(client_key.len() + WEBSOCKET_GUID.len());
    input.push_str(client_key.trim());
    input.push_str(WEBSOCKET_GUID);
    STANDARD.encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, input.as_bytes()))
}

/// Returns the index just past the `\r\n\r\n` that ends the request head.
#[must_use]
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Iterates `(name, value)` pairs of the header lines, skipping the request line.
fn headers(request: &str) -> impl Iterator<Item = (&str, &str)> {
    request
        .split("\r\n")
        .skip(1)
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim(), value.trim()))
}

fn header_value<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    headers(request)
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// True when the request carries an `Upgrade: websocket` header.
#[must_use]
pub fn is_upgrade_request(request: &str) -> bool {
    header_value(request, "Upgrade").is_some_and(|value| {
        value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
    })
}

/// Parses an upgrade request head.
pub fn parse_request(request: &str) -> Result<UpgradeRequest, GatewayError> {
    let request_line = request.split("\r\n").next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(GatewayError::Handshake {
            reason: format!("malformed request line {request_line:?}"),
        });
    };
    if method != "GET" {
        return Err(GatewayError::Handshake {
            reason: format!("unexpected method {method}"),
        });
    }
    if !is_upgrade_request(request) {
        return Err(GatewayError::Handshake {
            reason: "missing Upgrade: websocket".to_owned(),
        });
    }
    let key = header_value(request, "Sec-WebSocket-Key")
        .filter(|key| !key.is_empty())
        .ok_or_else(|| GatewayError::Handshake {
            reason: "missing Sec-WebSocket-Key".to_owned(),
        })?;
    Ok(UpgradeRequest {
        path: path.to_owned(),
        key: key.to_owned(),
    })
}

/// Builds the `101 Switching Protocols` response for a raw upgrade request.
pub fn accept(request: &str) -> Result<String, GatewayError> {
    let parsed = parse_request(request)?;
    Ok(switching_protocols(&accept_key(&parsed.key)))
}

/// The literal 101 response carrying `accept`.
#[must_use]
pub fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}
