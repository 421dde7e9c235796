//! One accepted client socket.
//!
//! A [`Connection`] is shared between its own receive thread, which owns the
//! read half, and every thread that sends to it (tickers on the main thread,
//! dispatched replies, other connections' handlers). Writes go through a
//! per-connection lock so two senders never interleave frames on the wire.
//!
//! # Lifecycle
//!
//! ```text
//! Handshaking --(valid upgrade)--> Open --(error, peer close, close())--> Closed
//!      \___________________(bad request, timeout)__________________________/
//! ```
//!
//! A closed connection is removed from the registry and never reopened.

use std::fmt;
use std::io::{self, Cursor, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use web_time::Duration;

use crate::diagnostics::{FaultKind, FaultSeverity};
use crate::fault;
use crate::gateway::GatewayCore;
use crate::host::TelemetrySource;
use crate::protocol::envelope::OutboundMessage;
use crate::protocol::frame::{self, FrameError, Opcode};
use crate::protocol::handshake::{self, BAD_REQUEST_RESPONSE};
use crate::sync::{Arc, AtomicU8, Mutex, Ordering};
use crate::GatewayError;

/// Largest single read while buffering the upgrade request.
const HANDSHAKE_CHUNK: usize = 1024;

/// Initial capacity of the per-connection encode buffer. Stats and command
/// replies fit; hand frames grow it once.
const ENCODE_BUFFER_CAPACITY: usize = 512;

/// Write side of a connection.
pub trait Transport: Write + Send {
    /// Shuts the underlying socket down in both directions, which also unblocks
    /// the receive thread.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        Self::shutdown(self, Shutdown::Both)
    }
}

/// Read side of a connection.
pub trait Inbound: Read + Send {
    /// Sets the timeout of blocking reads; `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Inbound for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        Self::set_read_timeout(self, timeout)
    }
}

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        // Plain std atomic: ids are handed out outside any loom model.
        static NEXT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        Self(NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    /// The raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Waiting for the HTTP upgrade request.
    Handshaking,
    /// Upgraded; frames flow both ways.
    Open,
    /// Gone for good.
    Closed,
}

impl ConnectionState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Handshaking => 0,
            Self::Open => 1,
            Self::Closed => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Handshaking,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

struct Outbound {
    transport: Box<dyn Transport>,
    buf: Vec<u8>,
}

/// A client connection.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    state: AtomicU8,
    outbound: Mutex<Outbound>,
}

impl Connection {
    /// Wraps the write side of a freshly accepted socket. The connection starts
    /// in [`ConnectionState::Handshaking`].
    pub fn new(transport: impl Transport + 'static, peer: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            state: AtomicU8::new(ConnectionState::Handshaking.as_u8()),
            outbound: Mutex::new(Outbound {
                transport: Box::new(transport),
                buf: Vec::with_capacity(ENCODE_BUFFER_CAPACITY),
            }),
        }
    }

    /// This connection's id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, when the socket reported one.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while frames may be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Moves a handshaking connection to [`ConnectionState::Open`]. Returns false
    /// if the connection was closed in the meantime.
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Handshaking.as_u8(),
                ConnectionState::Open.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Marks the connection closed. Returns true for the call that did it.
    fn mark_closed(&self) -> bool {
        self.state.swap(ConnectionState::Closed.as_u8(), Ordering::AcqRel)
            != ConnectionState::Closed.as_u8()
    }

    /// Sends `text` as one text frame.
    ///
    /// Any write error closes the connection and is returned so a broadcaster
    /// can evict it. Sending on a connection that is not open fails with
    /// [`GatewayError::ConnectionClosed`].
    pub fn send(&self, text: &str) -> Result<(), GatewayError> {
        if !self.is_open() {
            return Err(GatewayError::ConnectionClosed);
        }
        let mut outbound = self.outbound.lock();
        let Outbound { transport, buf } = &mut *outbound;
        buf.clear();
        frame::encode_into(text, buf);
        if let Err(err) = transport.write_all(buf.as_slice()).and_then(|()| transport.flush()) {
            if self.mark_closed() {
                if let Err(shutdown_err) = transport.shutdown() {
                    tracing::trace!(connection_id = %self.id, error = %shutdown_err, "shutdown after failed write");
                }
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Serializes and sends `message`.
    pub fn send_message(&self, message: &OutboundMessage) -> Result<(), GatewayError> {
        self.send(&message.to_json()?)
    }

    /// Sends `message`, treating failure as "the client is gone". The receive
    /// thread notices the dead socket and cleans up.
    pub(crate) fn reply(&self, message: &OutboundMessage) {
        if let Err(err) = self.send_message(message) {
            tracing::debug!(
                connection_id = %self.id,
                kind = message.kind(),
                error = %err,
                "reply not delivered"
            );
        }
    }

    /// Writes raw bytes without framing, for the handshake response.
    fn write_raw(&self, bytes: &[u8]) -> Result<(), GatewayError> {
        let mut outbound = self.outbound.lock();
        outbound.transport.write_all(bytes)?;
        outbound.transport.flush()?;
        Ok(())
    }

    /// Closes the connection and shuts the socket down. Idempotent; returns true
    /// for the call that actually closed it.
    pub fn close(&self) -> bool {
        if !self.mark_closed() {
            return false;
        }
        if let Err(err) = self.outbound.lock().transport.shutdown() {
            tracing::trace!(connection_id = %self.id, error = %err, "socket shutdown failed");
        }
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Whether inbound text is worth routing.
///
/// Some clients send partial or overlapping frames; those payloads are dropped
/// without an error reply. Anything empty, blank, holding a replacement
/// character, or not opening with `{` or `[` is dropped.
#[must_use]
pub fn is_routable(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && !trimmed.contains(char::REPLACEMENT_CHARACTER)
        && (trimmed.starts_with('{') || trimmed.starts_with('['))
}

/// Runs a connection to completion on the calling thread: handshake, then the
/// receive loop, then cleanup.
pub(crate) fn serve<R: Inbound>(conn: Arc<Connection>, mut reader: R, core: &Arc<GatewayCore>) {
    let leftover = match handshake_phase(&conn, &mut reader, core) {
        Some(leftover) => leftover,
        None => {
            conn.close();
            return;
        },
    };

    if let Err(err) = reader.set_read_timeout(None) {
        core.diagnostics.report(
            fault!(
                FaultSeverity::Error,
                FaultKind::Transport,
                "could not clear handshake timeout: {}",
                err
            )
            .with_connection(conn.id().as_u64()),
        );
        conn.close();
        return;
    }

    core.registry.add(conn.clone());
    tracing::info!(
        connection_id = %conn.id(),
        peer = ?conn.peer(),
        connections = core.registry.count(),
        "handshake complete"
    );
    greet(&conn, core);

    let mut reader = Cursor::new(leftover).chain(reader);
    receive_loop(&conn, &mut reader, core);

    conn.close();
    if core.registry.remove(conn.id()) {
        tracing::info!(
            connection_id = %conn.id(),
            peer = ?conn.peer(),
            remaining = core.registry.count(),
            "connection closed"
        );
    }
}

/// Reads and answers the upgrade request. Returns any bytes the client sent
/// after the request head, or `None` if the connection must be dropped.
fn handshake_phase<R: Inbound>(conn: &Connection, reader: &mut R, core: &GatewayCore) -> Option<Vec<u8>> {
    let connection_id = conn.id().as_u64();
    if let Err(err) = reader.set_read_timeout(core.config.handshake_timeout) {
        tracing::debug!(connection_id, error = %err, "could not set handshake timeout");
    }

    let limit = core.config.max_handshake_bytes;
    let mut buf = Vec::with_capacity(limit.min(HANDSHAKE_CHUNK));
    let mut chunk = [0_u8; HANDSHAKE_CHUNK];
    let header_end = loop {
        if let Some(end) = handshake::find_header_end(&buf) {
            break end;
        }
        if buf.len() >= limit {
            core.diagnostics.report(
                fault!(
                    FaultSeverity::Warning,
                    FaultKind::Protocol,
                    "upgrade request exceeds {} bytes",
                    limit
                )
                .with_connection(connection_id),
            );
            return None;
        }
        let want = (limit - buf.len()).min(HANDSHAKE_CHUNK);
        match reader.read(&mut chunk[..want]) {
            Ok(0) => {
                tracing::debug!(connection_id, "peer left during handshake");
                return None;
            },
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => {},
            Err(err) => {
                core.diagnostics.report(
                    fault!(
                        FaultSeverity::Warning,
                        FaultKind::Transport,
                        "handshake read failed: {:?}: {}",
                        err.kind(),
                        err
                    )
                    .with_connection(connection_id),
                );
                return None;
            },
        }
    };

    let (head, rest) = buf.split_at(header_end);
    let request = String::from_utf8_lossy(head);
    if !handshake::is_upgrade_request(&request) {
        tracing::debug!(connection_id, "not a websocket upgrade, answering 400");
        reject(conn);
        return None;
    }

    let response = match handshake::accept(&request) {
        Ok(response) => response,
        Err(err) => {
            core.diagnostics.report(
                fault!(FaultSeverity::Warning, FaultKind::Protocol, "{}", err)
                    .with_connection(connection_id),
            );
            reject(conn);
            return None;
        },
    };

    if let Err(err) = conn.write_raw(response.as_bytes()) {
        core.diagnostics.report(
            fault!(
                FaultSeverity::Warning,
                FaultKind::Transport,
                "handshake response not delivered: {}",
                err
            )
            .with_connection(connection_id),
        );
        return None;
    }

    if !core.is_running() || !conn.mark_open() {
        tracing::debug!(connection_id, "gateway stopping, dropping upgraded socket");
        return None;
    }
    Some(rest.to_vec())
}

fn reject(conn: &Connection) {
    if let Err(err) = conn.write_raw(BAD_REQUEST_RESPONSE.as_bytes()) {
        tracing::trace!(connection_id = %conn.id(), error = %err, "400 response not delivered");
    }
}

/// Welcome message right away; the active profile once the host drains.
fn greet(conn: &Arc<Connection>, core: &GatewayCore) {
    conn.reply(&OutboundMessage::response(format!(
        "Connected to {}",
        core.config.server_name
    )));
    let conn = conn.clone();
    core.dispatcher.enqueue(move |host| {
        if let Some(profile) = host.profile_snapshot(None) {
            conn.reply(&OutboundMessage::Profile(profile));
        }
    });
}

fn receive_loop<R: Read>(conn: &Arc<Connection>, reader: &mut R, core: &Arc<GatewayCore>) {
    let connection_id = conn.id().as_u64();
    loop {
        match frame::decode(reader, core.config.max_payload_len) {
            Ok(frame) => match frame.opcode {
                Opcode::Text => {
                    let text = frame.text();
                    if is_routable(&text) {
                        core.router.route(core, conn, &text);
                    } else {
                        tracing::trace!(connection_id, len = frame.payload.len(), "dropping unroutable text frame");
                    }
                },
                Opcode::Close => {
                    tracing::debug!(connection_id, "peer sent close frame");
                    return;
                },
                other => {
                    tracing::trace!(connection_id, opcode = ?other, "ignoring non-text frame");
                },
            },
            Err(FrameError::PeerClosed) => {
                tracing::debug!(connection_id, "peer disconnected");
                return;
            },
            Err(err) => {
                // Reads fail on purpose once close() shut the socket down.
                if conn.state() != ConnectionState::Closed {
                    let kind = if matches!(err, FrameError::Io { .. }) {
                        FaultKind::Transport
                    } else {
                        FaultKind::Protocol
                    };
                    core.diagnostics.report(
                        fault!(FaultSeverity::Error, kind, "dropping connection: {}", err)
                            .with_connection(connection_id),
                    );
                }
                return;
            },
        }
    }
}
