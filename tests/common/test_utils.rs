//! Shared test utilities for integration tests.
//!
//! # Port Allocation
//!
//! Every gateway binds `127.0.0.1:0` and reports the port the OS picked, so
//! test binaries never race for fixed ports. Tests that assert on
//! gateway-wide state are still marked `#[serial]` because the hand-tracking
//! switch is shared by every client of one gateway.
//!
//! # Host Loop
//!
//! Commands only run when the host pumps [`Gateway::update`]. [`HostLoop`]
//! plays the host's main thread: it owns the gateway behind a lock and pumps
//! it every [`HOST_TICK`] until stopped.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use companion_gateway::protocol::frame::{self, FrameError, Opcode};
use companion_gateway::protocol::handshake;
use companion_gateway::{Gateway, GatewayBuilder};
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::stubs::MockHost;

/// Loopback with an OS-assigned port.
#[allow(dead_code)]
pub const LOOPBACK: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

/// How often the host loop pumps the gateway.
pub const HOST_TICK: Duration = Duration::from_millis(5);

/// Upper bound for any single expected message.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Hand-tracking period used by the end-to-end tests.
#[allow(dead_code)]
pub const HAND_INTERVAL: Duration = Duration::from_millis(250);

/// Sample key from RFC 6455 section 1.3.
const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

const CLIENT_MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

/// Builds and starts a gateway on loopback.
#[track_caller]
#[allow(dead_code)]
pub fn start_gateway(builder: GatewayBuilder) -> (Gateway, SocketAddr) {
    let mut gateway = builder
        .with_bind_addr(LOOPBACK)
        .build()
        .expect("gateway config should be valid");
    let addr = gateway.start().expect("loopback bind should succeed");
    (gateway, addr)
}

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// passes. Returns the final value of `condition`.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(HOST_TICK);
    }
    condition()
}

/// The host's main thread, pumping [`Gateway::update`] in the background.
pub struct HostLoop {
    gateway: Arc<Mutex<Gateway>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

#[allow(dead_code)]
impl HostLoop {
    /// Starts pumping `gateway` against `host`.
    pub fn spawn(gateway: Gateway, mut host: MockHost) -> Self {
        let gateway = Arc::new(Mutex::new(gateway));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let gateway = gateway.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("test-host-loop".to_owned())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        gateway.lock().update(&mut host);
                        thread::sleep(HOST_TICK);
                    }
                })
                .expect("spawn host loop")
        };
        Self {
            gateway,
            stop,
            handle: Some(handle),
        }
    }

    /// Runs `f` with the gateway locked, between two host ticks.
    pub fn with_gateway<R>(&self, f: impl FnOnce(&mut Gateway) -> R) -> R {
        f(&mut self.gateway.lock())
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.with_gateway(|gateway| gateway.connection_count())
    }

    /// Stops pumping and shuts the gateway down.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.gateway.lock().shutdown();
    }
}

impl Drop for HostLoop {
    fn drop(&mut self) {
        self.halt();
    }
}

/// A minimal browser-like WebSocket client.
///
/// Sends masked text frames and decodes the gateway's unmasked ones with the
/// crate's own codec.
pub struct TestClient {
    stream: TcpStream,
}

#[allow(dead_code)]
impl TestClient {
    /// Connects and completes the upgrade handshake.
    #[track_caller]
    pub fn connect(addr: SocketAddr) -> Self {
        Self::try_connect(addr).expect("websocket handshake should succeed")
    }

    /// Connects and consumes the welcome `response`.
    #[track_caller]
    pub fn connect_welcomed(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr);
        let welcome = client.recv_reply();
        assert_eq!(welcome["type"], "response", "unexpected greeting {welcome}");
        client
    }

    /// Connects and completes the upgrade handshake, reporting failures.
    pub fn try_connect(addr: SocketAddr) -> io::Result<Self> {
        let mut stream = TcpStream::connect_timeout(&addr, READ_TIMEOUT)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_nodelay(true)?;
        let request = format!(
            "GET /ws HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {CLIENT_KEY}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        );
        stream.write_all(request.as_bytes())?;

        let head = read_http_head(&mut stream)?;
        if !head.starts_with("HTTP/1.1 101") {
            return Err(io::Error::new(io::ErrorKind::InvalidData, head));
        }
        let expected = format!("Sec-WebSocket-Accept: {}", handshake::accept_key(CLIENT_KEY));
        if !head.contains(&expected) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, head));
        }
        Ok(Self { stream })
    }

    /// Sends one masked text frame.
    #[track_caller]
    pub fn send_text(&mut self, text: &str) {
        self.send_raw(&frame::encode_masked(Opcode::Text, text.as_bytes(), CLIENT_MASK));
    }

    /// Sends a `{type, data}` envelope.
    #[track_caller]
    pub fn send_command(&mut self, kind: &str, data: Option<Value>) {
        let envelope = match data {
            Some(data) => json!({ "type": kind, "data": data }),
            None => json!({ "type": kind }),
        };
        self.send_text(&envelope.to_string());
    }

    /// Writes bytes as-is.
    #[track_caller]
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("client write");
    }

    /// Sends a close frame.
    #[track_caller]
    pub fn send_close(&mut self) {
        self.send_raw(&frame::encode_masked(Opcode::Close, &[], CLIENT_MASK));
    }

    /// Next text message within `window`, parsed as JSON.
    pub fn next_within(&mut self, window: Duration) -> Option<Value> {
        self.stream.set_read_timeout(Some(window)).ok()?;
        let result = self.read_json();
        let _ = self.stream.set_read_timeout(Some(READ_TIMEOUT));
        result.ok()
    }

    /// Next text message, failing the test after [`READ_TIMEOUT`].
    #[track_caller]
    pub fn recv(&mut self) -> Value {
        match self.read_json() {
            Ok(value) => value,
            Err(err) => panic!("expected a message, got {err}"),
        }
    }

    /// Skips messages until one with `type == kind` arrives within `timeout`.
    #[track_caller]
    pub fn recv_type_within(&mut self, kind: &str, timeout: Duration) -> Value {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            assert!(!left.is_zero(), "no `{kind}` message within {timeout:?}");
            if let Some(value) = self.next_within(left) {
                if value["type"] == kind {
                    return value;
                }
            }
        }
    }

    /// Skips messages until one with `type == kind` arrives.
    #[track_caller]
    pub fn recv_type(&mut self, kind: &str) -> Value {
        self.recv_type_within(kind, READ_TIMEOUT)
    }

    /// Next `response` or `error` message, skipping telemetry.
    #[track_caller]
    pub fn recv_reply(&mut self) -> Value {
        loop {
            let value = self.recv();
            if value["type"] == "response" || value["type"] == "error" {
                return value;
            }
        }
    }

    /// Waits for the gateway to close the connection.
    pub fn wait_closed(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let left = deadline.saturating_duration_since(Instant::now());
            if self.stream.set_read_timeout(Some(left.max(HOST_TICK))).is_err() {
                return true;
            }
            match frame::decode(&mut self.stream, usize::MAX) {
                Ok(frame) if frame.opcode == Opcode::Close => return true,
                Ok(_) => continue,
                Err(FrameError::Io { kind, .. })
                    if kind == io::ErrorKind::WouldBlock || kind == io::ErrorKind::TimedOut =>
                {
                    return false
                },
                Err(_) => return true,
            }
        }
        false
    }

    fn read_json(&mut self) -> Result<Value, FrameError> {
        loop {
            let frame = frame::decode(&mut self.stream, usize::MAX)?;
            if frame.opcode == Opcode::Text {
                return serde_json::from_str(&frame.text()).map_err(|err| FrameError::Io {
                    kind: io::ErrorKind::InvalidData,
                    message: err.to_string(),
                });
            }
        }
    }
}

/// Reads an HTTP response head one byte at a time so no frame bytes are
/// consumed along with it.
pub fn read_http_head(stream: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::new();
    let mut byte = [0_u8; 1];
    while !head.ends_with(handshake::HEADER_TERMINATOR) {
        if stream.read(&mut byte)? == 0 {
            break;
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}
