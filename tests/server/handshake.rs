//! Upgrade handshake edge cases against a live listener.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use companion_gateway::protocol::frame::{self, Opcode};
use companion_gateway::protocol::handshake;
use companion_gateway::{CollectingObserver, FaultKind, GatewayBuilder, GatewayConfig};
use serial_test::serial;

use crate::common::test_utils::read_http_head;
use crate::common::{start_gateway, wait_until, HostLoop, MockHost, TestClient, READ_TIMEOUT};

fn raw_socket(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect_timeout(&addr, READ_TIMEOUT).unwrap();
    stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
    stream
}

#[test]
#[serial]
fn plain_http_request_gets_bad_request() {
    let (gateway, addr) = start_gateway(GatewayBuilder::new());
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut stream = raw_socket(addr);
    stream.write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    let head = read_http_head(&mut stream).unwrap();
    assert!(head.starts_with("HTTP/1.1 400"), "{head}");
    assert_eq!(host.connection_count(), 0);

    host.stop();
}

#[test]
#[serial]
fn upgrade_without_key_is_rejected_with_a_protocol_fault() {
    let observer = Arc::new(CollectingObserver::new());
    let (gateway, addr) = start_gateway(GatewayBuilder::new().with_fault_observer(observer.clone()));
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut stream = raw_socket(addr);
    stream
        .write_all(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
        .unwrap();
    let head = read_http_head(&mut stream).unwrap();
    assert!(head.starts_with("HTTP/1.1 400"), "{head}");
    assert!(wait_until(READ_TIMEOUT, || observer.has_fault(FaultKind::Protocol)));

    host.stop();
}

#[test]
#[serial]
fn frame_sent_with_the_handshake_is_not_lost() {
    let (gateway, addr) = start_gateway(GatewayBuilder::new().with_stats_updates(false));
    let host = HostLoop::spawn(gateway, MockHost::with_profiles(2));

    let key = "x3JJHMbDL1EzLkh9GBhXDw==";
    let mut bytes = format!(
        "GET /ws HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    )
    .into_bytes();
    bytes.extend(frame::encode_masked(Opcode::Text, br#"{"type":"getProfiles"}"#, [9, 8, 7, 6]));

    let mut stream = raw_socket(addr);
    stream.write_all(&bytes).unwrap();
    let head = read_http_head(&mut stream).unwrap();
    assert!(head.contains(&handshake::accept_key(key)), "{head}");

    let mut saw_list = false;
    for _ in 0..3 {
        let frame = frame::decode(&mut stream, usize::MAX).unwrap();
        if frame.text().contains("\"profilesList\"") {
            saw_list = true;
            break;
        }
    }
    assert!(saw_list);

    host.stop();
}

#[test]
#[serial]
fn oversized_upgrade_request_is_dropped() {
    let observer = Arc::new(CollectingObserver::new());
    let config = GatewayConfig {
        max_handshake_bytes: 256,
        ..GatewayConfig::default()
    };
    let (gateway, addr) = start_gateway(
        GatewayBuilder::new()
            .with_config(config)
            .with_fault_observer(observer.clone()),
    );
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut stream = raw_socket(addr);
    let padding = "a".repeat(400);
    let _ = stream.write_all(format!("GET / HTTP/1.1\r\nX-Padding: {padding}\r\n").as_bytes());
    assert!(wait_until(READ_TIMEOUT, || observer.has_fault(FaultKind::Protocol)));
    assert_eq!(host.connection_count(), 0);

    host.stop();
}

#[test]
#[serial]
fn stalled_handshake_times_out() {
    let observer = Arc::new(CollectingObserver::new());
    let config = GatewayConfig {
        handshake_timeout: Some(Duration::from_millis(150)),
        ..GatewayConfig::default()
    };
    let (gateway, addr) = start_gateway(
        GatewayBuilder::new()
            .with_config(config)
            .with_fault_observer(observer.clone()),
    );
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut stream = raw_socket(addr);
    stream.write_all(b"GET / HTTP/1.1\r\n").unwrap();
    assert!(wait_until(READ_TIMEOUT, || observer.has_fault(FaultKind::Transport)));

    // The timeout only guards the handshake; an upgraded client may idle.
    let mut client = TestClient::connect_welcomed(addr);
    std::thread::sleep(Duration::from_millis(400));
    client.send_command("getProfiles", None);
    client.recv_type("profilesList");

    host.stop();
}
