//! Connection resilience.
//!
//! One misbehaving or vanished client must never disturb the others, and the
//! gateway itself must survive anything a client sends.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use companion_gateway::protocol::frame::{self, Opcode};
use companion_gateway::{
    CollectingObserver, Connection, ConnectionRegistry, Diagnostics, FaultKind, FaultSeverity, GatewayBuilder,
    GatewayError, Transport,
};
use serde_json::json;
use serial_test::serial;

use crate::common::{start_gateway, wait_until, HostLoop, MockHost, TestClient, READ_TIMEOUT};

const SILENCE: Duration = Duration::from_millis(300);

fn quiet_gateway() -> GatewayBuilder {
    GatewayBuilder::new().with_stats_updates(false)
}

#[test]
#[serial]
fn unknown_command_only_answers_the_sender() {
    let (gateway, addr) = start_gateway(quiet_gateway());
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut sender = TestClient::connect_welcomed(addr);
    let mut bystander = TestClient::connect_welcomed(addr);
    assert!(wait_until(READ_TIMEOUT, || host.connection_count() == 2));

    sender.send_command("launchRockets", Some(json!({"count": 3})));
    assert_eq!(
        sender.recv(),
        json!({"type": "error", "data": {"message": "Unknown command: launchRockets"}})
    );
    assert!(sender.next_within(SILENCE).is_none(), "exactly one reply expected");
    assert!(bystander.next_within(SILENCE).is_none());
    assert_eq!(host.connection_count(), 2);

    sender.send_command("getProfiles", None);
    assert_eq!(sender.recv_type("profilesList")["data"]["profiles"], json!([]));

    host.stop();
}

#[test]
#[serial]
fn invalid_json_gets_format_error_and_noise_is_dropped() {
    let (gateway, addr) = start_gateway(quiet_gateway());
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut client = TestClient::connect_welcomed(addr);
    client.send_text("hello there");
    client.send_text("   ");
    assert!(client.next_within(SILENCE).is_none());

    client.send_text("{\"type\": ");
    assert_eq!(client.recv_reply()["data"]["message"], "Invalid message format");

    client.send_text("{\"data\": {}}");
    assert_eq!(client.recv_reply()["data"]["message"], "Invalid message format");

    client.send_command("getProfiles", None);
    client.recv_type("profilesList");
    host.stop();
}

#[test]
#[serial]
fn control_frames_are_ignored() {
    let (gateway, addr) = start_gateway(quiet_gateway());
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut client = TestClient::connect_welcomed(addr);
    client.send_raw(&frame::encode_masked(Opcode::Ping, b"are you there", [1, 2, 3, 4]));
    client.send_raw(&frame::encode_masked(Opcode::Binary, &[0xde, 0xad], [1, 2, 3, 4]));
    assert!(client.next_within(SILENCE).is_none());

    client.send_command("getProfiles", None);
    client.recv_type("profilesList");
    host.stop();
}

#[test]
#[serial]
fn departed_clients_are_unregistered() {
    let (gateway, addr) = start_gateway(quiet_gateway());
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut leaving = TestClient::connect_welcomed(addr);
    let dropped = TestClient::connect_welcomed(addr);
    let mut staying = TestClient::connect_welcomed(addr);
    assert!(wait_until(READ_TIMEOUT, || host.connection_count() == 3));

    leaving.send_close();
    drop(dropped);
    assert!(wait_until(READ_TIMEOUT, || host.connection_count() == 1));

    staying.send_command("getProfiles", None);
    staying.recv_type("profilesList");
    host.stop();
}

#[test]
#[serial]
fn oversized_frame_closes_only_that_connection() {
    let observer = Arc::new(CollectingObserver::new());
    let (gateway, addr) = start_gateway(quiet_gateway().with_fault_observer(observer.clone()));
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut offender = TestClient::connect_welcomed(addr);
    let mut neighbour = TestClient::connect_welcomed(addr);
    assert!(wait_until(READ_TIMEOUT, || host.connection_count() == 2));

    // Header only: announces 70000 bytes that never follow.
    let mut header = vec![0x81, 0x80 | frame::LEN_MARKER_64];
    header.extend_from_slice(&70_000_u64.to_be_bytes());
    header.extend_from_slice(&[0, 0, 0, 0]);
    offender.send_raw(&header);

    assert!(offender.wait_closed(READ_TIMEOUT));
    assert!(wait_until(READ_TIMEOUT, || host.connection_count() == 1));
    assert!(observer.has_fault(FaultKind::Protocol));

    neighbour.send_command("getProfiles", None);
    neighbour.recv_type("profilesList");
    host.stop();
}

#[test]
#[serial]
fn shutdown_closes_clients_and_refuses_new_ones() {
    let (gateway, addr) = start_gateway(quiet_gateway());
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut client = TestClient::connect_welcomed(addr);
    assert!(wait_until(READ_TIMEOUT, || host.connection_count() == 1));

    host.with_gateway(|gateway| {
        gateway.shutdown();
        assert!(!gateway.is_running());
        assert_eq!(gateway.connection_count(), 0);
    });
    assert!(client.wait_closed(READ_TIMEOUT));
    assert!(TestClient::try_connect(addr).is_err());

    host.stop();
}

#[test]
#[serial]
fn second_gateway_on_a_taken_port_reports_a_listener_fault() {
    let (first, addr) = start_gateway(quiet_gateway());

    let observer = Arc::new(CollectingObserver::new());
    let mut second = quiet_gateway()
        .with_bind_addr(addr)
        .with_fault_observer(observer.clone())
        .build()
        .unwrap();
    let err = second.start().unwrap_err();
    assert!(matches!(err, GatewayError::Bind { addr: bound, .. } if bound == addr), "{err}");
    assert!(!second.is_running());

    let faults = observer.faults_of_kind(FaultKind::Listener);
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].severity, FaultSeverity::Critical);

    drop(first);
}

/// Accepts the first `healthy_writes` writes, then fails like a reset socket.
struct FlakyTransport {
    healthy_writes: usize,
    written: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl Write for FlakyTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.healthy_writes == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));
        }
        self.healthy_writes -= 1;
        self.written.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for FlakyTransport {
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn open_connection(healthy_writes: usize) -> (Arc<Connection>, Arc<parking_lot::Mutex<Vec<u8>>>) {
    let written = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let conn = Arc::new(Connection::new(
        FlakyTransport {
            healthy_writes,
            written: written.clone(),
        },
        None,
    ));
    assert!(conn.mark_open());
    (conn, written)
}

#[test]
fn broadcast_survives_a_broken_connection() {
    let observer = Arc::new(CollectingObserver::new());
    let registry = ConnectionRegistry::new(Diagnostics::new(observer.clone()));

    let (broken, _) = open_connection(0);
    let (b, b_written) = open_connection(usize::MAX);
    let (c, c_written) = open_connection(usize::MAX);
    registry.add(broken.clone());
    registry.add(b);
    registry.add(c);

    let delivered = registry.broadcast("{\"type\":\"response\",\"data\":{\"message\":\"hi\"}}");
    assert_eq!(delivered, 2);
    assert_eq!(registry.count(), 2);
    assert!(!broken.is_open());
    assert_eq!(observer.faults_of_kind(FaultKind::Transport).len(), 1);

    let expected = frame::encode("{\"type\":\"response\",\"data\":{\"message\":\"hi\"}}");
    assert_eq!(*b_written.lock(), expected);
    assert_eq!(*c_written.lock(), expected);

    assert_eq!(registry.broadcast("{}"), 2);
    assert_eq!(observer.len(), 1);
}
