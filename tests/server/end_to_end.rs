//! End-to-end flows through a running gateway.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::time::Duration;

use companion_gateway::GatewayBuilder;
use serde_json::json;
use serial_test::serial;

use crate::common::{start_gateway, wait_until, HostLoop, MockHost, TestClient, HAND_INTERVAL, READ_TIMEOUT};

#[test]
#[serial]
fn client_is_greeted_with_welcome_and_active_profile() {
    let (gateway, addr) = start_gateway(GatewayBuilder::new().with_server_name("Balloon Arena"));
    let host = HostLoop::spawn(gateway, MockHost::with_profiles(2));

    let mut client = TestClient::connect(addr);
    let welcome = client.recv();
    assert_eq!(welcome, json!({"type": "response", "data": {"message": "Connected to Balloon Arena"}}));

    let profile = client.recv_type("profile");
    assert_eq!(profile["data"]["id"], "p1");
    assert_eq!(profile["data"]["username"], "player1");
    assert_eq!(profile["data"]["levels"][0]["score"], 120);

    assert!(wait_until(READ_TIMEOUT, || host.connection_count() == 1));
    host.stop();
}

#[test]
#[serial]
fn get_profiles_lists_every_host_profile() {
    let (gateway, addr) = start_gateway(GatewayBuilder::new());
    let host = HostLoop::spawn(gateway, MockHost::with_profiles(3));

    let mut client = TestClient::connect_welcomed(addr);
    client.send_command("getProfiles", None);
    let list = client.recv_type("profilesList");
    let profiles = list["data"]["profiles"].as_array().unwrap();
    assert_eq!(profiles.len(), 3);
    assert_eq!(profiles[2]["id"], "p3");
    assert!(profiles[0].get("levels").is_none());

    host.stop();
}

#[test]
#[serial]
fn hand_tracking_frames_arrive_within_two_intervals() {
    let (gateway, addr) = start_gateway(
        GatewayBuilder::new()
            .with_stats_updates(false)
            .with_hand_tracking_interval(HAND_INTERVAL),
    );
    let host = HostLoop::spawn(gateway, MockHost::with_profiles(1).tracking_right_hand());

    let mut client = TestClient::connect_welcomed(addr);
    client.send_command("startHandTracking", None);
    assert_eq!(client.recv_reply()["data"]["message"], "Hand tracking started");

    let frame = client.recv_type_within("handTracking", HAND_INTERVAL * 2);
    assert_eq!(frame["data"]["timestamp"], 3.25);
    assert_eq!(frame["data"]["timestampMs"], 3250);
    assert!(frame["data"]["leftHand"].is_null());
    assert_eq!(frame["data"]["rightHand"]["handedness"], "Right");
    assert_eq!(frame["data"]["rightHand"]["joints"][0]["jointName"], "IndexTip");

    client.send_command("stopHandTracking", None);
    assert_eq!(client.recv_reply()["data"]["message"], "Hand tracking stopped");
    host.with_gateway(|gateway| assert!(!gateway.state().hand_tracking_enabled()));

    host.stop();
}

#[test]
#[serial]
fn stats_are_broadcast_while_playing() {
    let (gateway, addr) = start_gateway(GatewayBuilder::new().with_stats_interval(Duration::from_millis(50)));
    let host = HostLoop::spawn(gateway, MockHost::with_profiles(1).playing(420));

    let mut client = TestClient::connect_welcomed(addr);
    let stats = client.recv_type("stats");
    assert_eq!(stats["data"], json!({"score": 420, "balloons": 42, "time": 12.5}));

    host.stop();
}

#[test]
#[serial]
fn start_game_acks_then_counts_down_to_go() {
    let (gateway, addr) = start_gateway(
        GatewayBuilder::new()
            .with_stats_updates(false)
            .with_countdown(3, Duration::from_millis(40)),
    );
    let mock = MockHost::with_profiles(1);
    let host = HostLoop::spawn(gateway, mock.clone());

    let mut client = TestClient::connect_welcomed(addr);
    client.send_command("startGame", Some(json!({"gameType": "Classic", "level": 2})));
    assert_eq!(client.recv_reply()["data"]["message"], "Starting Classic level 2");

    let labels: Vec<_> = (0..4)
        .map(|_| client.recv_type("countdown")["data"]["message"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(labels, ["3", "2", "1", "GO!"]);
    assert_eq!(mock.applied()[0].name(), "startGame");

    host.stop();
}

#[test]
#[serial]
fn countdown_stops_when_the_session_ends() {
    let (gateway, addr) = start_gateway(
        GatewayBuilder::new()
            .with_stats_updates(false)
            .with_countdown(5, Duration::from_millis(150)),
    );
    let mock = MockHost::with_profiles(1);
    let host = HostLoop::spawn(gateway, mock.clone());

    let mut client = TestClient::connect_welcomed(addr);
    client.send_command("startGame", Some(json!({"gameType": "Classic", "level": 1})));
    client.recv_reply();
    assert_eq!(client.recv_type("countdown")["data"]["message"], "5");

    mock.end_session();
    let mut rest = Vec::new();
    while let Some(message) = client.next_within(Duration::from_millis(600)) {
        rest.push(message);
    }
    assert!(rest.iter().all(|m| m["type"] != "countdown"), "{rest:?}");

    host.stop();
}

#[test]
#[serial]
fn broadcast_reaches_every_client() {
    let (gateway, addr) = start_gateway(GatewayBuilder::new().with_stats_updates(false));
    let host = HostLoop::spawn(gateway, MockHost::default());

    let mut clients: Vec<_> = (0..3).map(|_| TestClient::connect_welcomed(addr)).collect();
    assert!(wait_until(READ_TIMEOUT, || host.connection_count() == 3));

    let delivered = host.with_gateway(|gateway| {
        gateway.broadcast(&companion_gateway::OutboundMessage::response("Round over"))
    });
    assert_eq!(delivered, 3);
    for client in &mut clients {
        assert_eq!(client.recv_reply()["data"]["message"], "Round over");
    }

    host.stop();
}
