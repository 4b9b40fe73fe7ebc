//! End-to-end tests for the meeting channel WebSocket.
//!
//! Runs a real server on a random port and talks to it with
//! `tokio-tungstenite`. The server uses a 100ms broadcast cooldown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use card_controller::cards::CardState;
use card_controller::state::Snapshot;
use card_controller::store::ParticipantRecord;
use cc_test_utils::{card_change_payload, TestCcServer};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

/// A meeting hosted by Alice with Bob as a member.
async fn meeting_with_two(server: &TestCcServer) -> (String, ParticipantRecord, ParticipantRecord) {
    let store = server.store();
    let alice_user = store.create_user().await.unwrap();
    let (meeting, alice) = store
        .create_meeting(alice_user.id, "Standup", "alice", false)
        .await
        .unwrap();
    let bob_user = store.create_user().await.unwrap();
    let bob = store
        .join_meeting(&meeting.short_code, bob_user.id, "bob")
        .await
        .unwrap();
    (meeting.short_code, alice, bob)
}

async fn connect(server: &TestCcServer, code: &str) -> WsStream {
    let (socket, _) = connect_async(server.ws_url(code)).await.unwrap();
    socket
}

async fn send_json(socket: &mut WsStream, payload: Value) {
    socket
        .send(Message::text(payload.to_string()))
        .await
        .unwrap();
}

async fn next_message(socket: &mut WsStream) -> Option<Message> {
    tokio::time::timeout(RECV_TIMEOUT, socket.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|result| result.unwrap())
}

async fn next_snapshot(socket: &mut WsStream) -> Snapshot {
    loop {
        match next_message(socket).await {
            Some(Message::Text(text)) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Message::Ping(_) | Message::Pong(_)) => {}
            other => panic!("expected a snapshot, got {other:?}"),
        }
    }
}

/// Read snapshots until one satisfies `predicate`.
async fn snapshot_where(socket: &mut WsStream, predicate: impl Fn(&Snapshot) -> bool) -> Snapshot {
    loop {
        let snapshot = next_snapshot(socket).await;
        if predicate(&snapshot) {
            return snapshot;
        }
    }
}

/// Read until the server closes; returns the close code and reason.
async fn expect_close(socket: &mut WsStream) -> (u16, String) {
    loop {
        match next_message(socket).await {
            Some(Message::Close(Some(frame))) => {
                return (u16::from(frame.code), frame.reason.as_str().to_string())
            }
            Some(Message::Text(_) | Message::Ping(_) | Message::Pong(_)) => {}
            other => panic!("expected a close frame, got {other:?}"),
        }
    }
}

fn card_of(snapshot: &Snapshot, participant: &ParticipantRecord) -> Option<CardState> {
    snapshot
        .participants
        .iter()
        .find(|p| p.id == participant.id)
        .map(|p| p.card_state)
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn test_unknown_meeting_is_rejected_before_upgrade() {
    let server = TestCcServer::spawn().await.unwrap();

    let result = connect_async(server.ws_url("Nopeno")).await;

    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        other => panic!("expected an HTTP 404, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_receives_initial_snapshot() {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, alice, bob) = meeting_with_two(&server).await;

    let mut socket = connect(&server, &code).await;
    let snapshot = next_snapshot(&mut socket).await;

    let ids: Vec<_> = snapshot.participants.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![alice.id, bob.id]);
    assert!(snapshot.questions.is_empty());

    let status = server.registry().get_status().await.unwrap();
    assert_eq!(status.channel_count, 1);
    assert_eq!(status.connection_count, 1);
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_card_change_reaches_every_observer() {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, alice, _) = meeting_with_two(&server).await;
    let mut sender = connect(&server, &code).await;
    let mut watcher = connect(&server, &code).await;
    next_snapshot(&mut sender).await;
    next_snapshot(&mut watcher).await;

    send_json(&mut sender, card_change_payload(alice.id, CardState::Warm)).await;

    let seen = snapshot_where(&mut watcher, |s| card_of(s, &alice) == Some(CardState::Warm)).await;
    assert!(seen.questions.is_empty());
}

#[tokio::test]
async fn test_question_order_follows_raise_order() {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, alice, bob) = meeting_with_two(&server).await;
    let mut a = connect(&server, &code).await;
    let mut b = connect(&server, &code).await;
    next_snapshot(&mut a).await;
    next_snapshot(&mut b).await;

    send_json(&mut a, card_change_payload(alice.id, CardState::Question)).await;
    snapshot_where(&mut b, |s| s.questions == vec![alice.id]).await;

    send_json(&mut b, card_change_payload(bob.id, CardState::QuestionCool)).await;
    snapshot_where(&mut a, |s| s.questions == vec![alice.id, bob.id]).await;

    // Switching between question cards keeps the place in line.
    send_json(&mut a, card_change_payload(alice.id, CardState::QuestionWarm)).await;
    send_json(&mut a, card_change_payload(alice.id, CardState::None)).await;

    let settled = snapshot_where(&mut b, |s| s.questions == vec![bob.id]).await;
    assert_eq!(card_of(&settled, &alice), Some(CardState::None));
    assert_eq!(card_of(&settled, &bob), Some(CardState::QuestionCool));
}

// ============================================================================
// Rejected payloads
// ============================================================================

async fn assert_rejected(payload: Value, expected_reason: &str) {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, _, _) = meeting_with_two(&server).await;
    let mut socket = connect(&server, &code).await;
    next_snapshot(&mut socket).await;

    send_json(&mut socket, payload).await;

    let (close_code, reason) = expect_close(&mut socket).await;
    assert_eq!(close_code, 1008);
    assert_eq!(reason, expected_reason);
}

#[tokio::test]
async fn test_missing_event_type_closes_with_policy_violation() {
    assert_rejected(json!({}), "Missing event type").await;
}

#[tokio::test]
async fn test_missing_pid_closes_with_policy_violation() {
    assert_rejected(json!({"event": "card_change"}), "Missing pid").await;
}

#[tokio::test]
async fn test_unknown_pid_closes_with_policy_violation() {
    assert_rejected(
        json!({"event": "card_change", "pid": uuid::Uuid::new_v4().to_string(), "state": "warm"}),
        "Unknown user",
    )
    .await;
}

#[tokio::test]
async fn test_pid_from_another_meeting_is_unknown() {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, _, _) = meeting_with_two(&server).await;
    let (_, outsider, _) = meeting_with_two(&server).await;
    let mut socket = connect(&server, &code).await;
    next_snapshot(&mut socket).await;

    send_json(&mut socket, card_change_payload(outsider.id, CardState::Warm)).await;

    let (close_code, reason) = expect_close(&mut socket).await;
    assert_eq!(close_code, 1008);
    assert_eq!(reason, "Unknown user");
}

#[tokio::test]
async fn test_invalid_state_and_unknown_event_close_with_policy_violation() {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, alice, _) = meeting_with_two(&server).await;

    let mut socket = connect(&server, &code).await;
    next_snapshot(&mut socket).await;
    send_json(
        &mut socket,
        json!({"event": "card_change", "pid": alice.id.to_string(), "state": "hot"}),
    )
    .await;
    assert_eq!(
        expect_close(&mut socket).await,
        (1008, "Invalid card state: hot".to_string())
    );

    let mut socket = connect(&server, &code).await;
    next_snapshot(&mut socket).await;
    send_json(
        &mut socket,
        json!({"event": "wave", "pid": alice.id.to_string()}),
    )
    .await;
    assert_eq!(
        expect_close(&mut socket).await,
        (1008, "Unknown event type: wave".to_string())
    );
}

#[tokio::test]
async fn test_oversized_rejection_reason_is_truncated() {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, alice, _) = meeting_with_two(&server).await;
    let mut offender = connect(&server, &code).await;
    let mut bystander = connect(&server, &code).await;
    next_snapshot(&mut offender).await;
    next_snapshot(&mut bystander).await;

    send_json(
        &mut offender,
        json!({"event": "x".repeat(300), "pid": alice.id.to_string()}),
    )
    .await;

    let (close_code, reason) = expect_close(&mut offender).await;
    assert_eq!(close_code, 1008);
    assert_eq!(reason.len(), 123);
    assert!(reason.starts_with("Unknown event type: x"));

    send_json(&mut bystander, card_change_payload(alice.id, CardState::Warm)).await;
    snapshot_where(&mut bystander, |s| card_of(s, &alice) == Some(CardState::Warm)).await;
}

#[tokio::test]
async fn test_rejected_payload_leaves_other_observers_connected() {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, alice, _) = meeting_with_two(&server).await;
    let mut offender = connect(&server, &code).await;
    let mut bystander = connect(&server, &code).await;
    next_snapshot(&mut offender).await;
    next_snapshot(&mut bystander).await;

    offender
        .send(Message::text("not json".to_string()))
        .await
        .unwrap();
    assert_eq!(expect_close(&mut offender).await.0, 1008);

    send_json(&mut bystander, card_change_payload(alice.id, CardState::Cool)).await;
    snapshot_where(&mut bystander, |s| card_of(s, &alice) == Some(CardState::Cool)).await;
}

// ============================================================================
// Channel lifecycle
// ============================================================================

#[tokio::test]
async fn test_flush_closes_open_sockets() {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, _, _) = meeting_with_two(&server).await;
    let mut socket = connect(&server, &code).await;
    next_snapshot(&mut socket).await;

    assert!(server.registry().remove(&code).await.unwrap());

    // The server ends the socket; a close frame is optional.
    loop {
        match tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("socket still open after flush")
        {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn test_client_disconnect_detaches_connection() {
    let server = TestCcServer::spawn().await.unwrap();
    let (code, _, _) = meeting_with_two(&server).await;
    let mut socket = connect(&server, &code).await;
    next_snapshot(&mut socket).await;

    socket.close(None).await.unwrap();
    drop(socket);

    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let status = server.registry().get_status().await.unwrap();
        if status.connection_count == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "connection still attached"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
