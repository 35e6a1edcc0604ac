//! Integration tests for the message fan-out engine: send, edit, delete,
//! read receipts, and typing relay.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use courier_server::call::registry::CallRegistry;
use courier_server::db::models::ConversationKind;
use courier_server::state::AppState;
use courier_server::store;
use courier_server::ws::rooms::RoomDirectory;
use courier_server::ws::ConnectionRegistry;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    _tmp: tempfile::TempDir,
}

async fn start_test_server() -> TestServer {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp.path().to_str().unwrap().to_string();

    let db = courier_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = courier_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = AppState {
        db,
        jwt_secret,
        connections: ConnectionRegistry::new(),
        rooms: RoomDirectory::new(),
        calls: CallRegistry::new(),
    };

    let app = courier_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        state,
        _tmp: tmp,
    }
}

fn seed_user(state: &AppState, username: &str) -> String {
    store::users::create(&state.db, username, None)
        .expect("Failed to seed user")
        .id
}

fn seed_conversation(state: &AppState, participants: &[String]) -> String {
    store::conversations::create(&state.db, ConversationKind::Private, None, participants)
        .expect("Failed to seed conversation")
        .id
}

async fn connect(state: &AppState, addr: SocketAddr, user_id: &str) -> WsStream {
    let token = courier_server::auth::jwt::issue_access_token(&state.jwt_secret, user_id)
        .expect("Failed to issue token");
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

async fn send_event(ws: &mut WsStream, event: Value) {
    ws.send(Message::Text(event.to_string().into()))
        .await
        .expect("Failed to send event");
}

async fn recv_named(ws: &mut WsStream, name: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {}", name))
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).expect("Invalid JSON");
            if value["event"] == name {
                return value;
            }
        }
    }
}

async fn expect_no_event(ws: &mut WsStream, name: &str, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(text.as_str()).expect("Invalid JSON");
                assert_ne!(value["event"], name, "Unexpected {} event: {}", name, value);
            }
            Ok(Some(Ok(_))) => continue,
            _ => break,
        }
    }
}

#[tokio::test]
async fn test_message_fanout_and_read_receipts() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    let mut bob_ws = connect(&server.state, server.addr, &bob).await;
    recv_named(&mut alice_ws, "user:online").await;
    recv_named(&mut bob_ws, "user:online").await;

    send_event(
        &mut alice_ws,
        json!({"event": "message:send", "data": {"conversationId": conv, "content": "hello"}}),
    )
    .await;

    // Every connection joined to the room receives exactly one message:new,
    // the sender's own devices included
    let event = recv_named(&mut bob_ws, "message:new").await;
    let message = &event["data"]["message"];
    assert_eq!(event["data"]["conversationId"], conv.as_str());
    assert_eq!(message["sender"]["id"], alice);
    assert_eq!(message["sender"]["username"], "Alice");
    assert_eq!(message["content"], "hello");
    assert_eq!(message["type"], "text");
    // Sender has already read their own message
    assert_eq!(message["readBy"][0]["user"], alice);

    let echo = recv_named(&mut alice_ws, "message:new").await;
    assert_eq!(echo["data"]["message"]["id"], message["id"]);
    expect_no_event(&mut bob_ws, "message:new", Duration::from_millis(300)).await;

    // Bob marks the message read; Alice is notified, Bob is not echoed
    let message_id = message["id"].as_str().unwrap().to_string();
    send_event(
        &mut bob_ws,
        json!({"event": "message:read", "data": {"conversationId": conv, "messageIds": [message_id]}}),
    )
    .await;

    let event = recv_named(&mut alice_ws, "messages:read").await;
    assert_eq!(event["data"]["userId"], bob);
    assert_eq!(event["data"]["conversationId"], conv.as_str());
    assert_eq!(event["data"]["messageIds"][0], message["id"]);

    // The conversation's last-message pointer was bumped on send
    let stored = store::conversations::find(&server.state.db, &conv)
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_message_id, message["id"].as_str().unwrap().parse().ok());
    assert!(stored.last_message_at.is_some());
}

#[tokio::test]
async fn test_conversation_join_and_leave_mid_session() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let mallory = seed_user(&server.state, "Mallory");

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    let mut bob_ws = connect(&server.state, server.addr, &bob).await;
    let mut mallory_ws = connect(&server.state, server.addr, &mallory).await;
    recv_named(&mut alice_ws, "user:online").await;
    recv_named(&mut bob_ws, "user:online").await;
    recv_named(&mut mallory_ws, "user:online").await;

    // Conversation created after connect: nobody is in its room yet
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    send_event(
        &mut alice_ws,
        json!({"event": "conversation:join", "data": {"conversationId": conv}}),
    )
    .await;
    send_event(
        &mut bob_ws,
        json!({"event": "conversation:join", "data": {"conversationId": conv}}),
    )
    .await;

    // Non-participants cannot register for the room
    send_event(
        &mut mallory_ws,
        json!({"event": "conversation:join", "data": {"conversationId": conv}}),
    )
    .await;
    let event = recv_named(&mut mallory_ws, "error").await;
    assert_eq!(
        event["data"]["message"],
        "Not a participant of this conversation"
    );

    send_event(
        &mut alice_ws,
        json!({"event": "message:send", "data": {"conversationId": conv, "content": "after join"}}),
    )
    .await;
    let event = recv_named(&mut bob_ws, "message:new").await;
    assert_eq!(event["data"]["message"]["content"], "after join");
    expect_no_event(&mut mallory_ws, "message:new", Duration::from_millis(300)).await;

    // After leaving the room, fan-out no longer reaches Bob
    send_event(
        &mut bob_ws,
        json!({"event": "conversation:leave", "data": {"conversationId": conv}}),
    )
    .await;
    // leave is fire-and-forget; give the server a beat to process it
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_event(
        &mut alice_ws,
        json!({"event": "message:send", "data": {"conversationId": conv, "content": "to nobody"}}),
    )
    .await;
    recv_named(&mut alice_ws, "message:new").await;
    expect_no_event(&mut bob_ws, "message:new", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_file_message_carries_metadata() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    let mut bob_ws = connect(&server.state, server.addr, &bob).await;
    recv_named(&mut alice_ws, "user:online").await;
    recv_named(&mut bob_ws, "user:online").await;

    send_event(
        &mut alice_ws,
        json!({"event": "message:send", "data": {
            "conversationId": conv,
            "content": "report.pdf",
            "type": "file",
            "fileUrl": "/uploads/report.pdf",
            "fileName": "report.pdf",
            "fileSize": 48213,
            "mimeType": "application/pdf"
        }}),
    )
    .await;

    let event = recv_named(&mut bob_ws, "message:new").await;
    let message = &event["data"]["message"];
    assert_eq!(message["type"], "file");
    assert_eq!(message["fileUrl"], "/uploads/report.pdf");
    assert_eq!(message["fileName"], "report.pdf");
    assert_eq!(message["fileSize"], 48213);
    assert_eq!(message["mimeType"], "application/pdf");
    assert!(message["thumbnail"].is_null());
}

#[tokio::test]
async fn test_send_rejected_for_non_participant() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let mallory = seed_user(&server.state, "Mallory");
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    let mut bob_ws = connect(&server.state, server.addr, &bob).await;
    let mut mallory_ws = connect(&server.state, server.addr, &mallory).await;
    recv_named(&mut bob_ws, "user:online").await;
    recv_named(&mut mallory_ws, "user:online").await;

    send_event(
        &mut mallory_ws,
        json!({"event": "message:send", "data": {"conversationId": conv, "content": "hi there"}}),
    )
    .await;

    let event = recv_named(&mut mallory_ws, "error").await;
    assert_eq!(
        event["data"]["message"],
        "Not a participant of this conversation"
    );
    expect_no_event(&mut bob_ws, "message:new", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_empty_content_rejected() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    recv_named(&mut alice_ws, "user:online").await;

    send_event(
        &mut alice_ws,
        json!({"event": "message:send", "data": {"conversationId": conv, "content": "   "}}),
    )
    .await;

    let event = recv_named(&mut alice_ws, "error").await;
    assert_eq!(event["data"]["message"], "Message content cannot be empty");
}

#[tokio::test]
async fn test_edit_by_non_owner_produces_no_broadcast() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    let mut bob_ws = connect(&server.state, server.addr, &bob).await;
    recv_named(&mut alice_ws, "user:online").await;
    recv_named(&mut bob_ws, "user:online").await;

    send_event(
        &mut alice_ws,
        json!({"event": "message:send", "data": {"conversationId": conv, "content": "original"}}),
    )
    .await;
    let event = recv_named(&mut bob_ws, "message:new").await;
    let message_id = event["data"]["message"]["id"].as_str().unwrap().to_string();

    // Bob is not the sender: edit fails as not-found, nothing is fanned out
    send_event(
        &mut bob_ws,
        json!({"event": "message:edit", "data": {"messageId": message_id, "content": "hijacked"}}),
    )
    .await;

    let event = recv_named(&mut bob_ws, "error").await;
    assert_eq!(event["data"]["message"], "Message not found");
    expect_no_event(&mut alice_ws, "message:edited", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_edit_and_delete_flow() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    let mut bob_ws = connect(&server.state, server.addr, &bob).await;
    recv_named(&mut alice_ws, "user:online").await;
    recv_named(&mut bob_ws, "user:online").await;

    send_event(
        &mut alice_ws,
        json!({"event": "message:send", "data": {"conversationId": conv, "content": "first draft"}}),
    )
    .await;
    let event = recv_named(&mut bob_ws, "message:new").await;
    let message_id = event["data"]["message"]["id"].as_str().unwrap().to_string();

    send_event(
        &mut alice_ws,
        json!({"event": "message:edit", "data": {"messageId": message_id, "content": "final draft"}}),
    )
    .await;

    let event = recv_named(&mut bob_ws, "message:edited").await;
    assert_eq!(event["data"]["message"]["content"], "final draft");
    assert_eq!(event["data"]["message"]["edited"], true);
    assert!(event["data"]["message"]["editedAt"].is_string());

    send_event(
        &mut alice_ws,
        json!({"event": "message:delete", "data": {"messageId": message_id}}),
    )
    .await;

    // Receivers get the identifier only; the tombstone is not re-sent
    let event = recv_named(&mut bob_ws, "message:deleted").await;
    assert_eq!(event["data"]["messageId"], message_id.as_str());
    assert_eq!(event["data"]["conversationId"], conv.as_str());

    let payload = store::messages::load_payload(&server.state.db, message_id.parse().unwrap())
        .unwrap()
        .unwrap();
    assert!(payload.deleted);
    assert_eq!(payload.content, "This message has been deleted");

    // Editing a tombstoned message fails like a missing one
    send_event(
        &mut alice_ws,
        json!({"event": "message:edit", "data": {"messageId": message_id, "content": "resurrect"}}),
    )
    .await;
    let event = recv_named(&mut alice_ws, "error").await;
    assert_eq!(event["data"]["message"], "Message not found");
}

#[tokio::test]
async fn test_mark_read_is_idempotent() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    let mut bob_ws = connect(&server.state, server.addr, &bob).await;
    recv_named(&mut alice_ws, "user:online").await;
    recv_named(&mut bob_ws, "user:online").await;

    send_event(
        &mut alice_ws,
        json!({"event": "message:send", "data": {"conversationId": conv, "content": "read me"}}),
    )
    .await;
    let event = recv_named(&mut bob_ws, "message:new").await;
    let message_id = event["data"]["message"]["id"].as_str().unwrap().to_string();

    for _ in 0..2 {
        send_event(
            &mut bob_ws,
            json!({"event": "message:read", "data": {"conversationId": conv, "messageIds": [message_id]}}),
        )
        .await;
        recv_named(&mut alice_ws, "messages:read").await;
    }

    // One (reader, timestamp) entry per reader, however many times read
    let reads = store::messages::reads_for(&server.state.db, message_id.parse().unwrap()).unwrap();
    let bob_entries = reads.iter().filter(|r| r.user == bob).count();
    assert_eq!(bob_entries, 1);
    // Sender + reader
    assert_eq!(reads.len(), 2);
}

#[tokio::test]
async fn test_temp_message_ids_are_filtered() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    let mut bob_ws = connect(&server.state, server.addr, &bob).await;
    recv_named(&mut alice_ws, "user:online").await;
    recv_named(&mut bob_ws, "user:online").await;

    // Unpersisted client-side ids never reach the store or the room
    send_event(
        &mut bob_ws,
        json!({"event": "message:read", "data": {"conversationId": conv, "messageIds": ["temp-1722", "not-a-number"]}}),
    )
    .await;

    expect_no_event(&mut alice_ws, "messages:read", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_typing_relay_excludes_originator() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");
    let conv = seed_conversation(&server.state, &[alice.clone(), bob.clone()]);

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    let mut bob_ws = connect(&server.state, server.addr, &bob).await;
    recv_named(&mut alice_ws, "user:online").await;
    recv_named(&mut bob_ws, "user:online").await;

    send_event(
        &mut alice_ws,
        json!({"event": "typing:start", "data": {"conversationId": conv}}),
    )
    .await;

    let event = recv_named(&mut bob_ws, "typing:start").await;
    assert_eq!(event["data"]["userId"], alice);
    assert_eq!(event["data"]["username"], "Alice");
    assert_eq!(event["data"]["conversationId"], conv.as_str());
    expect_no_event(&mut alice_ws, "typing:start", Duration::from_millis(300)).await;

    send_event(
        &mut alice_ws,
        json!({"event": "typing:stop", "data": {"conversationId": conv}}),
    )
    .await;
    let event = recv_named(&mut bob_ws, "typing:stop").await;
    assert_eq!(event["data"]["userId"], alice);
}

#[tokio::test]
async fn test_unknown_event_name_rejected() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");

    let mut alice_ws = connect(&server.state, server.addr, &alice).await;
    recv_named(&mut alice_ws, "user:online").await;

    send_event(
        &mut alice_ws,
        json!({"event": "message:upsert", "data": {"whatever": true}}),
    )
    .await;

    let event = recv_named(&mut alice_ws, "error").await;
    assert_eq!(event["data"]["message"], "Invalid event payload");
}
