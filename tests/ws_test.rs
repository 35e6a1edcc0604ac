//! Integration tests for WebSocket connection, handshake auth, ping/pong,
//! and presence lifecycle.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use courier_server::call::registry::CallRegistry;
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

/// Start the server on a random port with a fresh data directory.
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

fn token_for(state: &AppState, user_id: &str) -> String {
    courier_server::auth::jwt::issue_access_token(&state.jwt_secret, user_id)
        .expect("Failed to issue token")
}

async fn connect(addr: SocketAddr, token: &str) -> WsStream {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

/// Receive events until one with the given name arrives, skipping everything
/// else (presence snapshots interleave freely).
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

/// Assert that no event with the given name arrives within the window.
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
async fn test_ws_connection_with_valid_jwt() {
    let server = start_test_server().await;
    let user_id = seed_user(&server.state, "WsUser1");
    let token = token_for(&server.state, &user_id);

    let mut ws = connect(server.addr, &token).await;

    // The connect-time snapshot includes the user's own online presence
    let event = recv_named(&mut ws, "user:online").await;
    assert_eq!(event["data"]["userId"], user_id);
    assert_eq!(event["data"]["status"], "online");

    // After the snapshot the connection stays open with no further traffic
    expect_no_event(&mut ws, "user:online", Duration::from_millis(300)).await;
    assert!(server.state.connections.is_online(&user_id));
}

#[tokio::test]
async fn test_ws_auth_failure_invalid_token() {
    let server = start_test_server().await;

    let ws_url = format!("ws://{}/ws?token=invalid_jwt_token", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket should upgrade even with invalid token");

    // Server should immediately send a close frame with code 4002
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(4002),
                "Expected close code 4002 (token invalid)"
            );
        }
        Some(Ok(Message::Close(None))) => {
            // Close without frame — acceptable for invalid token
        }
        other => {
            if let Some(Ok(msg)) = other {
                assert!(msg.is_close(), "Expected close message, got: {:?}", msg);
            }
        }
    }
}

#[tokio::test]
async fn test_ws_rejects_token_for_unknown_user() {
    let server = start_test_server().await;

    // Valid signature, but the subject does not resolve to a stored user
    let token = token_for(&server.state, "no-such-user");
    let ws_url = format!("ws://{}/ws?token={}", server.addr, token);
    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket should upgrade");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(msg)) => assert!(msg.is_close(), "Expected close, got: {:?}", msg),
        other => panic!("Expected close message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let server = start_test_server().await;
    let user_id = seed_user(&server.state, "PingPongUser");
    let token = token_for(&server.state, &user_id);

    let mut ws = connect(server.addr, &token).await;
    recv_named(&mut ws, "user:online").await;

    ws.send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .expect("Expected pong within timeout")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Pong(data) = msg {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
            break;
        }
    }
}

#[tokio::test]
async fn test_multi_device_presence() {
    let server = start_test_server().await;
    let alice = seed_user(&server.state, "Alice");
    let bob = seed_user(&server.state, "Bob");

    let mut bob_ws = connect(server.addr, &token_for(&server.state, &bob)).await;
    recv_named(&mut bob_ws, "user:online").await; // own snapshot

    // First device: Bob observes Alice coming online
    let mut alice_dev1 = connect(server.addr, &token_for(&server.state, &alice)).await;
    let event = recv_named(&mut bob_ws, "user:online").await;
    assert_eq!(event["data"]["userId"], alice);

    // Second device: no presence flip
    let mut alice_dev2 = connect(server.addr, &token_for(&server.state, &alice)).await;
    recv_named(&mut alice_dev2, "user:online").await;
    expect_no_event(&mut bob_ws, "user:online", Duration::from_millis(300)).await;

    // Closing one device leaves the user online
    alice_dev1.close(None).await.unwrap();
    expect_no_event(&mut bob_ws, "user:offline", Duration::from_millis(300)).await;
    assert!(server.state.connections.is_online(&alice));

    // Closing the last device broadcasts offline with a last-seen stamp
    alice_dev2.close(None).await.unwrap();
    let event = recv_named(&mut bob_ws, "user:offline").await;
    assert_eq!(event["data"]["userId"], alice);
    assert_eq!(event["data"]["status"], "offline");
    assert!(event["data"]["lastSeen"].is_string());
    assert!(!server.state.connections.is_online(&alice));
}

#[tokio::test]
async fn test_ws_connection_cleanup_on_disconnect() {
    let server = start_test_server().await;
    let user_id = seed_user(&server.state, "CleanupUser");
    let token = token_for(&server.state, &user_id);

    // Connect and then immediately close
    {
        let mut ws = connect(server.addr, &token).await;
        ws.send(Message::Close(None)).await.expect("Failed to send close");
    }

    // Give the server a moment to clean up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!server.state.connections.is_online(&user_id));

    // Reconnect should work fine (connection was cleaned up)
    let mut ws2 = connect(server.addr, &token).await;
    recv_named(&mut ws2, "user:online").await;
    assert!(server.state.connections.is_online(&user_id));
}
