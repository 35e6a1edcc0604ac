use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::chat::presence;
use crate::db::models::User;
use crate::state::AppState;
use crate::store;
use crate::ws::protocol::{self, ConnCtx};

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming events, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system to send events to this
/// client by cloning the sender held in the connection registry.
pub async fn run_connection(socket: WebSocket, state: AppState, user: User) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let conn_id = Uuid::new_v4().to_string();
    let ctx = ConnCtx {
        conn_id: conn_id.clone(),
        user_id: user.id.clone(),
        username: user.username.clone(),
        tx: tx.clone(),
    };

    // Register this connection; the first connection flips the user online
    let came_online = state.connections.register(&user.id, &conn_id, tx.clone());
    if came_online {
        presence::mark_online(&state, &user.id, &conn_id).await;
    }

    // Join all conversation rooms the user is a member of
    let room_ids = {
        let db = state.db.clone();
        let uid = user.id.clone();
        store::blocking(move || store::conversations::ids_for_user(&db, &uid))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(user_id = %user.id, error = %e, "Failed to load conversation rooms");
                Vec::new()
            })
    };
    for room_id in &room_ids {
        state.rooms.join(room_id, &conn_id);
    }

    // Send the current online-user snapshot to the newly connected client
    for event in presence::snapshot(&state) {
        if let Ok(json) = serde_json::to_string(&event) {
            let _ = tx.send(Message::Text(json.into()));
        }
    }

    tracing::info!(
        user_id = %user.id,
        conn_id = %conn_id,
        rooms = room_ids.len(),
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            // Send ping
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            // Wait for pong within timeout
            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    // Pong timeout or channel closed — close connection
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_event(text.as_str(), &ctx, &state).await;
                }
                Message::Binary(_) => {
                    // Protocol is JSON text; binary frames are ignored
                    tracing::debug!(
                        user_id = %user.id,
                        "Received binary frame (expected JSON text)"
                    );
                }
                Message::Pong(_) => {
                    // Pong received — notify the ping task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user.id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(user_id = %user.id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Leave all rooms and remove the connection from the registry
    state.rooms.leave_all(&conn_id);

    // Only broadcast OFFLINE if this was the user's last connection
    if let Some((user_id, went_offline)) = state.connections.unregister(&conn_id) {
        if went_offline {
            presence::mark_offline(&state, &user_id, &conn_id).await;
        }
    }

    tracing::info!(
        user_id = %user.id,
        conn_id = %conn_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
