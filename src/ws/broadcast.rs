//! Fan-out helpers: deliver one serialized event to a connection, a user's
//! devices, a room, or everyone. Socket emission is fire-and-forget; sends
//! to connections that died mid-flight are silently dropped by the channel.

use axum::extract::ws::Message;

use crate::ws::events::ServerEvent;
use crate::ws::rooms::RoomDirectory;
use crate::ws::ConnectionRegistry;

/// Serialize an event once for reuse across all targets.
fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server event");
            None
        }
    }
}

/// Unicast to a single connection.
pub fn send_to_conn(registry: &ConnectionRegistry, conn_id: &str, event: &ServerEvent) {
    let Some(msg) = encode(event) else { return };
    if let Some(sender) = registry.sender_of(conn_id) {
        let _ = sender.send(msg);
    }
}

/// Send to every connection of a user (all their devices).
pub fn send_to_user(registry: &ConnectionRegistry, user_id: &str, event: &ServerEvent) {
    let Some(msg) = encode(event) else { return };
    for sender in registry.senders_of_user(user_id) {
        let _ = sender.send(msg.clone());
    }
}

/// Broadcast to every connection, optionally excluding the originator.
pub fn broadcast_all(registry: &ConnectionRegistry, except_conn: Option<&str>, event: &ServerEvent) {
    let Some(msg) = encode(event) else { return };
    for sender in registry.senders_except(except_conn.unwrap_or("")) {
        let _ = sender.send(msg.clone());
    }
}

/// Broadcast to all members of a room, optionally excluding the originator.
pub fn broadcast_room(
    registry: &ConnectionRegistry,
    rooms: &RoomDirectory,
    room_id: &str,
    except_conn: Option<&str>,
    event: &ServerEvent,
) {
    let Some(msg) = encode(event) else { return };
    for conn_id in rooms.members(room_id) {
        if Some(conn_id.as_str()) == except_conn {
            continue;
        }
        if let Some(sender) = registry.sender_of(&conn_id) {
            let _ = sender.send(msg.clone());
        }
    }
}
