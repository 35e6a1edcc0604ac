pub mod actor;
pub mod broadcast;
pub mod events;
pub mod handler;
pub mod protocol;
pub mod rooms;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

#[derive(Clone)]
struct ConnectionEntry {
    conn_id: String,
    user_id: String,
    sender: ConnectionSender,
}

/// Session registry: tracks all active WebSocket connections per user.
/// A user can have multiple concurrent connections (multiple devices/tabs);
/// presence is "online" iff at least one connection is registered.
///
/// Owns its maps and is injected via AppState — never ambient global state —
/// so tests get a fresh instance per case.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    by_user: Arc<DashMap<String, Vec<ConnectionEntry>>>,
    by_conn: Arc<DashMap<String, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection. Returns true if this is the user's first active
    /// connection (i.e. the user just came online).
    pub fn register(&self, user_id: &str, conn_id: &str, sender: ConnectionSender) -> bool {
        let entry = ConnectionEntry {
            conn_id: conn_id.to_string(),
            user_id: user_id.to_string(),
            sender,
        };

        self.by_conn.insert(conn_id.to_string(), entry.clone());

        let mut connections = self.by_user.entry(user_id.to_string()).or_default();
        let was_offline = connections.is_empty();
        connections.push(entry);

        tracing::debug!(
            user_id = %user_id,
            connections = connections.len(),
            "Connection registered"
        );

        was_offline
    }

    /// Remove a connection. Returns the user id and whether this was the
    /// user's last connection (i.e. the user just went offline).
    pub fn unregister(&self, conn_id: &str) -> Option<(String, bool)> {
        let (_, entry) = self.by_conn.remove(conn_id)?;
        let user_id = entry.user_id;

        let mut remove_user = false;
        if let Some(mut connections) = self.by_user.get_mut(&user_id) {
            // Drop this connection plus any sender whose receiver has closed
            connections.retain(|c| c.conn_id != conn_id && !c.sender.is_closed());
            if connections.is_empty() {
                remove_user = true;
            }
        }

        if remove_user {
            self.by_user.remove(&user_id);
        }

        tracing::debug!(user_id = %user_id, "Connection unregistered");

        Some((user_id, remove_user))
    }

    /// Pure lookup: does the user have at least one live connection?
    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user
            .get(user_id)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Sender handle for a specific connection (unicast targeting).
    pub fn sender_of(&self, conn_id: &str) -> Option<ConnectionSender> {
        self.by_conn.get(conn_id).map(|e| e.sender.clone())
    }

    /// All sender handles for a user (every device).
    pub fn senders_of_user(&self, user_id: &str) -> Vec<ConnectionSender> {
        self.by_user
            .get(user_id)
            .map(|v| v.iter().map(|e| e.sender.clone()).collect())
            .unwrap_or_default()
    }

    /// All sender handles except the named connection.
    pub fn senders_except(&self, conn_id: &str) -> Vec<ConnectionSender> {
        self.by_conn
            .iter()
            .filter(|e| e.key() != conn_id)
            .map(|e| e.value().sender.clone())
            .collect()
    }

    /// Users currently online, for the connect-time presence snapshot.
    pub fn online_user_ids(&self) -> Vec<String> {
        self.by_user.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Receiver = mpsc::UnboundedReceiver<axum::extract::ws::Message>;

    fn sender() -> (ConnectionSender, Receiver) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn first_and_last_connection_flip_presence() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.is_online("u1"));

        // Hold the receivers alive so the senders stay open for the duration
        // of the test; a real connection keeps its receiver alive while live.
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();

        assert!(registry.register("u1", "c1", tx1));
        assert!(registry.is_online("u1"));

        // Second device: no presence flip
        assert!(!registry.register("u1", "c2", tx2));

        assert_eq!(registry.unregister("c1"), Some(("u1".to_string(), false)));
        assert!(registry.is_online("u1"));

        assert_eq!(registry.unregister("c2"), Some(("u1".to_string(), true)));
        assert!(!registry.is_online("u1"));
    }

    #[test]
    fn unregister_unknown_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.unregister("nope"), None);
    }
}
