//! Explicit room membership, replacing transport-level group primitives.
//!
//! Rooms are broadcast groups keyed by conversation or call-room identifier.
//! Membership is a plain bidirectional mapping between connection ids and
//! room ids, queried directly by the fan-out helpers so broadcast logic is
//! testable without a live transport.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Per-process room directory, injected via AppState.
#[derive(Clone, Default)]
pub struct RoomDirectory {
    /// room id -> member connection ids
    members: Arc<DashMap<String, HashSet<String>>>,
    /// connection id -> joined room ids
    joined: Arc<DashMap<String, HashSet<String>>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a connection to a room.
    pub fn join(&self, room_id: &str, conn_id: &str) {
        self.members
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
        self.joined
            .entry(conn_id.to_string())
            .or_default()
            .insert(room_id.to_string());
    }

    /// Remove a connection from a room. Empty rooms are dropped.
    pub fn leave(&self, room_id: &str, conn_id: &str) {
        if let Some(mut members) = self.members.get_mut(room_id) {
            members.remove(conn_id);
            if members.is_empty() {
                drop(members);
                self.members.remove(room_id);
            }
        }
        if let Some(mut rooms) = self.joined.get_mut(conn_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                drop(rooms);
                self.joined.remove(conn_id);
            }
        }
    }

    /// Remove a connection from every room it joined (disconnect path).
    /// Returns the rooms it was in.
    pub fn leave_all(&self, conn_id: &str) -> Vec<String> {
        let rooms: Vec<String> = self
            .joined
            .remove(conn_id)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();

        for room_id in &rooms {
            if let Some(mut members) = self.members.get_mut(room_id) {
                members.remove(conn_id);
                if members.is_empty() {
                    drop(members);
                    self.members.remove(room_id);
                }
            }
        }

        rooms
    }

    /// Connection ids currently joined to a room.
    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.members
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room_id: &str, conn_id: &str) -> bool {
        self.members
            .get(room_id)
            .map(|set| set.contains(conn_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_leave_roundtrip() {
        let rooms = RoomDirectory::new();
        rooms.join("r1", "c1");
        rooms.join("r1", "c2");
        rooms.join("r2", "c1");

        assert!(rooms.is_member("r1", "c1"));
        assert_eq!(rooms.members("r1").len(), 2);

        rooms.leave("r1", "c1");
        assert!(!rooms.is_member("r1", "c1"));
        assert!(rooms.is_member("r2", "c1"));
    }

    #[test]
    fn leave_all_clears_every_room() {
        let rooms = RoomDirectory::new();
        rooms.join("r1", "c1");
        rooms.join("r2", "c1");
        rooms.join("r2", "c2");

        let mut left = rooms.leave_all("c1");
        left.sort();
        assert_eq!(left, vec!["r1".to_string(), "r2".to_string()]);

        assert!(rooms.members("r1").is_empty());
        assert_eq!(rooms.members("r2"), vec!["c2".to_string()]);
    }
}
