//! In-memory arena of active calls.
//!
//! Entries are keyed by the store's call id (monotonically distinct, never
//! reused) with the signaling room id as a secondary lookup index. An entry
//! lives from initiate until the call reaches a terminal state or all
//! participants leave.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Ephemeral state for one active call.
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub call_id: i64,
    pub room_id: String,
    /// Identities currently joined to the signaling room.
    pub participants: HashSet<String>,
}

/// Per-process active-call registry, injected via AppState.
#[derive(Clone, Default)]
pub struct CallRegistry {
    /// call id -> active call state
    calls: Arc<DashMap<i64, ActiveCall>>,
    /// room id -> call id (secondary index)
    by_room: Arc<DashMap<String, i64>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh call with the caller as sole current participant.
    pub fn register(&self, call_id: i64, room_id: &str, caller_id: &str) {
        let mut participants = HashSet::new();
        participants.insert(caller_id.to_string());

        self.calls.insert(
            call_id,
            ActiveCall {
                call_id,
                room_id: room_id.to_string(),
                participants,
            },
        );
        self.by_room.insert(room_id.to_string(), call_id);
    }

    /// Resolve the call id behind a signaling room.
    pub fn call_id_for_room(&self, room_id: &str) -> Option<i64> {
        self.by_room.get(room_id).map(|e| *e.value())
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.by_room.contains_key(room_id)
    }

    /// Add a participant. Returns false when no active call owns the room.
    pub fn add_participant(&self, room_id: &str, user_id: &str) -> bool {
        let Some(call_id) = self.call_id_for_room(room_id) else {
            return false;
        };
        if let Some(mut call) = self.calls.get_mut(&call_id) {
            call.participants.insert(user_id.to_string());
            true
        } else {
            false
        }
    }

    /// Remove a participant. The entry is dropped once the last participant
    /// leaves. Returns false when no active call owns the room.
    pub fn remove_participant(&self, room_id: &str, user_id: &str) -> bool {
        let Some(call_id) = self.call_id_for_room(room_id) else {
            return false;
        };

        let mut now_empty = false;
        if let Some(mut call) = self.calls.get_mut(&call_id) {
            call.participants.remove(user_id);
            now_empty = call.participants.is_empty();
        }

        if now_empty {
            self.remove_by_room(room_id);
        }
        true
    }

    pub fn participants(&self, room_id: &str) -> Vec<String> {
        self.call_id_for_room(room_id)
            .and_then(|call_id| {
                self.calls
                    .get(&call_id)
                    .map(|call| call.participants.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Drop the entry for a room (terminal transition or defensive cleanup).
    pub fn remove_by_room(&self, room_id: &str) -> Option<ActiveCall> {
        let (_, call_id) = self.by_room.remove(room_id)?;
        self.calls.remove(&call_id).map(|(_, call)| call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_by_room() {
        let registry = CallRegistry::new();
        registry.register(7, "room-a", "alice");

        assert_eq!(registry.call_id_for_room("room-a"), Some(7));
        assert_eq!(registry.participants("room-a"), vec!["alice".to_string()]);
        assert!(!registry.contains_room("room-b"));
    }

    #[test]
    fn last_participant_leaving_drops_the_entry() {
        let registry = CallRegistry::new();
        registry.register(1, "room-a", "alice");
        assert!(registry.add_participant("room-a", "bob"));

        assert!(registry.remove_participant("room-a", "alice"));
        assert!(registry.contains_room("room-a"));

        assert!(registry.remove_participant("room-a", "bob"));
        assert!(!registry.contains_room("room-a"));
        assert!(!registry.add_participant("room-a", "carol"));
    }

    #[test]
    fn remove_by_room_clears_both_indexes() {
        let registry = CallRegistry::new();
        registry.register(3, "room-x", "alice");

        let removed = registry.remove_by_room("room-x").unwrap();
        assert_eq!(removed.call_id, 3);
        assert_eq!(registry.call_id_for_room("room-x"), None);
        assert!(registry.remove_by_room("room-x").is_none());
    }
}
