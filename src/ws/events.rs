//! Wire protocol event types.
//!
//! Events are adjacently tagged JSON objects `{"event": name, "data": {...}}`
//! with camelCase payload fields. One closed enum per direction: unknown
//! event names or missing required fields fail decoding at the boundary and
//! never reach a handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::{CallKind, CallStatus, MessageKind};

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Intent events emitted by a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { conversation_id: String },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { conversation_id: String },

    #[serde(rename = "message:send", rename_all = "camelCase")]
    MessageSend {
        conversation_id: String,
        content: String,
        #[serde(rename = "type", default)]
        kind: MessageKind,
        file_url: Option<String>,
        file_name: Option<String>,
        file_size: Option<i64>,
        mime_type: Option<String>,
        thumbnail: Option<String>,
    },

    #[serde(rename = "message:edit", rename_all = "camelCase")]
    MessageEdit { message_id: String, content: String },

    #[serde(rename = "message:delete", rename_all = "camelCase")]
    MessageDelete { message_id: String },

    #[serde(rename = "message:read", rename_all = "camelCase")]
    MessageRead {
        conversation_id: String,
        message_ids: Vec<String>,
    },

    #[serde(rename = "conversation:join", rename_all = "camelCase")]
    ConversationJoin { conversation_id: String },

    #[serde(rename = "conversation:leave", rename_all = "camelCase")]
    ConversationLeave { conversation_id: String },

    #[serde(rename = "call:initiate", rename_all = "camelCase")]
    CallInitiate {
        conversation_id: String,
        receiver_id: String,
        #[serde(rename = "type")]
        kind: CallKind,
    },

    #[serde(rename = "call:accept", rename_all = "camelCase")]
    CallAccept { room_id: String },

    #[serde(rename = "call:reject", rename_all = "camelCase")]
    CallReject { room_id: String },

    #[serde(rename = "call:end", rename_all = "camelCase")]
    CallEnd { room_id: String },

    #[serde(rename = "call:join", rename_all = "camelCase")]
    CallJoin { room_id: String },

    #[serde(rename = "call:leave", rename_all = "camelCase")]
    CallLeave { room_id: String },

    #[serde(rename = "webrtc:offer", rename_all = "camelCase")]
    WebrtcOffer {
        room_id: String,
        offer: Value,
        to: Option<String>,
    },

    #[serde(rename = "webrtc:answer", rename_all = "camelCase")]
    WebrtcAnswer {
        room_id: String,
        answer: Value,
        to: Option<String>,
    },

    #[serde(rename = "webrtc:ice-candidate", rename_all = "camelCase")]
    WebrtcIceCandidate {
        room_id: String,
        candidate: Value,
        to: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Derived events fanned out by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "user:online", rename_all = "camelCase")]
    UserOnline { user_id: String, status: String },

    #[serde(rename = "user:offline", rename_all = "camelCase")]
    UserOffline {
        user_id: String,
        status: String,
        last_seen: DateTime<Utc>,
    },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart {
        conversation_id: String,
        user_id: String,
        username: String,
    },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop {
        conversation_id: String,
        user_id: String,
        username: String,
    },

    #[serde(rename = "message:new", rename_all = "camelCase")]
    MessageNew {
        message: MessagePayload,
        conversation_id: String,
    },

    #[serde(rename = "message:edited", rename_all = "camelCase")]
    MessageEdited { message: MessagePayload },

    #[serde(rename = "message:deleted", rename_all = "camelCase")]
    MessageDeleted {
        message_id: String,
        conversation_id: String,
    },

    #[serde(rename = "messages:read", rename_all = "camelCase")]
    MessagesRead {
        conversation_id: String,
        user_id: String,
        message_ids: Vec<String>,
    },

    #[serde(rename = "call:incoming", rename_all = "camelCase")]
    CallIncoming {
        call: CallPayload,
        room_id: String,
        caller: UserSummary,
    },

    #[serde(rename = "call:initiated", rename_all = "camelCase")]
    CallInitiated { call: CallPayload, room_id: String },

    #[serde(rename = "call:accepted", rename_all = "camelCase")]
    CallAccepted { room_id: String, user_id: String },

    #[serde(rename = "call:rejected", rename_all = "camelCase")]
    CallRejected { room_id: String },

    #[serde(rename = "call:ended", rename_all = "camelCase")]
    CallEnded { room_id: String },

    #[serde(rename = "call:failed", rename_all = "camelCase")]
    CallFailed { error: String },

    #[serde(rename = "call:participant-joined", rename_all = "camelCase")]
    CallParticipantJoined { user_id: String, socket_id: String },

    #[serde(rename = "call:participant-left", rename_all = "camelCase")]
    CallParticipantLeft { user_id: String },

    #[serde(rename = "webrtc:offer", rename_all = "camelCase")]
    WebrtcOffer { from: String, offer: Value },

    #[serde(rename = "webrtc:answer", rename_all = "camelCase")]
    WebrtcAnswer { from: String, answer: Value },

    #[serde(rename = "webrtc:ice-candidate", rename_all = "camelCase")]
    WebrtcIceCandidate { from: String, candidate: Value },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// Public slice of a user row, embedded in message and call payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub avatar: Option<String>,
}

/// (reader, timestamp) pair on a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user: String,
    pub read_at: DateTime<Utc>,
}

/// Full message as fanned out to clients. Message ids are the store's
/// integer rowids, stringified on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub conversation_id: String,
    pub sender: UserSummary,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub thumbnail: Option<String>,
    pub read_by: Vec<ReadReceipt>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Call session as carried in call:incoming / call:initiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    pub id: String,
    pub conversation_id: String,
    pub caller: UserSummary,
    pub receiver_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: CallKind,
    pub status: CallStatus,
    pub room_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_send_with_default_kind() {
        let raw = r#"{"event":"message:send","data":{"conversationId":"c1","content":"hello"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::MessageSend {
                conversation_id,
                content,
                kind,
                file_url,
                ..
            } => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(content, "hello");
                assert_eq!(kind, MessageKind::Text);
                assert!(file_url.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_event_name() {
        let raw = r#"{"event":"message:upsert","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn server_event_uses_colon_names() {
        let event = ServerEvent::CallFailed {
            error: "User is offline".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "call:failed");
        assert_eq!(json["data"]["error"], "User is offline");
    }
}
