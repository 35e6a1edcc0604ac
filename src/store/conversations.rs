//! Conversation store: membership queries used to compute fan-out targets,
//! and the last-message pointer the fan-out engine bumps after each send.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{Conversation, ConversationKind};
use crate::db::DbPool;
use crate::store::{lock, parse_ts, StoreError};

/// All conversation ids the user participates in. Queried once at connect
/// time to populate the room directory.
pub fn ids_for_user(db: &DbPool, user_id: &str) -> Result<Vec<String>, StoreError> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT conversation_id FROM conversation_participants WHERE user_id = ?1",
    )?;
    let ids = stmt
        .query_map(rusqlite::params![user_id], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

/// Membership check against the store, not a stale cache.
pub fn is_participant(
    db: &DbPool,
    conversation_id: &str,
    user_id: &str,
) -> Result<bool, StoreError> {
    let conn = lock(db)?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM conversation_participants
         WHERE conversation_id = ?1 AND user_id = ?2",
        rusqlite::params![conversation_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Participant identities for a conversation.
pub fn participants(db: &DbPool, conversation_id: &str) -> Result<Vec<String>, StoreError> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1",
    )?;
    let ids = stmt
        .query_map(rusqlite::params![conversation_id], |row| {
            row.get::<_, String>(0)
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

/// Bump the conversation's last-message pointer and activity timestamp.
pub fn touch_last_message(
    db: &DbPool,
    conversation_id: &str,
    message_id: i64,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE conversations SET last_message_id = ?1, last_message_at = ?2 WHERE id = ?3",
        rusqlite::params![message_id, at.to_rfc3339(), conversation_id],
    )?;
    Ok(())
}

/// Create a conversation with the given participants. Conversation CRUD
/// belongs to an external collaborator; this exists for that collaborator's
/// plumbing and for test fixtures.
pub fn create(
    db: &DbPool,
    kind: ConversationKind,
    name: Option<&str>,
    participant_ids: &[String],
) -> Result<Conversation, StoreError> {
    let conn = lock(db)?;
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO conversations (id, kind, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, kind.as_str(), name, now],
    )?;

    for user_id in participant_ids {
        conn.execute(
            "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![id, user_id],
        )?;
    }

    Ok(Conversation {
        id,
        kind,
        name: name.map(|s| s.to_string()),
        avatar: None,
        last_message_id: None,
        last_message_at: None,
        created_at: now,
    })
}

/// Load a conversation row.
pub fn find(db: &DbPool, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
    let conn = lock(db)?;
    let conv = conn
        .query_row(
            "SELECT id, kind, name, avatar, last_message_id, last_message_at, created_at
             FROM conversations WHERE id = ?1",
            rusqlite::params![conversation_id],
            |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    kind: ConversationKind::from_str(&row.get::<_, String>(1)?)
                        .unwrap_or(ConversationKind::Private),
                    name: row.get(2)?,
                    avatar: row.get(3)?,
                    last_message_id: row.get(4)?,
                    last_message_at: row
                        .get::<_, Option<String>>(5)?
                        .and_then(|s| parse_ts(&s)),
                    created_at: row.get(6)?,
                })
            },
        )
        .ok();
    Ok(conv)
}
