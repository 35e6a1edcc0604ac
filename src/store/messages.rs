//! Message store: construction, edit/delete mutations, read receipts, and
//! the wire payload builder used by the fan-out engine.

use chrono::{DateTime, Utc};

use crate::db::models::MessageKind;
use crate::db::DbPool;
use crate::store::{lock, parse_ts, StoreError};
use crate::ws::events::{MessagePayload, ReadReceipt, UserSummary};

/// Fixed replacement content written over a soft-deleted message.
pub const TOMBSTONE: &str = "This message has been deleted";

/// Optional file metadata attached to a message at send time.
#[derive(Debug, Clone, Default)]
pub struct FileMeta {
    pub url: Option<String>,
    pub name: Option<String>,
    pub size: Option<i64>,
    pub mime_type: Option<String>,
    pub thumbnail: Option<String>,
}

/// Insert a new message, marked read by its sender. Returns the new rowid.
pub fn insert(
    db: &DbPool,
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    kind: MessageKind,
    file: &FileMeta,
    at: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let conn = lock(db)?;
    let now = at.to_rfc3339();

    conn.execute(
        "INSERT INTO messages
            (conversation_id, sender_id, content, kind,
             file_url, file_name, file_size, mime_type, thumbnail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            conversation_id,
            sender_id,
            content,
            kind.as_str(),
            file.url,
            file.name,
            file.size,
            file.mime_type,
            file.thumbnail,
            now,
        ],
    )?;

    let message_id = conn.last_insert_rowid();

    // Sender has read their own message
    conn.execute(
        "INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![message_id, sender_id, now],
    )?;

    Ok(message_id)
}

/// Ownership lookup for edit/delete: resolves only if the caller is the
/// sender. Returns (conversation_id, deleted flag).
pub fn find_owned(
    db: &DbPool,
    message_id: i64,
    sender_id: &str,
) -> Result<Option<(String, bool)>, StoreError> {
    let conn = lock(db)?;
    let row = conn
        .query_row(
            "SELECT conversation_id, deleted FROM messages WHERE id = ?1 AND sender_id = ?2",
            rusqlite::params![message_id, sender_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0)),
        )
        .ok();
    Ok(row)
}

/// Apply an edit: new content, edited flag, edit timestamp.
pub fn mark_edited(
    db: &DbPool,
    message_id: i64,
    content: &str,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE messages SET content = ?1, edited = 1, edited_at = ?2 WHERE id = ?3",
        rusqlite::params![content, at.to_rfc3339(), message_id],
    )?;
    Ok(())
}

/// Soft-delete: set the flag and overwrite content with the tombstone.
pub fn mark_deleted(db: &DbPool, message_id: i64) -> Result<(), StoreError> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE messages SET deleted = 1, content = ?1 WHERE id = ?2",
        rusqlite::params![TOMBSTONE, message_id],
    )?;
    Ok(())
}

/// Record read receipts for the given messages. INSERT OR IGNORE against the
/// (message_id, user_id) primary key makes repeated calls idempotent; the
/// EXISTS guard skips ids that don't belong to the conversation.
pub fn mark_read(
    db: &DbPool,
    conversation_id: &str,
    reader_id: &str,
    message_ids: &[i64],
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let conn = lock(db)?;
    let now = at.to_rfc3339();

    for message_id in message_ids {
        conn.execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
             SELECT m.id, ?2, ?3 FROM messages m
             WHERE m.id = ?1 AND m.conversation_id = ?4",
            rusqlite::params![message_id, reader_id, now, conversation_id],
        )?;
    }

    Ok(())
}

/// Read receipts for a message, oldest first.
pub fn reads_for(db: &DbPool, message_id: i64) -> Result<Vec<ReadReceipt>, StoreError> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT user_id, read_at FROM message_reads WHERE message_id = ?1 ORDER BY read_at",
    )?;
    let reads = stmt
        .query_map(rusqlite::params![message_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .filter_map(|r| r.ok())
        .filter_map(|(user, read_at)| {
            parse_ts(&read_at).map(|read_at| ReadReceipt { user, read_at })
        })
        .collect();
    Ok(reads)
}

/// Build the full wire payload for a message, sender summary and read
/// receipts included.
pub fn load_payload(db: &DbPool, message_id: i64) -> Result<Option<MessagePayload>, StoreError> {
    let row = {
        let conn = lock(db)?;
        conn.query_row(
            "SELECT m.id, m.conversation_id, m.sender_id, u.username, u.avatar,
                    m.content, m.kind, m.file_url, m.file_name, m.file_size,
                    m.mime_type, m.thumbnail, m.edited, m.edited_at, m.deleted,
                    m.created_at
             FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.id = ?1",
            rusqlite::params![message_id],
            |row| {
                Ok(MessagePayload {
                    id: row.get::<_, i64>(0)?.to_string(),
                    conversation_id: row.get(1)?,
                    sender: UserSummary {
                        id: row.get(2)?,
                        username: row.get(3)?,
                        avatar: row.get(4)?,
                    },
                    content: row.get(5)?,
                    kind: MessageKind::from_str(&row.get::<_, String>(6)?)
                        .unwrap_or_default(),
                    file_url: row.get(7)?,
                    file_name: row.get(8)?,
                    file_size: row.get(9)?,
                    mime_type: row.get(10)?,
                    thumbnail: row.get(11)?,
                    read_by: Vec::new(),
                    edited: row.get::<_, i64>(12)? != 0,
                    edited_at: row
                        .get::<_, Option<String>>(13)?
                        .and_then(|s| parse_ts(&s)),
                    deleted: row.get::<_, i64>(14)? != 0,
                    created_at: row
                        .get::<_, String>(15)
                        .map(|s| parse_ts(&s).unwrap_or_else(Utc::now))?,
                })
            },
        )
        .ok()
    };

    match row {
        Some(mut payload) => {
            payload.read_by = reads_for(db, message_id)?;
            Ok(Some(payload))
        }
        None => Ok(None),
    }
}
