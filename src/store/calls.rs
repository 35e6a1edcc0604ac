//! Call store: session rows, state-machine transitions, and the wire
//! payload builder. Terminal calls are retained as history, never deleted.

use chrono::{DateTime, Utc};

use crate::db::models::{Call, CallKind, CallStatus};
use crate::db::DbPool;
use crate::store::{lock, parse_ts, StoreError};
use crate::ws::events::{CallPayload, UserSummary};

/// Insert a call session in `initiated`, recording both parties as
/// participants. Returns the new call id (AUTOINCREMENT, never reused).
pub fn insert(
    db: &DbPool,
    conversation_id: &str,
    caller_id: &str,
    receiver_id: &str,
    kind: CallKind,
    room_id: &str,
) -> Result<i64, StoreError> {
    let conn = lock(db)?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO calls (conversation_id, caller_id, receiver_id, kind, status, room_id, created_at)
         VALUES (?1, ?2, ?3, ?4, 'initiated', ?5, ?6)",
        rusqlite::params![conversation_id, caller_id, receiver_id, kind.as_str(), room_id, now],
    )?;

    let call_id = conn.last_insert_rowid();

    for user_id in [caller_id, receiver_id] {
        conn.execute(
            "INSERT OR IGNORE INTO call_participants (call_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![call_id, user_id],
        )?;
    }

    Ok(call_id)
}

/// Load a call row by its signaling room id.
pub fn find_by_room(db: &DbPool, room_id: &str) -> Result<Option<Call>, StoreError> {
    let conn = lock(db)?;
    let call = conn
        .query_row(
            "SELECT id, conversation_id, caller_id, receiver_id, kind, status,
                    room_id, started_at, ended_at, duration, created_at
             FROM calls WHERE room_id = ?1",
            rusqlite::params![room_id],
            |row| {
                Ok(Call {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    caller_id: row.get(2)?,
                    receiver_id: row.get(3)?,
                    kind: CallKind::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or(CallKind::Audio),
                    status: CallStatus::from_str(&row.get::<_, String>(5)?)
                        .unwrap_or(CallStatus::Failed),
                    room_id: row.get(6)?,
                    started_at: row
                        .get::<_, Option<String>>(7)?
                        .and_then(|s| parse_ts(&s)),
                    ended_at: row
                        .get::<_, Option<String>>(8)?
                        .and_then(|s| parse_ts(&s)),
                    duration: row.get(9)?,
                    created_at: row.get(10)?,
                })
            },
        )
        .ok();
    Ok(call)
}

/// Advance to `ringing` (receiver notified).
pub fn transition_ringing(db: &DbPool, call_id: i64) -> Result<(), StoreError> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE calls SET status = 'ringing' WHERE id = ?1",
        rusqlite::params![call_id],
    )?;
    Ok(())
}

/// Advance to `ongoing`, stamping the start time.
pub fn transition_ongoing(
    db: &DbPool,
    call_id: i64,
    started_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE calls SET status = 'ongoing', started_at = ?1 WHERE id = ?2",
        rusqlite::params![started_at.to_rfc3339(), call_id],
    )?;
    Ok(())
}

/// Move to a terminal state. `ended` carries an end timestamp and the
/// computed whole-second duration; `missed`/`rejected`/`failed` do not.
pub fn transition_terminal(
    db: &DbPool,
    call_id: i64,
    status: CallStatus,
    ended_at: Option<DateTime<Utc>>,
    duration: i64,
) -> Result<(), StoreError> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE calls SET status = ?1, ended_at = ?2, duration = ?3 WHERE id = ?4",
        rusqlite::params![
            status.as_str(),
            ended_at.map(|t| t.to_rfc3339()),
            duration,
            call_id
        ],
    )?;
    Ok(())
}

/// Build the wire payload for a call, caller summary included.
pub fn load_payload(db: &DbPool, call_id: i64) -> Result<Option<CallPayload>, StoreError> {
    let conn = lock(db)?;
    let payload = conn
        .query_row(
            "SELECT c.id, c.conversation_id, c.caller_id, u.username, u.avatar,
                    c.receiver_id, c.kind, c.status, c.room_id, c.started_at,
                    c.ended_at, c.duration, c.created_at
             FROM calls c
             JOIN users u ON u.id = c.caller_id
             WHERE c.id = ?1",
            rusqlite::params![call_id],
            |row| {
                Ok(CallPayload {
                    id: row.get::<_, i64>(0)?.to_string(),
                    conversation_id: row.get(1)?,
                    caller: UserSummary {
                        id: row.get(2)?,
                        username: row.get(3)?,
                        avatar: row.get(4)?,
                    },
                    receiver_id: row.get(5)?,
                    kind: CallKind::from_str(&row.get::<_, String>(6)?)
                        .unwrap_or(CallKind::Audio),
                    status: CallStatus::from_str(&row.get::<_, String>(7)?)
                        .unwrap_or(CallStatus::Failed),
                    room_id: row.get(8)?,
                    started_at: row
                        .get::<_, Option<String>>(9)?
                        .and_then(|s| parse_ts(&s)),
                    ended_at: row
                        .get::<_, Option<String>>(10)?
                        .and_then(|s| parse_ts(&s)),
                    duration: row.get(11)?,
                    created_at: row
                        .get::<_, String>(12)
                        .map(|s| parse_ts(&s).unwrap_or_else(Utc::now))?,
                })
            },
        )
        .ok();
    Ok(payload)
}
