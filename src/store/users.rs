//! User store: lookups plus the presence columns owned by the Session Registry.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::User;
use crate::db::DbPool;
use crate::store::{lock, parse_ts, StoreError};

/// Look up a user by id.
pub fn find(db: &DbPool, user_id: &str) -> Result<Option<User>, StoreError> {
    let conn = lock(db)?;
    let user = conn
        .query_row(
            "SELECT id, username, avatar, status, last_seen, created_at, updated_at
             FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    avatar: row.get(2)?,
                    status: row.get(3)?,
                    last_seen: row
                        .get::<_, Option<String>>(4)?
                        .and_then(|s| parse_ts(&s)),
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            },
        )
        .ok();
    Ok(user)
}

/// Create a user. Used by collaborators (registration is out of scope here)
/// and by the integration tests to seed fixtures.
pub fn create(db: &DbPool, username: &str, avatar: Option<&str>) -> Result<User, StoreError> {
    let conn = lock(db)?;
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO users (id, username, avatar, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'offline', ?4, ?4)",
        rusqlite::params![id, username, avatar, now],
    )?;

    Ok(User {
        id,
        username: username.to_string(),
        avatar: avatar.map(|s| s.to_string()),
        status: "offline".to_string(),
        last_seen: None,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Persist a presence transition. `last_seen` is stamped only when provided
/// (disconnect path); connect leaves the previous value in place.
pub fn set_presence(
    db: &DbPool,
    user_id: &str,
    status: &str,
    last_seen: Option<DateTime<Utc>>,
) -> Result<(), StoreError> {
    let conn = lock(db)?;
    let now = Utc::now().to_rfc3339();

    match last_seen {
        Some(seen) => {
            conn.execute(
                "UPDATE users SET status = ?1, last_seen = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![status, seen.to_rfc3339(), now, user_id],
            )?;
        }
        None => {
            conn.execute(
                "UPDATE users SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status, now, user_id],
            )?;
        }
    }

    Ok(())
}
