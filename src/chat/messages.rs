//! Message fan-out engine: validates inbound message intents, persists them,
//! then broadcasts to the conversation room. Persistence failures block the
//! broadcast — unpersisted mutations are never fanned out.

use chrono::Utc;

use crate::db::models::MessageKind;
use crate::error::EventError;
use crate::state::AppState;
use crate::store::{self, messages::FileMeta};
use crate::ws::broadcast::broadcast_room;
use crate::ws::events::ServerEvent;
use crate::ws::protocol::ConnCtx;

/// Maximum message content length (chars).
const MAX_CONTENT_LENGTH: usize = 4000;

/// Send a message to a conversation.
///
/// Membership is checked against the store at call time, not from the room
/// cache: the fan-out target set is the participant set at the time of send.
/// The broadcast goes to every connection joined to the room, including the
/// sender's other devices.
pub async fn handle_send(
    state: &AppState,
    ctx: &ConnCtx,
    conversation_id: &str,
    content: &str,
    kind: MessageKind,
    file: FileMeta,
) -> Result<(), EventError> {
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(EventError::Validation(
            "Message content cannot be empty".to_string(),
        ));
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(EventError::Validation(
            "Message content too long".to_string(),
        ));
    }

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let uid = ctx.user_id.clone();

    let result = store::blocking(move || {
        if !store::conversations::is_participant(&db, &cid, &uid)? {
            return Ok(None);
        }

        let now = Utc::now();
        let message_id = store::messages::insert(&db, &cid, &uid, &content, kind, &file, now)?;
        store::conversations::touch_last_message(&db, &cid, message_id, now)?;

        let payload = store::messages::load_payload(&db, message_id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        let participants = store::conversations::participants(&db, &cid)?;

        Ok(Some((payload, participants)))
    })
    .await?;

    let Some((payload, participants)) = result else {
        return Err(EventError::NotAParticipant);
    };

    broadcast_room(
        &state.connections,
        &state.rooms,
        conversation_id,
        None,
        &ServerEvent::MessageNew {
            message: payload,
            conversation_id: conversation_id.to_string(),
        },
    );

    // Delivery metadata for external push-notification handling — advisory
    // only, no redelivery is attempted here.
    let offline: Vec<String> = participants
        .into_iter()
        .filter(|p| p != &ctx.user_id && !state.connections.is_online(p))
        .collect();
    if !offline.is_empty() {
        tracing::info!(
            conversation_id = %conversation_id,
            offline = ?offline,
            "Participants offline at fan-out time"
        );
    }

    Ok(())
}

/// Edit a message. Only the original sender may edit, and soft-deleted
/// messages are never edited.
pub async fn handle_edit(
    state: &AppState,
    ctx: &ConnCtx,
    message_id: &str,
    content: &str,
) -> Result<(), EventError> {
    let mid: i64 = message_id
        .parse()
        .map_err(|_| EventError::NotFound("Message"))?;

    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(EventError::Validation(
            "Message content cannot be empty".to_string(),
        ));
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(EventError::Validation(
            "Message content too long".to_string(),
        ));
    }

    let db = state.db.clone();
    let uid = ctx.user_id.clone();

    let payload = store::blocking(move || {
        match store::messages::find_owned(&db, mid, &uid)? {
            Some((_, deleted)) if !deleted => {}
            // Missing, foreign, or tombstoned — all opaque to the caller
            _ => return Ok(None),
        }
        store::messages::mark_edited(&db, mid, &content, Utc::now())?;
        store::messages::load_payload(&db, mid)
    })
    .await?
    .ok_or(EventError::NotFound("Message"))?;

    let conversation_id = payload.conversation_id.clone();
    broadcast_room(
        &state.connections,
        &state.rooms,
        &conversation_id,
        None,
        &ServerEvent::MessageEdited { message: payload },
    );

    Ok(())
}

/// Soft-delete a message: the content is replaced with a fixed tombstone and
/// only the identifier is re-broadcast. Repeated deletes by the owner are
/// idempotent in effect.
pub async fn handle_delete(
    state: &AppState,
    ctx: &ConnCtx,
    message_id: &str,
) -> Result<(), EventError> {
    let mid: i64 = message_id
        .parse()
        .map_err(|_| EventError::NotFound("Message"))?;

    let db = state.db.clone();
    let uid = ctx.user_id.clone();

    let conversation_id = store::blocking(move || {
        let Some((conversation_id, _)) = store::messages::find_owned(&db, mid, &uid)? else {
            return Ok(None);
        };
        store::messages::mark_deleted(&db, mid)?;
        Ok(Some(conversation_id))
    })
    .await?
    .ok_or(EventError::NotFound("Message"))?;

    broadcast_room(
        &state.connections,
        &state.rooms,
        &conversation_id,
        None,
        &ServerEvent::MessageDeleted {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.clone(),
        },
    );

    Ok(())
}

/// Record read receipts. Client-side temporary identifiers are filtered out
/// before the store is touched; an empty filtered list is a silent no-op.
/// The broadcast excludes the reader's own connection.
pub async fn handle_read(
    state: &AppState,
    ctx: &ConnCtx,
    conversation_id: &str,
    message_ids: Vec<String>,
) -> Result<(), EventError> {
    let valid: Vec<i64> = message_ids
        .iter()
        .filter(|id| !id.starts_with("temp-"))
        .filter_map(|id| id.parse().ok())
        .collect();

    if valid.is_empty() {
        return Ok(());
    }

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let uid = ctx.user_id.clone();
    let ids = valid.clone();

    store::blocking(move || store::messages::mark_read(&db, &cid, &uid, &ids, Utc::now())).await?;

    broadcast_room(
        &state.connections,
        &state.rooms,
        conversation_id,
        Some(&ctx.conn_id),
        &ServerEvent::MessagesRead {
            conversation_id: conversation_id.to_string(),
            user_id: ctx.user_id.clone(),
            message_ids: valid.iter().map(|id| id.to_string()).collect(),
        },
    );

    Ok(())
}
