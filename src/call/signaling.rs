//! Call lifecycle handlers and WebRTC payload relay.
//!
//! State machine per call: initiated -> ringing -> ongoing -> ended, with
//! missed (receiver offline at initiation), rejected (declined while
//! ringing), and failed (setup error) as alternate terminal states.
//! Persistence errors during a transition are reported to the initiating
//! connection as call:failed and the in-memory entry is cleaned up
//! defensively; the coordinator itself never crashes.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::db::models::{CallKind, CallStatus};
use crate::error::EventError;
use crate::state::AppState;
use crate::store;
use crate::ws::broadcast::{broadcast_room, send_to_conn, send_to_user};
use crate::ws::events::ServerEvent;
use crate::ws::protocol::ConnCtx;

/// Which WebRTC payload a relay carries. The server never interprets the
/// payload itself.
#[derive(Debug, Clone, Copy)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Start a call: create the session record, register the active-call entry
/// with the caller as sole participant, and ring the receiver. An offline
/// receiver terminates the attempt as `missed` with no ring.
pub async fn handle_initiate(
    state: &AppState,
    ctx: &ConnCtx,
    conversation_id: &str,
    receiver_id: &str,
    kind: CallKind,
) -> Result<(), EventError> {
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let uid = ctx.user_id.clone();
    let member =
        store::blocking(move || store::conversations::is_participant(&db, &cid, &uid)).await?;
    if !member {
        return Err(EventError::NotAParticipant);
    }

    // Fresh room id per call attempt, never reused
    let room_id = Uuid::new_v4().to_string();

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let caller = ctx.user_id.clone();
    let receiver = receiver_id.to_string();
    let rid = room_id.clone();
    let call_id = store::blocking(move || {
        store::calls::insert(&db, &cid, &caller, &receiver, kind, &rid)
    })
    .await?;

    state.calls.register(call_id, &room_id, &ctx.user_id);
    // The initiating connection joins the signaling room up front so that
    // room-scoped lifecycle events reach both parties
    state.rooms.join(&room_id, &ctx.conn_id);

    if !state.connections.is_online(receiver_id) {
        // No ring attempted; the session is retained as history in `missed`
        let db = state.db.clone();
        if let Err(e) = store::blocking(move || {
            store::calls::transition_terminal(&db, call_id, CallStatus::Missed, None, 0)
        })
        .await
        {
            tracing::error!(call_id, error = %e, "Failed to record missed call");
        }
        cleanup_call(state, &room_id, &ctx.conn_id);
        return Err(EventError::PeerUnavailable);
    }

    let db = state.db.clone();
    let payload = match store::blocking(move || store::calls::load_payload(&db, call_id)).await {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            cleanup_call(state, &room_id, &ctx.conn_id);
            return Err(EventError::NotFound("Call"));
        }
        Err(e) => {
            cleanup_call(state, &room_id, &ctx.conn_id);
            return Err(e.into());
        }
    };

    send_to_user(
        &state.connections,
        receiver_id,
        &ServerEvent::CallIncoming {
            call: payload.clone(),
            room_id: room_id.clone(),
            caller: payload.caller.clone(),
        },
    );

    let db = state.db.clone();
    if let Err(e) = store::blocking(move || store::calls::transition_ringing(&db, call_id)).await {
        cleanup_call(state, &room_id, &ctx.conn_id);
        return Err(e.into());
    }

    ctx.send(&ServerEvent::CallInitiated {
        call: payload,
        room_id,
    });

    Ok(())
}

/// Accept a ringing call: valid only from `ringing`, otherwise the call does
/// not resolve for the receiver.
pub async fn handle_accept(
    state: &AppState,
    ctx: &ConnCtx,
    room_id: &str,
) -> Result<(), EventError> {
    let db = state.db.clone();
    let rid = room_id.to_string();
    let call = store::blocking(move || store::calls::find_by_room(&db, &rid))
        .await?
        .filter(|call| call.status == CallStatus::Ringing)
        .ok_or(EventError::NotFound("Call"))?;

    let started_at = Utc::now();
    let db = state.db.clone();
    if let Err(e) =
        store::blocking(move || store::calls::transition_ongoing(&db, call.id, started_at)).await
    {
        state.calls.remove_by_room(room_id);
        return Err(e.into());
    }

    state.rooms.join(room_id, &ctx.conn_id);
    state.calls.add_participant(room_id, &ctx.user_id);

    broadcast_room(
        &state.connections,
        &state.rooms,
        room_id,
        None,
        &ServerEvent::CallAccepted {
            room_id: room_id.to_string(),
            user_id: ctx.user_id.clone(),
        },
    );

    Ok(())
}

/// Decline a ringing call.
pub async fn handle_reject(
    state: &AppState,
    _ctx: &ConnCtx,
    room_id: &str,
) -> Result<(), EventError> {
    let db = state.db.clone();
    let rid = room_id.to_string();
    let call = store::blocking(move || store::calls::find_by_room(&db, &rid))
        .await?
        .filter(|call| call.status == CallStatus::Ringing)
        .ok_or(EventError::NotFound("Call"))?;

    let db = state.db.clone();
    if let Err(e) = store::blocking(move || {
        store::calls::transition_terminal(&db, call.id, CallStatus::Rejected, None, 0)
    })
    .await
    {
        state.calls.remove_by_room(room_id);
        return Err(e.into());
    }

    broadcast_room(
        &state.connections,
        &state.rooms,
        room_id,
        None,
        &ServerEvent::CallRejected {
            room_id: room_id.to_string(),
        },
    );

    state.calls.remove_by_room(room_id);
    Ok(())
}

/// Hang up. Valid from `ongoing`, with any non-terminal state accepted as a
/// safety net. Duration is end-minus-start in whole seconds, zero if the
/// call never started.
pub async fn handle_end(state: &AppState, _ctx: &ConnCtx, room_id: &str) -> Result<(), EventError> {
    let db = state.db.clone();
    let rid = room_id.to_string();
    let call = store::blocking(move || store::calls::find_by_room(&db, &rid))
        .await?
        .ok_or(EventError::NotFound("Call"))?;

    if !call.status.is_terminal() {
        let ended_at = Utc::now();
        let duration = call
            .started_at
            .map(|started| (ended_at - started).num_seconds().max(0))
            .unwrap_or(0);

        let db = state.db.clone();
        if let Err(e) = store::blocking(move || {
            store::calls::transition_terminal(&db, call.id, CallStatus::Ended, Some(ended_at), duration)
        })
        .await
        {
            state.calls.remove_by_room(room_id);
            return Err(e.into());
        }
    }

    broadcast_room(
        &state.connections,
        &state.rooms,
        room_id,
        None,
        &ServerEvent::CallEnded {
            room_id: room_id.to_string(),
        },
    );

    state.calls.remove_by_room(room_id);
    Ok(())
}

/// Join the signaling room of an active call (late joiners in group calls).
/// Independent of the session's own status field.
pub fn handle_join(state: &AppState, ctx: &ConnCtx, room_id: &str) {
    state.rooms.join(room_id, &ctx.conn_id);

    if state.calls.add_participant(room_id, &ctx.user_id) {
        broadcast_room(
            &state.connections,
            &state.rooms,
            room_id,
            Some(&ctx.conn_id),
            &ServerEvent::CallParticipantJoined {
                user_id: ctx.user_id.clone(),
                socket_id: ctx.conn_id.clone(),
            },
        );
    }
}

/// Leave the signaling room. The active-call entry is dropped once the last
/// participant leaves.
pub fn handle_leave(state: &AppState, ctx: &ConnCtx, room_id: &str) {
    state.rooms.leave(room_id, &ctx.conn_id);

    if state.calls.remove_participant(room_id, &ctx.user_id) {
        broadcast_room(
            &state.connections,
            &state.rooms,
            room_id,
            Some(&ctx.conn_id),
            &ServerEvent::CallParticipantLeft {
                user_id: ctx.user_id.clone(),
            },
        );
    }
}

/// Relay a WebRTC negotiation payload: unicast when a target connection is
/// named, otherwise to all other members of the signaling room. No
/// state-machine involvement — signaling may legitimately arrive before the
/// state machine catches up.
pub fn handle_relay(
    state: &AppState,
    ctx: &ConnCtx,
    kind: RelayKind,
    room_id: &str,
    payload: Value,
    to: Option<String>,
) {
    let from = ctx.conn_id.clone();
    let event = match kind {
        RelayKind::Offer => ServerEvent::WebrtcOffer {
            from,
            offer: payload,
        },
        RelayKind::Answer => ServerEvent::WebrtcAnswer {
            from,
            answer: payload,
        },
        RelayKind::IceCandidate => ServerEvent::WebrtcIceCandidate {
            from,
            candidate: payload,
        },
    };

    match to {
        Some(target) => send_to_conn(&state.connections, &target, &event),
        None => broadcast_room(
            &state.connections,
            &state.rooms,
            room_id,
            Some(&ctx.conn_id),
            &event,
        ),
    }
}

/// Defensive cleanup on any terminal transition or setup error.
fn cleanup_call(state: &AppState, room_id: &str, conn_id: &str) {
    state.calls.remove_by_room(room_id);
    state.rooms.leave(room_id, conn_id);
}
