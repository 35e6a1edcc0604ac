//! Typing indicators: a stateless relay to the conversation room, excluding
//! the originator. No persistence, no debouncing — deduplication is a client
//! responsibility.

use crate::state::AppState;
use crate::ws::broadcast::broadcast_room;
use crate::ws::events::ServerEvent;
use crate::ws::protocol::ConnCtx;

pub fn handle_start(state: &AppState, ctx: &ConnCtx, conversation_id: &str) {
    broadcast_room(
        &state.connections,
        &state.rooms,
        conversation_id,
        Some(&ctx.conn_id),
        &ServerEvent::TypingStart {
            conversation_id: conversation_id.to_string(),
            user_id: ctx.user_id.clone(),
            username: ctx.username.clone(),
        },
    );
}

pub fn handle_stop(state: &AppState, ctx: &ConnCtx, conversation_id: &str) {
    broadcast_room(
        &state.connections,
        &state.rooms,
        conversation_id,
        Some(&ctx.conn_id),
        &ServerEvent::TypingStop {
            conversation_id: conversation_id.to_string(),
            user_id: ctx.user_id.clone(),
            username: ctx.username.clone(),
        },
    );
}
