//! Event dispatch: decode the tagged JSON envelope, route to the matching
//! handler, and convert handler failures into error events for the
//! originating connection only.

use axum::extract::ws::Message;

use crate::call::signaling::{self, RelayKind};
use crate::chat::{messages, typing};
use crate::error::EventError;
use crate::state::AppState;
use crate::store;
use crate::ws::events::{ClientEvent, ServerEvent};
use crate::ws::ConnectionSender;

/// Per-connection context threaded through every handler.
#[derive(Clone)]
pub struct ConnCtx {
    pub conn_id: String,
    pub user_id: String,
    pub username: String,
    pub tx: ConnectionSender,
}

impl ConnCtx {
    /// Push an event straight to this connection.
    pub fn send(&self, event: &ServerEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = self.tx.send(Message::Text(json.into()));
        }
    }
}

/// Handle one incoming text frame.
pub async fn handle_event(text: &str, ctx: &ConnCtx, state: &AppState) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %ctx.user_id,
                error = %e,
                "Failed to decode client event"
            );
            ctx.send(&ServerEvent::Error {
                message: "Invalid event payload".to_string(),
            });
            return;
        }
    };

    // Call lifecycle failures surface as call:failed, everything else as error
    let call_family = matches!(
        event,
        ClientEvent::CallInitiate { .. }
            | ClientEvent::CallAccept { .. }
            | ClientEvent::CallReject { .. }
            | ClientEvent::CallEnd { .. }
    );

    if let Err(err) = dispatch(event, ctx, state).await {
        if let EventError::Persistence(ref cause) = err {
            tracing::error!(user_id = %ctx.user_id, error = %cause, "Handler persistence failure");
        } else {
            tracing::warn!(user_id = %ctx.user_id, error = %err, "Handler rejected event");
        }

        let event = if call_family {
            ServerEvent::CallFailed {
                error: err.to_string(),
            }
        } else {
            ServerEvent::Error {
                message: err.to_string(),
            }
        };
        ctx.send(&event);
    }
}

async fn dispatch(event: ClientEvent, ctx: &ConnCtx, state: &AppState) -> Result<(), EventError> {
    match event {
        ClientEvent::TypingStart { conversation_id } => {
            typing::handle_start(state, ctx, &conversation_id);
            Ok(())
        }
        ClientEvent::TypingStop { conversation_id } => {
            typing::handle_stop(state, ctx, &conversation_id);
            Ok(())
        }
        ClientEvent::MessageSend {
            conversation_id,
            content,
            kind,
            file_url,
            file_name,
            file_size,
            mime_type,
            thumbnail,
        } => {
            let file = store::messages::FileMeta {
                url: file_url,
                name: file_name,
                size: file_size,
                mime_type,
                thumbnail,
            };
            messages::handle_send(state, ctx, &conversation_id, &content, kind, file).await
        }
        ClientEvent::MessageEdit {
            message_id,
            content,
        } => messages::handle_edit(state, ctx, &message_id, &content).await,
        ClientEvent::MessageDelete { message_id } => {
            messages::handle_delete(state, ctx, &message_id).await
        }
        ClientEvent::MessageRead {
            conversation_id,
            message_ids,
        } => messages::handle_read(state, ctx, &conversation_id, message_ids).await,
        ClientEvent::ConversationJoin { conversation_id } => {
            handle_conversation_join(state, ctx, &conversation_id).await
        }
        ClientEvent::ConversationLeave { conversation_id } => {
            state.rooms.leave(&conversation_id, &ctx.conn_id);
            Ok(())
        }
        ClientEvent::CallInitiate {
            conversation_id,
            receiver_id,
            kind,
        } => signaling::handle_initiate(state, ctx, &conversation_id, &receiver_id, kind).await,
        ClientEvent::CallAccept { room_id } => signaling::handle_accept(state, ctx, &room_id).await,
        ClientEvent::CallReject { room_id } => signaling::handle_reject(state, ctx, &room_id).await,
        ClientEvent::CallEnd { room_id } => signaling::handle_end(state, ctx, &room_id).await,
        ClientEvent::CallJoin { room_id } => {
            signaling::handle_join(state, ctx, &room_id);
            Ok(())
        }
        ClientEvent::CallLeave { room_id } => {
            signaling::handle_leave(state, ctx, &room_id);
            Ok(())
        }
        ClientEvent::WebrtcOffer { room_id, offer, to } => {
            signaling::handle_relay(state, ctx, RelayKind::Offer, &room_id, offer, to);
            Ok(())
        }
        ClientEvent::WebrtcAnswer {
            room_id,
            answer,
            to,
        } => {
            signaling::handle_relay(state, ctx, RelayKind::Answer, &room_id, answer, to);
            Ok(())
        }
        ClientEvent::WebrtcIceCandidate {
            room_id,
            candidate,
            to,
        } => {
            signaling::handle_relay(state, ctx, RelayKind::IceCandidate, &room_id, candidate, to);
            Ok(())
        }
    }
}

/// Ad hoc room registration when a conversation is created or updated
/// mid-session. Membership is verified against the store before joining.
async fn handle_conversation_join(
    state: &AppState,
    ctx: &ConnCtx,
    conversation_id: &str,
) -> Result<(), EventError> {
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let uid = ctx.user_id.clone();
    let member =
        store::blocking(move || store::conversations::is_participant(&db, &cid, &uid)).await?;

    if !member {
        return Err(EventError::NotAParticipant);
    }

    state.rooms.join(conversation_id, &ctx.conn_id);
    Ok(())
}
