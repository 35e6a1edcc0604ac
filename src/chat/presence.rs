//! Session presence: online/offline transitions driven by the connection
//! registry, persisted best-effort to the user store, broadcast to every
//! other connection. REST endpoints expose a read-only snapshot and a
//! manual status override (e.g. away).

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::store;
use crate::ws::broadcast::broadcast_all;
use crate::ws::events::ServerEvent;

/// Presence status values stored in the users table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

impl PresenceStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "away" => Some(Self::Away),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

// --- Functions called from the WS actor lifecycle ---

/// First connection for a user: persist `online` (best-effort) and broadcast
/// presence to all other connections. A persistence failure is logged, never
/// fatal to the broadcast.
pub async fn mark_online(state: &AppState, user_id: &str, origin_conn: &str) {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let persisted = store::blocking(move || {
        store::users::set_presence(&db, &uid, PresenceStatus::Online.as_str(), None)
    })
    .await;

    if let Err(e) = persisted {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to persist online presence");
    }

    broadcast_all(
        &state.connections,
        Some(origin_conn),
        &ServerEvent::UserOnline {
            user_id: user_id.to_string(),
            status: PresenceStatus::Online.as_str().to_string(),
        },
    );
}

/// Last connection for a user: stamp last-seen, persist `offline`
/// (best-effort), and broadcast with the timestamp.
pub async fn mark_offline(state: &AppState, user_id: &str, origin_conn: &str) {
    let last_seen = Utc::now();

    let db = state.db.clone();
    let uid = user_id.to_string();
    let persisted = store::blocking(move || {
        store::users::set_presence(&db, &uid, PresenceStatus::Offline.as_str(), Some(last_seen))
    })
    .await;

    if let Err(e) = persisted {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to persist offline presence");
    }

    broadcast_all(
        &state.connections,
        Some(origin_conn),
        &ServerEvent::UserOffline {
            user_id: user_id.to_string(),
            status: PresenceStatus::Offline.as_str().to_string(),
            last_seen,
        },
    );
}

/// Current online-user set as a list of presence events, sent to each newly
/// connected client before any other traffic.
pub fn snapshot(state: &AppState) -> Vec<ServerEvent> {
    state
        .connections
        .online_user_ids()
        .into_iter()
        .map(|user_id| ServerEvent::UserOnline {
            user_id,
            status: PresenceStatus::Online.as_str().to_string(),
        })
        .collect()
}

// --- REST endpoint handlers ---

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub user_id: String,
    pub status: String,
}

/// GET /api/presence — Returns the currently online users. JWT auth required.
pub async fn get_presence(
    State(state): State<AppState>,
    _claims: Claims,
) -> Json<Vec<PresenceResponse>> {
    let entries: Vec<PresenceResponse> = state
        .connections
        .online_user_ids()
        .into_iter()
        .map(|user_id| PresenceResponse {
            user_id,
            status: PresenceStatus::Online.as_str().to_string(),
        })
        .collect();

    Json(entries)
}

#[derive(Debug, Deserialize)]
pub struct SetPresenceRequest {
    pub status: String,
}

/// POST /api/presence — Set own presence status (e.g. away). JWT auth
/// required. Body: { "status": "online"|"away"|"offline" }
pub async fn set_presence(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SetPresenceRequest>,
) -> Result<StatusCode, StatusCode> {
    let status = PresenceStatus::from_str(&body.status).ok_or(StatusCode::BAD_REQUEST)?;

    let last_seen = match status {
        PresenceStatus::Offline => Some(Utc::now()),
        _ => None,
    };

    let db = state.db.clone();
    let user_id = claims.sub.clone();
    store::blocking(move || {
        store::users::set_presence(&db, &user_id, status.as_str(), last_seen)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let event = match status {
        PresenceStatus::Offline => ServerEvent::UserOffline {
            user_id: claims.sub,
            status: status.as_str().to_string(),
            last_seen: last_seen.unwrap_or_else(Utc::now),
        },
        _ => ServerEvent::UserOnline {
            user_id: claims.sub,
            status: status.as_str().to_string(),
        },
    };
    broadcast_all(&state.connections, None, &event);

    Ok(StatusCode::OK)
}
