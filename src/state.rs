use crate::call::registry::CallRegistry;
use crate::db::DbPool;
use crate::ws::rooms::RoomDirectory;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
///
/// The registries own their maps and are constructed once per process —
/// handlers receive them by injection, never as ambient globals, so tests
/// build fresh instances per case.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Active WebSocket connections per user (source of truth for presence)
    pub connections: ConnectionRegistry,
    /// Room membership: connection id <-> conversation/call room ids
    pub rooms: RoomDirectory,
    /// Active call arena keyed by call id, with room id as secondary index
    pub calls: CallRegistry,
}
