use thiserror::Error;

use crate::store::StoreError;

/// Failure taxonomy for WebSocket event handlers.
///
/// Every variant is caught at the dispatch boundary and converted into an
/// `error` (or `call:failed`) event sent only to the originating connection.
/// The Display strings below are the client-visible messages.
#[derive(Debug, Error)]
pub enum EventError {
    /// Caller is not a participant of the target conversation or call.
    #[error("Not a participant of this conversation")]
    NotAParticipant,

    /// The named entity does not resolve (or the caller is not its owner).
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Malformed or rejected payload (empty content, oversized, bad shape).
    #[error("{0}")]
    Validation(String),

    /// The external store is unavailable or rejected the write.
    #[error("Internal storage error")]
    Persistence(#[from] StoreError),

    /// Call target has no live connection.
    #[error("User is offline")]
    PeerUnavailable,
}
