#![allow(missing_docs)]

//! Error types for match operations and synchronization.

use thiserror::Error;

use crate::{
    controller::{ControllerError, Role},
    models::FlagConflict,
};

/// Result alias for match mutations.
pub type MatchResult<T> = std::result::Result<T, MatchError>;

/// Why a match mutation was refused. Nothing is applied when one is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    /// No point exists or the current one has no room for play.
    #[error("no active point")]
    NoActivePoint,

    #[error("point already completed")]
    PointAlreadyCompleted,

    /// A new point cannot be started while one is being played.
    #[error("a point is already in progress")]
    PointInProgress,

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("a point needs at least one player on the line")]
    EmptyLine,

    #[error("game has ended")]
    GameEnded,

    #[error(transparent)]
    InvalidFlags(#[from] FlagConflict),

    /// The local device does not hold the role gating this action.
    #[error(
        "permission denied: the {} role is held by {}",
        .role.label(),
        .holder.as_deref().unwrap_or("another device")
    )]
    PermissionDenied {
        role: Role,
        holder: Option<String>,
    },
}

/// Failures talking to the synchronization service.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("controller rejected request: {0}")]
    Controller(#[from] ControllerError),

    /// Service not reachable in the current configuration.
    #[error("sync service unavailable: {0}")]
    Unavailable(String),
}
