//! Errors surfaced to players and commands.

use thiserror::Error;
use uuid::Uuid;
use waystone_world::StoreError;
use waystone_transfer::TransferError;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("home {0} not found")]
    HomeNotFound(String),

    #[error("warp {0} not found")]
    WarpNotFound(String),

    #[error("home limit of {max} reached")]
    HomeLimitReached { max: u32 },

    /// No standable block near the requested home or warp position.
    #[error("no safe location near the requested position")]
    NoSafeLocation,

    #[error("no previous location to return to")]
    NoBackLocation,

    #[error("user {0} is not online")]
    NotOnline(Uuid),

    #[error("world {0} not found")]
    WorldNotFound(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("initialisation step {step} failed: {source}")]
    Initialize {
        step: &'static str,
        #[source]
        source: Box<ContextError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}
