//! Transfer error types.

use thiserror::Error;
use waystone_net::{BrokerError, FailureReason};
use waystone_safety::EngineError;
use waystone_world::{CorrelationId, ServerName, TeleportRequest, TeleportTarget};

/// Why a teleport did not complete.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no safe location found")]
    NoSafeLocationFound,

    /// The destination server is not a known peer, or cross-server mode is off.
    #[error("server {0} is unreachable")]
    DestinationUnreachable(ServerName),

    #[error("request {0} timed out")]
    RequestTimedOut(CorrelationId),

    /// Logged when a late response arrives; never reported to the player.
    #[error("request {0} was replaced by a newer request")]
    RequestSuperseded(CorrelationId),

    #[error("player {0} is not online")]
    TargetUserNotFound(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("world {0} not found")]
    WorldNotFound(String),

    /// The destination refused without a more specific reason.
    #[error("request rejected by {server}")]
    Rejected { server: ServerName },

    #[error("random teleport failed: {0}")]
    Engine(#[source] EngineError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl From<EngineError> for TransferError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NoSafeLocationFound { .. } => TransferError::NoSafeLocationFound,
            EngineError::WorldNotFound(world) => TransferError::WorldNotFound(world),
            other => TransferError::Engine(other),
        }
    }
}

impl TransferError {
    /// The coarse reason sent back over the broker.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            TransferError::NoSafeLocationFound => FailureReason::NoSafeLocationFound,
            TransferError::TargetUserNotFound(_) => FailureReason::TargetUserNotFound,
            TransferError::PermissionDenied => FailureReason::PermissionDenied,
            TransferError::WorldNotFound(_) => FailureReason::WorldNotFound,
            _ => FailureReason::Rejected,
        }
    }

    /// Rebuild a local error from a remote failure for `request`.
    pub fn from_failure(reason: FailureReason, request: &TeleportRequest) -> Self {
        match reason {
            FailureReason::NoSafeLocationFound => TransferError::NoSafeLocationFound,
            FailureReason::TargetUserNotFound => TransferError::TargetUserNotFound(match &request.target {
                TeleportTarget::Player(name) => name.clone(),
                _ => request.user.username.clone(),
            }),
            FailureReason::PermissionDenied => TransferError::PermissionDenied,
            FailureReason::WorldNotFound => TransferError::WorldNotFound(match &request.target {
                TeleportTarget::Position(position) => position.world.clone(),
                TeleportTarget::Random { world, .. } => world.clone().unwrap_or_default(),
                TeleportTarget::Player(_) => String::new(),
            }),
            FailureReason::Rejected => TransferError::Rejected {
                server: request.destination.clone(),
            },
        }
    }
}
