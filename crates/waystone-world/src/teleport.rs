//! Teleport requests as they travel between servers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::position::{Position, ServerName};
use crate::user::User;

/// Network-unique identifier pairing a request with its response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// A fresh random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Why a teleport is happening. Affects warmups and `/back` bookkeeping only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeleportKind {
    Normal,
    Random,
    Back,
    PlayerToPlayer,
}

/// Where the player should end up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TeleportTarget {
    /// A fixed position; its `server` field names the destination.
    Position(Position),
    /// Wherever the named player currently stands.
    Player(String),
    /// A random safe position on `server`, in `world` or that server's default world.
    Random {
        server: ServerName,
        world: Option<String>,
    },
}

/// One in-flight teleport.
///
/// The expiry travels as a relative timeout; each side converts it to its own
/// monotonic clock on receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeleportRequest {
    pub id: CorrelationId,
    pub user: User,
    pub origin: ServerName,
    pub destination: ServerName,
    pub target: TeleportTarget,
    pub kind: TeleportKind,
    pub timeout_ms: u64,
}
