//! Capabilities the resolver borrows from the hosting server.

use waystone_world::{Position, TeleportKind, TeleportRequest, TeleportTarget, User};

/// Permission checks. Command-level permissions live outside this crate; the
/// resolver only asks yes/no questions at the two points of a transaction.
pub trait AccessPolicy: Send + Sync {
    /// Origin side: may `user` start this teleport?
    fn may_teleport(&self, user: &User, target: &TeleportTarget, kind: TeleportKind) -> bool;

    /// Destination side: may this incoming request be honoured?
    fn may_receive(&self, request: &TeleportRequest) -> bool {
        let _ = request;
        true
    }
}

/// Permits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn may_teleport(&self, _user: &User, _target: &TeleportTarget, _kind: TeleportKind) -> bool {
        true
    }
}

/// Players online on this server.
pub trait LocalPlayers: Send + Sync {
    /// The online player called `name` and where they stand.
    fn find(&self, name: &str) -> Option<(User, Position)>;

    /// Usernames of online players, optionally including vanished ones.
    fn usernames(&self, include_vanished: bool) -> Vec<String>;
}
