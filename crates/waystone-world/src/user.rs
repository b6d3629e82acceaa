//! Users, online sessions and saved locations.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::position::{Position, ServerName};

/// Stable player identity. The UUID never changes; the name may on login.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    pub username: String,
}

impl User {
    pub fn new(uuid: Uuid, username: impl Into<String>) -> Self {
        Self {
            uuid,
            username: username.into(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// Opaque handle to the live connection of an online player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub u64);

/// Message sink for a player.
pub trait Audience: Send + Sync {
    fn send_message(&self, message: &str);
}

/// A [`User`] connected to this process.
#[derive(Clone)]
pub struct OnlineUser {
    pub user: User,
    pub session: SessionHandle,
    pub vanished: bool,
    pub audience: Arc<dyn Audience>,
}

impl OnlineUser {
    pub fn username(&self) -> &str {
        &self.user.username
    }

    pub fn uuid(&self) -> Uuid {
        self.user.uuid
    }
}

impl fmt::Debug for OnlineUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnlineUser")
            .field("user", &self.user)
            .field("session", &self.session)
            .field("vanished", &self.vanished)
            .finish_non_exhaustive()
    }
}

/// A named position owned by a player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Home {
    pub uuid: Uuid,
    pub owner: User,
    pub name: String,
    pub description: String,
    pub position: Position,
    pub public: bool,
}

impl Home {
    pub fn new(owner: User, name: impl Into<String>, position: Position) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            owner,
            name: name.into(),
            description: String::new(),
            position,
            public: false,
        }
    }
}

/// A named position shared by every player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Warp {
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub position: Position,
}

impl Warp {
    pub fn new(name: impl Into<String>, position: Position) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            position,
        }
    }
}

/// Persistent per-player data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedUser {
    pub user: User,
    /// Per-player home limit overriding the configured maximum.
    pub home_slots: Option<u32>,
    /// Refuse incoming player-to-player requests.
    pub ignoring_requests: bool,
    /// Server the player was last seen on.
    pub last_server: Option<ServerName>,
}

impl SavedUser {
    pub fn new(user: User) -> Self {
        Self {
            user,
            home_slots: None,
            ignoring_requests: false,
            last_server: None,
        }
    }
}

/// Which saved position a lookup refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SavedPositionKind {
    /// Where the player was before their last teleport (`/back`).
    Last,
    /// Where the player logged out.
    Offline,
    /// Bed or anchor respawn point.
    Respawn,
}
