//! Per-player request preferences.

use std::sync::Arc;

use waystone_transfer::AccessPolicy;
use waystone_world::{Store, TeleportKind, TeleportRequest, TeleportTarget, User};

use crate::online::OnlineUsers;

/// Honours each player's "ignore teleport requests" setting. A player who
/// ignores requests cannot be teleported to, from this server or any peer.
pub struct PlayerPreferences {
    store: Arc<dyn Store>,
    online: Arc<OnlineUsers>,
}

impl PlayerPreferences {
    pub fn new(store: Arc<dyn Store>, online: Arc<OnlineUsers>) -> Self {
        Self { store, online }
    }

    fn accepts_visitors(&self, name: &str) -> bool {
        let Some(target) = self.online.find_by_name(name) else {
            return true;
        };
        match self.store.saved_user(target.uuid()) {
            Ok(Some(saved)) => !saved.ignoring_requests,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(user = %target.user, "Failed to read request preference: {e}");
                false
            }
        }
    }
}

impl AccessPolicy for PlayerPreferences {
    fn may_teleport(&self, _user: &User, target: &TeleportTarget, _kind: TeleportKind) -> bool {
        match target {
            TeleportTarget::Player(name) => self.accepts_visitors(name),
            _ => true,
        }
    }

    fn may_receive(&self, request: &TeleportRequest) -> bool {
        match &request.target {
            TeleportTarget::Player(name) => self.accepts_visitors(name),
            _ => true,
        }
    }
}
