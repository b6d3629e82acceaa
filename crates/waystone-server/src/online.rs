//! Players connected to this process.

use dashmap::DashMap;
use uuid::Uuid;
use waystone_transfer::LocalPlayers;
use waystone_world::{OnlineUser, Position, User};

struct Session {
    online: OnlineUser,
    position: Position,
}

/// Online users keyed by UUID, each with their last known position.
#[derive(Default)]
pub struct OnlineUsers {
    sessions: DashMap<Uuid, Session>,
}

impl OnlineUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly connected user. Replaces a stale session for the same UUID.
    pub fn add(&self, online: OnlineUser, position: Position) {
        self.sessions
            .insert(online.uuid(), Session { online, position });
    }

    pub fn remove(&self, uuid: Uuid) -> Option<(OnlineUser, Position)> {
        self.sessions
            .remove(&uuid)
            .map(|(_, session)| (session.online, session.position))
    }

    pub fn get(&self, uuid: Uuid) -> Option<OnlineUser> {
        self.sessions.get(&uuid).map(|s| s.online.clone())
    }

    pub fn position(&self, uuid: Uuid) -> Option<Position> {
        self.sessions.get(&uuid).map(|s| s.position.clone())
    }

    /// Returns `false` if the user is not online.
    pub fn set_position(&self, uuid: Uuid, position: Position) -> bool {
        match self.sessions.get_mut(&uuid) {
            Some(mut session) => {
                session.position = position;
                true
            }
            None => false,
        }
    }

    pub fn set_vanished(&self, uuid: Uuid, vanished: bool) -> bool {
        match self.sessions.get_mut(&uuid) {
            Some(mut session) => {
                session.online.vanished = vanished;
                true
            }
            None => false,
        }
    }

    /// Case-insensitive lookup: an exact name match wins, otherwise the
    /// alphabetically first name starting with `name`.
    pub fn find_by_name(&self, name: &str) -> Option<OnlineUser> {
        let wanted = name.to_lowercase();
        if wanted.is_empty() {
            return None;
        }

        let mut prefix: Option<OnlineUser> = None;
        for session in self.sessions.iter() {
            let candidate = session.online.username().to_lowercase();
            if candidate == wanted {
                return Some(session.online.clone());
            }
            if candidate.starts_with(&wanted)
                && prefix
                    .as_ref()
                    .is_none_or(|best| candidate < best.username().to_lowercase())
            {
                prefix = Some(session.online.clone());
            }
        }
        prefix
    }

    pub fn users(&self) -> Vec<User> {
        self.sessions.iter().map(|s| s.online.user.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl LocalPlayers for OnlineUsers {
    fn find(&self, name: &str) -> Option<(User, Position)> {
        let online = self.find_by_name(name)?;
        let position = self.position(online.uuid())?;
        Some((online.user, position))
    }

    fn usernames(&self, include_vanished: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| include_vanished || !s.online.vanished)
            .map(|s| s.online.username().to_string())
            .collect();
        names.sort();
        names
    }
}
