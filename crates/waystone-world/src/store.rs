//! Persistent store capability and its in-memory implementation.

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::position::Position;
use crate::user::{Home, SavedPositionKind, SavedUser, User, Warp};

/// Errors reported by a [`Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No saved data exists for the user.
    #[error("no saved data for user {0}")]
    UnknownUser(Uuid),
    /// The backing database failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Shared storage for users, homes, warps and saved positions.
///
/// Home names are unique per owner and warp names unique globally, both
/// compared case-insensitively. Saving under an existing name replaces the
/// previous entry.
pub trait Store: Send + Sync {
    /// Returns the saved user, creating it (or refreshing the username) as needed.
    fn ensure_user(&self, user: &User) -> Result<SavedUser, StoreError>;
    fn saved_user(&self, uuid: Uuid) -> Result<Option<SavedUser>, StoreError>;
    /// Applies `mutation` to the saved user and persists the result.
    fn update_user_data(
        &self,
        uuid: Uuid,
        mutation: &mut dyn FnMut(&mut SavedUser),
    ) -> Result<SavedUser, StoreError>;

    fn home(&self, owner: Uuid, name: &str) -> Result<Option<Home>, StoreError>;
    fn homes(&self, owner: Uuid) -> Result<Vec<Home>, StoreError>;
    fn public_homes(&self) -> Result<Vec<Home>, StoreError>;
    fn save_home(&self, home: Home) -> Result<(), StoreError>;
    /// Returns `true` if a home was removed.
    fn delete_home(&self, owner: Uuid, name: &str) -> Result<bool, StoreError>;

    fn warp(&self, name: &str) -> Result<Option<Warp>, StoreError>;
    fn warps(&self) -> Result<Vec<Warp>, StoreError>;
    fn save_warp(&self, warp: Warp) -> Result<(), StoreError>;
    /// Returns `true` if a warp was removed.
    fn delete_warp(&self, name: &str) -> Result<bool, StoreError>;

    fn saved_position(
        &self,
        uuid: Uuid,
        kind: SavedPositionKind,
    ) -> Result<Option<Position>, StoreError>;
    fn set_saved_position(
        &self,
        uuid: Uuid,
        kind: SavedPositionKind,
        position: Position,
    ) -> Result<(), StoreError>;
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

/// [`Store`] backed by concurrent maps. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, SavedUser>,
    homes: DashMap<(Uuid, String), Home>,
    warps: DashMap<String, Warp>,
    positions: DashMap<(Uuid, SavedPositionKind), Position>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn ensure_user(&self, user: &User) -> Result<SavedUser, StoreError> {
        let mut entry = self
            .users
            .entry(user.uuid)
            .or_insert_with(|| SavedUser::new(user.clone()));
        if entry.user.username != user.username {
            tracing::debug!(
                uuid = %user.uuid,
                old = %entry.user.username,
                new = %user.username,
                "Username changed"
            );
            entry.user.username = user.username.clone();
        }
        Ok(entry.clone())
    }

    fn saved_user(&self, uuid: Uuid) -> Result<Option<SavedUser>, StoreError> {
        Ok(self.users.get(&uuid).map(|u| u.clone()))
    }

    fn update_user_data(
        &self,
        uuid: Uuid,
        mutation: &mut dyn FnMut(&mut SavedUser),
    ) -> Result<SavedUser, StoreError> {
        let mut saved = self
            .users
            .get_mut(&uuid)
            .ok_or(StoreError::UnknownUser(uuid))?;
        mutation(saved.value_mut());
        Ok(saved.clone())
    }

    fn home(&self, owner: Uuid, name: &str) -> Result<Option<Home>, StoreError> {
        Ok(self.homes.get(&(owner, key(name))).map(|h| h.clone()))
    }

    fn homes(&self, owner: Uuid) -> Result<Vec<Home>, StoreError> {
        let mut homes: Vec<Home> = self
            .homes
            .iter()
            .filter(|entry| entry.key().0 == owner)
            .map(|entry| entry.value().clone())
            .collect();
        homes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(homes)
    }

    fn public_homes(&self) -> Result<Vec<Home>, StoreError> {
        let mut homes: Vec<Home> = self
            .homes
            .iter()
            .filter(|entry| entry.value().public)
            .map(|entry| entry.value().clone())
            .collect();
        homes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(homes)
    }

    fn save_home(&self, home: Home) -> Result<(), StoreError> {
        self.homes.insert((home.owner.uuid, key(&home.name)), home);
        Ok(())
    }

    fn delete_home(&self, owner: Uuid, name: &str) -> Result<bool, StoreError> {
        Ok(self.homes.remove(&(owner, key(name))).is_some())
    }

    fn warp(&self, name: &str) -> Result<Option<Warp>, StoreError> {
        Ok(self.warps.get(&key(name)).map(|w| w.clone()))
    }

    fn warps(&self) -> Result<Vec<Warp>, StoreError> {
        let mut warps: Vec<Warp> = self.warps.iter().map(|w| w.value().clone()).collect();
        warps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(warps)
    }

    fn save_warp(&self, warp: Warp) -> Result<(), StoreError> {
        self.warps.insert(key(&warp.name), warp);
        Ok(())
    }

    fn delete_warp(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.warps.remove(&key(name)).is_some())
    }

    fn saved_position(
        &self,
        uuid: Uuid,
        kind: SavedPositionKind,
    ) -> Result<Option<Position>, StoreError> {
        Ok(self.positions.get(&(uuid, kind)).map(|p| p.clone()))
    }

    fn set_saved_position(
        &self,
        uuid: Uuid,
        kind: SavedPositionKind,
        position: Position,
    ) -> Result<(), StoreError> {
        self.positions.insert((uuid, kind), position);
        Ok(())
    }
}
