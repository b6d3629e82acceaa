//! Which players are online on which peer.

use std::collections::BTreeSet;

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use waystone_world::ServerName;

/// Peer player lists plus a name → server location cache.
///
/// Each `PLAYER_LIST_SYNC` replaces the sender's list wholesale. Names in the
/// sync are removed from every other peer's list, since a player can only be
/// on one server at a time.
#[derive(Default)]
pub struct PlayerListRegistry {
    lists: DashMap<ServerName, Vec<String>>,
    /// Lowercase username → server.
    locations: DashMap<String, ServerName>,
}

impl PlayerListRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_sync(&self, server: &ServerName, players: Vec<String>) {
        let incoming: FxHashSet<String> = players.iter().map(|p| p.to_lowercase()).collect();

        for mut entry in self.lists.iter_mut() {
            if entry.key() != server {
                entry
                    .value_mut()
                    .retain(|p| !incoming.contains(&p.to_lowercase()));
            }
        }

        self.locations
            .retain(|name, location| *location != *server || incoming.contains(name));
        for name in &incoming {
            self.locations.insert(name.clone(), server.clone());
        }

        tracing::trace!(%server, count = players.len(), "Player list synced");
        self.lists.insert(server.clone(), players);
    }

    /// A player arrived on `server` between syncs.
    pub fn record_position(&self, username: &str, server: &ServerName) {
        let key = username.to_lowercase();
        for mut entry in self.lists.iter_mut() {
            if entry.key() != server {
                entry.value_mut().retain(|p| p.to_lowercase() != key);
            }
        }
        {
            let mut list = self.lists.entry(server.clone()).or_default();
            if !list.iter().any(|p| p.to_lowercase() == key) {
                list.push(username.to_string());
            }
        }
        self.locations.insert(key, server.clone());
    }

    /// The last list received from `server`, in the order it was sent.
    pub fn players_on(&self, server: &ServerName) -> Vec<String> {
        self.lists
            .get(server)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// The peer a player was last seen on. Case-insensitive.
    pub fn locate(&self, username: &str) -> Option<ServerName> {
        self.locations
            .get(&username.to_lowercase())
            .map(|server| server.clone())
    }

    /// Distinct, sorted union of every peer list and `local`.
    pub fn network_list(&self, local: &[String]) -> Vec<String> {
        let mut names: BTreeSet<String> = local.iter().cloned().collect();
        for entry in self.lists.iter() {
            names.extend(entry.value().iter().cloned());
        }
        names.into_iter().collect()
    }

    pub fn known_servers(&self) -> Vec<ServerName> {
        let mut servers: Vec<ServerName> = self.lists.iter().map(|e| e.key().clone()).collect();
        servers.sort();
        servers
    }

    /// Forget everything learned from `server`.
    pub fn remove_server(&self, server: &ServerName) {
        self.lists.remove(server);
        self.locations.retain(|_, location| *location != *server);
    }
}
