//! Positions, server identity and world metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical name of one server process. Unique across the network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerName(pub String);

impl ServerName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A point in a named world on a named server.
///
/// `y` is the feet coordinate: the player occupies block `floor(y)` and
/// stands on block `floor(y) - 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub world: String,
    pub server: ServerName,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Position {
    pub fn new(server: ServerName, world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            server,
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn block_x(&self) -> i32 {
        self.x.floor() as i32
    }

    /// Block the player's feet occupy.
    pub fn block_y(&self) -> i32 {
        self.y.floor() as i32
    }

    pub fn block_z(&self) -> i32 {
        self.z.floor() as i32
    }

    /// Same column, feet moved to block `y`.
    pub fn at_block_y(&self, y: i32) -> Self {
        Self {
            y: f64::from(y),
            ..self.clone()
        }
    }

    /// Same block, x and z moved to the block centre.
    pub fn centred(&self) -> Self {
        Self {
            x: f64::from(self.block_x()) + 0.5,
            z: f64::from(self.block_z()) + 0.5,
            ..self.clone()
        }
    }

    /// Whether this position lives on `server`.
    pub fn is_on(&self, server: &ServerName) -> bool {
        &self.server == server
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({:.1}, {:.1}, {:.1})",
            self.server, self.world, self.x, self.y, self.z
        )
    }
}

/// Height range and spawn of a loaded world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldInfo {
    pub name: String,
    /// Lowest valid block Y (inclusive).
    pub min_y: i32,
    /// Upper build limit (exclusive).
    pub max_y: i32,
    pub spawn_x: f64,
    pub spawn_y: f64,
    pub spawn_z: f64,
}

impl WorldInfo {
    pub fn contains_y(&self, y: i32) -> bool {
        y >= self.min_y && y < self.max_y
    }

    /// The world spawn as a position on `server`.
    pub fn spawn(&self, server: &ServerName) -> Position {
        Position::new(
            server.clone(),
            self.name.clone(),
            self.spawn_x,
            self.spawn_y,
            self.spawn_z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: f64, y: f64, z: f64) -> Position {
        Position::new(ServerName::from("a"), "world", x, y, z)
    }

    #[test]
    fn test_block_coords_floor_negatives() {
        let p = pos(-0.5, 64.9, -16.01);
        assert_eq!(p.block_x(), -1);
        assert_eq!(p.block_y(), 64);
        assert_eq!(p.block_z(), -17);
    }

    #[test]
    fn test_centred() {
        let p = pos(10.2, 70.0, -3.7).centred();
        assert_eq!(p.x, 10.5);
        assert_eq!(p.z, -3.5);
        assert_eq!(p.y, 70.0);
    }

    #[test]
    fn test_at_block_y_keeps_column() {
        let p = pos(1.5, 100.0, 2.5).at_block_y(65);
        assert_eq!((p.x, p.y, p.z), (1.5, 65.0, 2.5));
    }

    #[test]
    fn test_world_info_range() {
        let info = WorldInfo {
            name: "world".to_string(),
            min_y: 0,
            max_y: 320,
            spawn_x: 0.0,
            spawn_y: 65.0,
            spawn_z: 0.0,
        };
        assert!(info.contains_y(0));
        assert!(info.contains_y(319));
        assert!(!info.contains_y(320));
        assert!(!info.contains_y(-1));
        assert_eq!(info.spawn(&ServerName::from("hub")).server.as_str(), "hub");
    }
}
