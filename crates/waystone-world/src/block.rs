//! Block registry: maps compact [`BlockId`] values to the flags the safety
//! predicates read.
//!
//! Air is always ID 0 so that an unset cell in a column means empty space.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Compact block identifier (2 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u16);

impl BlockId {
    /// The empty block.
    pub const AIR: BlockId = BlockId(0);
}

/// Full descriptor for a block type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDef {
    /// Lowercase name, e.g. "stone", "water", "lava".
    pub name: String,
    /// Whether a player collides with this block.
    pub solid: bool,
    /// Whether the block is a fluid.
    pub liquid: bool,
    /// Whether standing in or on it damages the player.
    pub hazardous: bool,
}

impl BlockDef {
    /// A solid, harmless block.
    pub fn solid(name: &str) -> Self {
        Self {
            name: name.to_string(),
            solid: true,
            liquid: false,
            hazardous: false,
        }
    }

    /// A non-solid fluid.
    pub fn liquid(name: &str, hazardous: bool) -> Self {
        Self {
            name: name.to_string(),
            solid: false,
            liquid: true,
            hazardous,
        }
    }

    /// A passable block (flowers, tall grass, fire).
    pub fn passable(name: &str, hazardous: bool) -> Self {
        Self {
            name: name.to_string(),
            solid: false,
            liquid: false,
            hazardous,
        }
    }
}

/// What a world query reports for a single cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: BlockId,
    pub solid: bool,
    pub liquid: bool,
    pub hazardous: bool,
}

impl BlockInfo {
    /// The empty cell returned outside loaded terrain.
    pub const AIR: BlockInfo = BlockInfo {
        id: BlockId::AIR,
        solid: false,
        liquid: false,
        hazardous: false,
    };

    /// Air: nothing to stand on, nothing to collide with.
    pub fn is_empty(&self) -> bool {
        self.id == BlockId::AIR
    }
}

/// Errors that can occur during block registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A block with the same name has already been registered.
    #[error("duplicate block name: {0}")]
    DuplicateName(String),
    /// All 65 536 slots have been consumed.
    #[error("block registry is full (max 65536 types)")]
    RegistryFull,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps [`BlockId`] → [`BlockDef`] with O(1) lookup by index and by name.
#[derive(Clone, Debug)]
pub struct BlockRegistry {
    /// Dense array where `index == BlockId.0`.
    blocks: Vec<BlockDef>,
    name_to_id: HashMap<String, BlockId>,
}

impl BlockRegistry {
    /// Creates a registry with only air registered.
    pub fn new() -> Self {
        let mut name_to_id = HashMap::new();
        name_to_id.insert("air".to_string(), BlockId::AIR);
        Self {
            blocks: vec![BlockDef::passable("air", false)],
            name_to_id,
        }
    }

    /// A registry with the common overworld blocks used by the demo world and tests.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults = [
            BlockDef::solid("stone"),
            BlockDef::solid("dirt"),
            BlockDef::solid("grass_block"),
            BlockDef::solid("sand"),
            BlockDef::solid("bedrock"),
            BlockDef::liquid("water", false),
            BlockDef::liquid("lava", true),
            BlockDef::passable("fire", true),
            BlockDef::passable("short_grass", false),
            BlockDef::passable("sweet_berry_bush", true),
            BlockDef {
                name: "cactus".to_string(),
                solid: true,
                liquid: false,
                hazardous: true,
            },
            BlockDef {
                name: "magma_block".to_string(),
                solid: true,
                liquid: false,
                hazardous: true,
            },
        ];
        for def in defaults {
            // Names above are distinct and far below the slot limit.
            let _ = registry.register(def);
        }
        registry
    }

    /// Registers a new block and returns its assigned ID (sequential from 1).
    pub fn register(&mut self, def: BlockDef) -> Result<BlockId, RegistryError> {
        if self.name_to_id.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        if self.blocks.len() > u16::MAX as usize {
            return Err(RegistryError::RegistryFull);
        }

        let id = BlockId(self.blocks.len() as u16);
        self.name_to_id.insert(def.name.clone(), id);
        self.blocks.push(def);
        Ok(id)
    }

    /// Returns the definition for an ID, or `None` for IDs this registry never issued.
    pub fn get(&self, id: BlockId) -> Option<&BlockDef> {
        self.blocks.get(id.0 as usize)
    }

    /// Returns the ID for a named block.
    pub fn lookup_by_name(&self, name: &str) -> Option<BlockId> {
        self.name_to_id.get(name).copied()
    }

    /// Flags for a block ID. Unknown IDs are reported as solid so nothing
    /// treats them as open space.
    pub fn info(&self, id: BlockId) -> BlockInfo {
        match self.get(id) {
            Some(def) => BlockInfo {
                id,
                solid: def.solid,
                liquid: def.liquid,
                hazardous: def.hazardous,
            },
            None => BlockInfo {
                id,
                solid: true,
                liquid: false,
                hazardous: false,
            },
        }
    }

    /// Total number of registered blocks, including air.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// `true` if only air is registered.
    pub fn is_empty(&self) -> bool {
        self.blocks.len() <= 1
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
