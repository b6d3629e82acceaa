//! In-memory [`WorldQuery`] implementation.
//!
//! Each world is a stack of horizontal layers shared by every column plus a
//! sparse table of per-block overrides. Chunks are loaded explicitly so tests
//! can exercise the unloaded-chunk path.

use dashmap::{DashMap, DashSet};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::block::{BlockId, BlockInfo, BlockRegistry};
use crate::position::WorldInfo;
use crate::query::{WorldQuery, chunk_coord};

/// A horizontal band `[from_y, to_y)` filled with one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Layer {
    from_y: i32,
    to_y: i32,
    block: BlockId,
}

struct WorldData {
    info: WorldInfo,
    /// Later layers win where they overlap earlier ones.
    layers: Vec<Layer>,
    overrides: DashMap<(i32, i32, i32), BlockId>,
    loaded: DashSet<(i32, i32)>,
    all_loaded: AtomicBool,
}

impl WorldData {
    fn base_block(&self, y: i32) -> BlockId {
        self.layers
            .iter()
            .rev()
            .find(|layer| y >= layer.from_y && y < layer.to_y)
            .map(|layer| layer.block)
            .unwrap_or(BlockId::AIR)
    }
}

/// Layered column store with explicit chunk loading.
pub struct MemoryWorld {
    registry: BlockRegistry,
    worlds: FxHashMap<String, WorldData>,
}

impl MemoryWorld {
    /// Creates an empty store over `registry`.
    pub fn new(registry: BlockRegistry) -> Self {
        Self {
            registry,
            worlds: FxHashMap::default(),
        }
    }

    /// A single flat world: bedrock at `min_y`, stone up to `ground_y`, grass
    /// on top, all chunks loaded, spawn standing on the grass at the origin.
    pub fn flat(name: &str, min_y: i32, max_y: i32, ground_y: i32) -> Self {
        let mut world = Self::new(BlockRegistry::with_defaults());
        world.add_world(WorldInfo {
            name: name.to_string(),
            min_y,
            max_y,
            spawn_x: 0.5,
            spawn_y: f64::from(ground_y + 1),
            spawn_z: 0.5,
        });
        let bedrock = world.block_id("bedrock").unwrap_or(BlockId::AIR);
        let stone = world.block_id("stone").unwrap_or(BlockId::AIR);
        let grass = world.block_id("grass_block").unwrap_or(BlockId::AIR);
        world.fill(name, min_y, min_y + 1, bedrock);
        world.fill(name, min_y + 1, ground_y, stone);
        world.fill(name, ground_y, ground_y + 1, grass);
        world.load_everything(name);
        world
    }

    /// Registers an empty (all air, nothing loaded) world. Replaces any world
    /// of the same name.
    pub fn add_world(&mut self, info: WorldInfo) {
        let name = info.name.clone();
        self.worlds.insert(
            name,
            WorldData {
                info,
                layers: Vec::new(),
                overrides: DashMap::new(),
                loaded: DashSet::new(),
                all_loaded: AtomicBool::new(false),
            },
        );
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn block_id(&self, name: &str) -> Option<BlockId> {
        self.registry.lookup_by_name(name)
    }

    /// Fills `[from_y, to_y)` of every column with `block`.
    pub fn fill(&mut self, world: &str, from_y: i32, to_y: i32, block: BlockId) {
        if let Some(data) = self.worlds.get_mut(world) {
            data.layers.push(Layer {
                from_y,
                to_y,
                block,
            });
        }
    }

    /// Overrides a single block.
    pub fn set_block(&self, world: &str, x: i32, y: i32, z: i32, block: BlockId) {
        if let Some(data) = self.worlds.get(world) {
            data.overrides.insert((x, y, z), block);
        }
    }

    /// Marks chunk `(cx, cz)` as loaded.
    pub fn load_chunk(&self, world: &str, cx: i32, cz: i32) {
        if let Some(data) = self.worlds.get(world) {
            data.loaded.insert((cx, cz));
        }
    }

    /// Unloads chunk `(cx, cz)`. Also cancels [`MemoryWorld::load_everything`].
    pub fn unload_chunk(&self, world: &str, cx: i32, cz: i32) {
        if let Some(data) = self.worlds.get(world) {
            data.all_loaded.store(false, Ordering::Relaxed);
            data.loaded.remove(&(cx, cz));
        }
    }

    /// Treats every chunk of `world` as loaded.
    pub fn load_everything(&self, world: &str) {
        if let Some(data) = self.worlds.get(world) {
            data.all_loaded.store(true, Ordering::Relaxed);
        }
    }

    pub fn world_names(&self) -> impl Iterator<Item = &str> {
        self.worlds.keys().map(String::as_str)
    }
}

impl WorldQuery for MemoryWorld {
    fn world_info(&self, world: &str) -> Option<WorldInfo> {
        self.worlds.get(world).map(|data| data.info.clone())
    }

    fn block_at(&self, world: &str, x: i32, y: i32, z: i32) -> BlockInfo {
        let Some(data) = self.worlds.get(world) else {
            return BlockInfo::AIR;
        };
        if !data.info.contains_y(y) {
            return BlockInfo::AIR;
        }
        let id = match data.overrides.get(&(x, y, z)) {
            Some(id) => *id,
            None => data.base_block(y),
        };
        self.registry.info(id)
    }

    fn block_name(&self, id: BlockId) -> Option<&str> {
        self.registry.get(id).map(|def| def.name.as_str())
    }

    fn is_chunk_loaded(&self, world: &str, x: i32, z: i32) -> bool {
        match self.worlds.get(world) {
            Some(data) => {
                data.all_loaded.load(Ordering::Relaxed)
                    || data.loaded.contains(&(chunk_coord(x), chunk_coord(z)))
            }
            None => false,
        }
    }
}
