//! Per-position safety predicates and the single-column ground search.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use waystone_config::SafetyConfig;
use waystone_world::{BlockInfo, Position, WorldInfo, WorldQuery};

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// One safety predicate. [`SafetyCheck::ORDER`] is the evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SafetyCheck {
    /// Ground and headroom inside the height range, ground not empty.
    NotVoid,
    /// Ground, feet and head are not liquid.
    NotLiquid,
    /// Feet block is not solid.
    NotInsideSolid,
    /// Enough non-solid blocks from the feet upward.
    Headroom,
    /// The column's chunk is loaded.
    ChunkLoaded,
    /// Ground, feet and head are not hazardous.
    NotHazardous,
}

impl SafetyCheck {
    pub const ORDER: [SafetyCheck; 6] = [
        SafetyCheck::NotVoid,
        SafetyCheck::NotLiquid,
        SafetyCheck::NotInsideSolid,
        SafetyCheck::Headroom,
        SafetyCheck::ChunkLoaded,
        SafetyCheck::NotHazardous,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SafetyCheck::NotVoid => "not_void",
            SafetyCheck::NotLiquid => "not_liquid",
            SafetyCheck::NotInsideSolid => "not_inside_solid",
            SafetyCheck::Headroom => "headroom",
            SafetyCheck::ChunkLoaded => "chunk_loaded",
            SafetyCheck::NotHazardous => "not_hazardous",
        }
    }
}

impl fmt::Display for SafetyCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The cells around one candidate position, read once per check.
struct Probe<'a> {
    world: &'a dyn WorldQuery,
    info: &'a WorldInfo,
    name: &'a str,
    x: i32,
    feet: i32,
    z: i32,
}

impl Probe<'_> {
    fn block(&self, y: i32) -> BlockInfo {
        self.world.block_at(self.name, self.x, y, self.z)
    }

    fn ground(&self) -> BlockInfo {
        self.block(self.feet - 1)
    }

    fn feet(&self) -> BlockInfo {
        self.block(self.feet)
    }

    fn head(&self) -> BlockInfo {
        self.block(self.feet + 1)
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Evaluates the safety predicates against a [`WorldQuery`].
///
/// Holds no mutable state; one resolver is shared by every caller.
pub struct SafetyResolver {
    world: Arc<dyn WorldQuery>,
    headroom: i32,
    allow_liquid: bool,
    unsafe_blocks: FxHashSet<String>,
}

impl SafetyResolver {
    /// Builds a resolver. A configured headroom of zero is treated as one.
    pub fn new(world: Arc<dyn WorldQuery>, config: &SafetyConfig) -> Self {
        Self {
            world,
            headroom: config.headroom.clamp(1, 64) as i32,
            allow_liquid: config.allow_liquid,
            unsafe_blocks: config
                .unsafe_blocks
                .iter()
                .map(|name| name.to_lowercase())
                .collect(),
        }
    }

    pub fn world(&self) -> &Arc<dyn WorldQuery> {
        &self.world
    }

    pub fn headroom(&self) -> i32 {
        self.headroom
    }

    /// Runs every predicate in [`SafetyCheck::ORDER`], stopping at the first failure.
    pub fn check(&self, pos: &Position) -> Result<(), SafetyCheck> {
        let Some(info) = self.world.world_info(&pos.world) else {
            return Err(SafetyCheck::NotVoid);
        };
        let probe = Probe {
            world: self.world.as_ref(),
            info: &info,
            name: &pos.world,
            x: pos.block_x(),
            feet: pos.block_y(),
            z: pos.block_z(),
        };
        for check in SafetyCheck::ORDER {
            if !self.passes(check, &probe) {
                return Err(check);
            }
        }
        Ok(())
    }

    pub fn is_safe(&self, pos: &Position) -> bool {
        self.check(pos).is_ok()
    }

    fn passes(&self, check: SafetyCheck, probe: &Probe<'_>) -> bool {
        match check {
            SafetyCheck::NotVoid => {
                probe.info.contains_y(probe.feet - 1)
                    && probe.info.contains_y(probe.feet + self.headroom - 1)
                    && !probe.ground().is_empty()
            }
            SafetyCheck::NotLiquid => {
                self.allow_liquid
                    || !(probe.ground().liquid || probe.feet().liquid || probe.head().liquid)
            }
            SafetyCheck::NotInsideSolid => !probe.feet().solid,
            SafetyCheck::Headroom => {
                (0..self.headroom).all(|dy| !probe.block(probe.feet + dy).solid)
            }
            SafetyCheck::ChunkLoaded => {
                self.world
                    .is_chunk_loaded(probe.name, probe.x, probe.z)
            }
            SafetyCheck::NotHazardous => [probe.ground(), probe.feet(), probe.head()]
                .iter()
                .all(|block| !self.is_hazardous(block)),
        }
    }

    fn is_hazardous(&self, block: &BlockInfo) -> bool {
        if block.hazardous {
            return true;
        }
        match self.world.block_name(block.id) {
            Some(name) => self.unsafe_blocks.contains(name),
            None => false,
        }
    }

    /// Nearest safe position in the start's column.
    ///
    /// A safe start is returned unchanged. Otherwise at most `search_radius`
    /// blocks are scanned, downward from the start, or upward when the start's
    /// feet block is solid. Only the feet coordinate changes.
    pub fn find_safe_ground(&self, start: &Position, search_radius: u32) -> Option<Position> {
        if self.is_safe(start) {
            return Some(start.clone());
        }

        let info = self.world.world_info(&start.world)?;
        let (x, z) = (start.block_x(), start.block_z());
        if !self.world.is_chunk_loaded(&start.world, x, z) {
            tracing::trace!(world = %start.world, x, z, "Column not loaded");
            return None;
        }

        let lowest = info.min_y + 1;
        let highest = info.max_y - self.headroom;
        if lowest > highest {
            return None;
        }

        let first = start.block_y().clamp(lowest, highest);
        let step = if self.world.block_at(&start.world, x, first, z).solid {
            1
        } else {
            -1
        };

        let radius = i32::try_from(search_radius).unwrap_or(i32::MAX);
        for offset in 0..=radius {
            let y = first + step * offset;
            if y < lowest || y > highest {
                break;
            }
            let candidate = start.at_block_y(y);
            if self.is_safe(&candidate) {
                tracing::trace!(world = %start.world, x, y, z, "Safe ground found");
                return Some(candidate);
            }
        }
        None
    }
}
