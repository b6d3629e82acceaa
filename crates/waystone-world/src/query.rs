//! The world capability consumed by the safety predicates.

use crate::block::{BlockId, BlockInfo};
use crate::position::WorldInfo;

/// Width of a chunk column in blocks.
pub const CHUNK_SIZE: i32 = 16;

/// Chunk coordinate containing block coordinate `v`.
pub fn chunk_coord(v: i32) -> i32 {
    v.div_euclid(CHUNK_SIZE)
}

/// Read-only block access for one server's worlds.
///
/// Implementations must be cheap to call per block; the safety resolver reads
/// a handful of cells per column and never scans more than one column per
/// lookup.
pub trait WorldQuery: Send + Sync {
    /// Height range and spawn, or `None` for unknown worlds.
    fn world_info(&self, world: &str) -> Option<WorldInfo>;

    /// Flags of the block at `(x, y, z)`. Outside the height range this is air.
    fn block_at(&self, world: &str, x: i32, y: i32, z: i32) -> BlockInfo;

    /// Registered name of a block ID.
    fn block_name(&self, id: BlockId) -> Option<&str>;

    /// Whether the chunk holding column `(x, z)` is loaded.
    fn is_chunk_loaded(&self, world: &str, x: i32, z: i32) -> bool;
}
