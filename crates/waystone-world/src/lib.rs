//! Shared value types and external capabilities for Waystone.
//!
//! Everything here is plain data or a narrow trait: positions, users, homes,
//! warps and teleport requests travel between crates (and over the broker),
//! while [`WorldQuery`] and [`Store`] are the two collaborators the teleport
//! subsystem consumes without owning. [`MemoryWorld`] and [`MemoryStore`] are
//! in-process implementations used by tests and the demo server.

pub mod block;
pub mod memory_world;
pub mod position;
pub mod query;
pub mod store;
pub mod teleport;
pub mod user;

pub use block::{BlockDef, BlockId, BlockInfo, BlockRegistry, RegistryError};
pub use memory_world::MemoryWorld;
pub use position::{Position, ServerName, WorldInfo};
pub use query::{CHUNK_SIZE, WorldQuery, chunk_coord};
pub use store::{MemoryStore, Store, StoreError};
pub use teleport::{CorrelationId, TeleportKind, TeleportRequest, TeleportTarget};
pub use user::{
    Audience, Home, OnlineUser, SavedPositionKind, SavedUser, SessionHandle, User, Warp,
};
