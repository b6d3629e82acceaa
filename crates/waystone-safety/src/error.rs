//! Random teleport error types.

use thiserror::Error;

/// Reasons the random teleport engine produced no destination.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Every sampled column failed the safety predicates.
    #[error("no safe location found after {attempts} attempts")]
    NoSafeLocationFound { attempts: u32 },

    /// The sampling ring is empty or not finite.
    #[error("invalid random teleport bounds: min radius {min}, max radius {max}")]
    InvalidBounds { min: f64, max: f64 },

    /// The world is not loaded on this server.
    #[error("world not found: {0}")]
    WorldNotFound(String),

    /// Random teleport is disabled in this world.
    #[error("random teleport is not allowed in world {0}")]
    RestrictedWorld(String),
}
