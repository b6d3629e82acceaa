//! Safe-destination resolution.
//!
//! [`SafetyResolver`] decides whether a single position is safe to stand on
//! and scans one column for the nearest safe position. [`RandomTeleportEngine`]
//! samples columns uniformly by area inside a ring and returns the first one
//! the resolver accepts.

mod error;
pub mod random;
pub mod resolver;

pub use error::EngineError;
pub use random::{RandomSearch, RandomTeleportEngine, RtpBounds, SearchState, sample_radius};
pub use resolver::{SafetyCheck, SafetyResolver};
