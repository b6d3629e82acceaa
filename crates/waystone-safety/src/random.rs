//! Random teleport: area-uniform column sampling with first-fit acceptance.

use std::f64::consts::TAU;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use waystone_config::RtpConfig;
use waystone_world::{Position, ServerName, WorldInfo};

use crate::error::EngineError;
use crate::resolver::SafetyResolver;

// ---------------------------------------------------------------------------
// Search state
// ---------------------------------------------------------------------------

/// Progress of one random teleport search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchState {
    Requested,
    /// `attempt` is 1-based.
    Searching { attempt: u32 },
    Found,
    Exhausted,
}

/// Tracks attempts for a single search. Owned by the call, never shared.
#[derive(Debug)]
pub struct RandomSearch {
    state: SearchState,
    max_attempts: u32,
}

impl RandomSearch {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: SearchState::Requested,
            max_attempts,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Starts the next attempt. Returns `false` once the budget is spent.
    pub fn next_attempt(&mut self) -> bool {
        let next = match self.state {
            SearchState::Requested => 1,
            SearchState::Searching { attempt } => attempt + 1,
            SearchState::Found | SearchState::Exhausted => return false,
        };
        if next > self.max_attempts {
            self.state = SearchState::Exhausted;
            false
        } else {
            self.state = SearchState::Searching { attempt: next };
            true
        }
    }

    pub fn found(&mut self) {
        self.state = SearchState::Found;
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        match self.state {
            SearchState::Requested => 0,
            SearchState::Searching { attempt } => attempt,
            SearchState::Found | SearchState::Exhausted => self.max_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Ring around a centre from which columns are drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RtpBounds {
    pub center_x: f64,
    pub center_z: f64,
    pub min_radius: f64,
    pub max_radius: f64,
}

impl RtpBounds {
    pub fn validate(&self) -> Result<(), EngineError> {
        let finite = [self.center_x, self.center_z, self.min_radius, self.max_radius]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min_radius < 0.0 || self.max_radius < self.min_radius {
            return Err(EngineError::InvalidBounds {
                min: self.min_radius,
                max: self.max_radius,
            });
        }
        Ok(())
    }
}

/// Radius with density proportional to circumference, so every unit of ring
/// area is equally likely.
pub fn sample_radius<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    if min >= max {
        return min;
    }
    rng.random_range(min * min..=max * max).sqrt()
}

/// A block column inside `bounds`.
fn sample_column<R: Rng + ?Sized>(rng: &mut R, bounds: &RtpBounds) -> (i32, i32) {
    let radius = sample_radius(rng, bounds.min_radius, bounds.max_radius);
    let angle = rng.random_range(0.0..TAU);
    let x = bounds.center_x + radius * angle.cos();
    let z = bounds.center_z + radius * angle.sin();
    (x.floor() as i32, z.floor() as i32)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Finds random safe destinations on this server.
///
/// Holds no mutable state. Every call draws from its own RNG, so concurrent
/// searches never interfere.
pub struct RandomTeleportEngine {
    resolver: Arc<SafetyResolver>,
    config: RtpConfig,
}

impl RandomTeleportEngine {
    pub fn new(resolver: Arc<SafetyResolver>, config: RtpConfig) -> Self {
        Self { resolver, config }
    }

    pub fn resolver(&self) -> &Arc<SafetyResolver> {
        &self.resolver
    }

    pub fn config(&self) -> &RtpConfig {
        &self.config
    }

    pub fn is_restricted(&self, world: &str) -> bool {
        self.config
            .restricted_worlds
            .iter()
            .any(|w| w.eq_ignore_ascii_case(world))
    }

    /// Bounds for `world`: its override if configured, otherwise the global
    /// radii. The centre falls back to the world spawn.
    pub fn bounds_for(&self, info: &WorldInfo) -> RtpBounds {
        let (center, min_radius, max_radius) = match self.config.world_overrides.get(&info.name) {
            Some(o) => (o.center, o.min_radius, o.max_radius),
            None => (
                self.config.center,
                self.config.min_radius,
                self.config.max_radius,
            ),
        };
        let (center_x, center_z) = match center {
            Some(c) => (c.x, c.z),
            None => (info.spawn_x, info.spawn_z),
        };
        RtpBounds {
            center_x,
            center_z,
            min_radius,
            max_radius,
        }
    }

    /// Random destination in `world` with the configured bounds and attempt budget.
    pub fn random_destination(
        &self,
        server: &ServerName,
        world: &str,
    ) -> Result<Position, EngineError> {
        if self.is_restricted(world) {
            return Err(EngineError::RestrictedWorld(world.to_string()));
        }
        let info = self
            .resolver
            .world()
            .world_info(world)
            .ok_or_else(|| EngineError::WorldNotFound(world.to_string()))?;
        let bounds = self.bounds_for(&info);
        self.find_destination(server, world, &bounds, self.config.max_attempts)
    }

    /// Searches with the thread RNG.
    pub fn find_destination(
        &self,
        server: &ServerName,
        world: &str,
        bounds: &RtpBounds,
        max_attempts: u32,
    ) -> Result<Position, EngineError> {
        self.find_destination_with(&mut rand::rng(), server, world, bounds, max_attempts)
    }

    /// Searches with a `ChaCha8Rng` seeded from `seed`. Identical world state
    /// and seed give the identical result.
    pub fn find_destination_seeded(
        &self,
        seed: u64,
        server: &ServerName,
        world: &str,
        bounds: &RtpBounds,
        max_attempts: u32,
    ) -> Result<Position, EngineError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.find_destination_with(&mut rng, server, world, bounds, max_attempts)
    }

    pub fn find_destination_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        server: &ServerName,
        world: &str,
        bounds: &RtpBounds,
        max_attempts: u32,
    ) -> Result<Position, EngineError> {
        bounds.validate()?;
        let info = self
            .resolver
            .world()
            .world_info(world)
            .ok_or_else(|| EngineError::WorldNotFound(world.to_string()))?;

        let top = f64::from(info.max_y - 1);
        let scan = u32::try_from(info.max_y - info.min_y).unwrap_or(0);
        let mut search = RandomSearch::new(max_attempts);

        while search.next_attempt() {
            let (x, z) = sample_column(rng, bounds);
            let start = Position::new(
                server.clone(),
                world,
                f64::from(x) + 0.5,
                top,
                f64::from(z) + 0.5,
            );
            if let Some(found) = self.resolver.find_safe_ground(&start, scan) {
                let attempt = search.attempts();
                search.found();
                let mut destination = found.centred();
                destination.yaw = rng.random_range(-180.0..180.0);
                tracing::debug!(world, x, z, attempt, "Random teleport destination found");
                return Ok(destination);
            }
            tracing::trace!(world, x, z, attempt = search.attempts(), "Column rejected");
        }

        tracing::debug!(world, attempts = max_attempts, "Random teleport search exhausted");
        Err(EngineError::NoSafeLocationFound {
            attempts: max_attempts,
        })
    }
}
