//! Configuration structs with sensible defaults and RON persistence.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Identity of this process and its network peers.
    pub server: ServerConfig,
    /// Cross-server teleport coordination.
    pub cross_server: CrossServerConfig,
    /// Random teleport bounds.
    pub rtp: RtpConfig,
    /// Safe-destination predicates.
    pub safety: SafetyConfig,
    /// Gameplay timings.
    pub general: GeneralConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Identity of this server process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Logical server name, unique across the network.
    pub name: String,
    /// Address the broker listens on.
    pub bind_address: String,
    /// Broker port.
    pub port: u16,
    /// World used when a request does not name one.
    pub default_world: String,
    /// Other servers sharing the same store.
    pub peers: Vec<PeerConfig>,
}

/// A peer server reachable through the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    /// The peer's logical server name.
    pub name: String,
    /// `host:port` of the peer's broker listener.
    pub address: String,
}

/// Cross-server coordination settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrossServerConfig {
    /// Whether requests may leave this server at all.
    pub enabled: bool,
    /// How long an origin waits for a `TELEPORT_RESPONSE`.
    pub request_timeout_ms: u64,
    /// How long a destination holds a reserved arrival for an incoming player.
    pub arrival_timeout_ms: u64,
    /// Interval between `PLAYER_LIST_SYNC` broadcasts.
    pub player_list_sync_secs: u64,
    /// Interval between sweeps of the pending-request table.
    pub expiry_sweep_ms: u64,
    /// Largest broker frame accepted, in bytes.
    pub max_frame_bytes: u32,
    /// Network-wide spawn stored as a warp.
    pub global_spawn: GlobalSpawnConfig,
}

/// Network-wide spawn settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalSpawnConfig {
    /// Use the named warp as spawn on every server.
    pub enabled: bool,
    /// Name of the warp holding the spawn position.
    pub warp_name: String,
}

/// Random teleport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RtpConfig {
    /// Inner radius of the sampling ring, in blocks.
    pub min_radius: f64,
    /// Outer radius of the sampling ring, in blocks.
    pub max_radius: f64,
    /// Sampling centre. `None` means the world spawn.
    pub center: Option<RtpCenter>,
    /// Columns tried before giving up.
    pub max_attempts: u32,
    /// Worlds in which random teleport is refused.
    pub restricted_worlds: Vec<String>,
    /// Per-world centre and radius overrides, keyed by world name.
    pub world_overrides: HashMap<String, RtpWorldOverride>,
}

/// A fixed sampling centre.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RtpCenter {
    /// Block X coordinate.
    pub x: f64,
    /// Block Z coordinate.
    pub z: f64,
}

/// Random teleport bounds for a single world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RtpWorldOverride {
    /// Sampling centre, or the world spawn when absent.
    pub center: Option<RtpCenter>,
    /// Inner radius in blocks.
    pub min_radius: f64,
    /// Outer radius in blocks.
    pub max_radius: f64,
}

/// Safety predicate settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Non-solid blocks required from the feet upward.
    pub headroom: u32,
    /// Accept positions in or on top of liquids.
    pub allow_liquid: bool,
    /// Block names that are never safe to stand in or on.
    pub unsafe_blocks: Vec<String>,
    /// Column search distance when validating a home or warp placement.
    pub placement_search_radius: u32,
}

/// Gameplay timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Seconds a player must stand still before a teleport fires.
    pub teleport_warmup_secs: u32,
    /// Seconds of damage immunity after landing.
    pub invulnerability_secs: u32,
    /// Maximum homes per player.
    pub max_homes: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Write JSON logs next to the config directory.
    pub log_to_file: bool,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "server".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 7878,
            default_world: "world".to_string(),
            peers: Vec::new(),
        }
    }
}

impl Default for CrossServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            request_timeout_ms: 5_000,
            arrival_timeout_ms: 30_000,
            player_list_sync_secs: 5,
            expiry_sweep_ms: 250,
            max_frame_bytes: 65_536,
            global_spawn: GlobalSpawnConfig::default(),
        }
    }
}

impl Default for GlobalSpawnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            warp_name: "spawn".to_string(),
        }
    }
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            min_radius: 500.0,
            max_radius: 5_000.0,
            center: None,
            max_attempts: 12,
            restricted_worlds: vec!["world_nether".to_string(), "world_the_end".to_string()],
            world_overrides: HashMap::new(),
        }
    }
}

impl Default for RtpWorldOverride {
    fn default() -> Self {
        Self {
            center: None,
            min_radius: 500.0,
            max_radius: 5_000.0,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            headroom: 2,
            allow_liquid: false,
            unsafe_blocks: [
                "lava",
                "fire",
                "soul_fire",
                "magma_block",
                "cactus",
                "campfire",
                "soul_campfire",
                "sweet_berry_bush",
                "powder_snow",
                "wither_rose",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            placement_search_radius: 16,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            teleport_warmup_secs: 5,
            invulnerability_secs: 3,
            max_homes: 10,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

impl CrossServerConfig {
    /// Pending-request expiry as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Arrival reservation lifetime as a [`Duration`].
    pub fn arrival_timeout(&self) -> Duration {
        Duration::from_millis(self.arrival_timeout_ms)
    }

    /// Player list broadcast interval, never shorter than one second.
    pub fn player_list_sync_interval(&self) -> Duration {
        Duration::from_secs(self.player_list_sync_secs.max(1))
    }

    /// Expiry sweep interval, never shorter than ten milliseconds.
    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_ms.max(10))
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(4)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Whether requests can travel to other servers.
    pub fn is_networked(&self) -> bool {
        self.cross_server.enabled && !self.server.peers.is_empty()
    }
}
