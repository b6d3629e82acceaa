//! Configuration system for Waystone.
//!
//! Settings persist to disk as a RON file. Every section carries sensible
//! defaults so a partial file (or none at all) still yields a working server.
//! CLI overrides are applied on top via clap.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, CrossServerConfig, DebugConfig, GeneralConfig, GlobalSpawnConfig, PeerConfig,
    RtpCenter, RtpConfig, RtpWorldOverride, SafetyConfig, ServerConfig,
};
pub use error::ConfigError;
