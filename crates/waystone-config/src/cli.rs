//! Command-line argument parsing for the Waystone server.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, ConfigError, PeerConfig};

/// Waystone server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "waystone", about = "Cross-server teleport coordinator")]
pub struct CliArgs {
    /// Logical server name.
    #[arg(long)]
    pub name: Option<String>,

    /// Broker bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Broker port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Additional peer, as `name=host:port`. Repeatable. Enables cross-server mode.
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_peer(raw: &str) -> Result<PeerConfig, ConfigError> {
    let (name, address) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidPeer(raw.to_string()))?;
    let name = name.trim();
    let address = address.trim();
    if name.is_empty() || !address.contains(':') {
        return Err(ConfigError::InvalidPeer(raw.to_string()));
    }
    Ok(PeerConfig {
        name: name.to_string(),
        address: address.to_string(),
    })
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    ///
    /// A peer given on the command line replaces a configured peer of the
    /// same name.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) -> Result<(), ConfigError> {
        if let Some(ref name) = args.name {
            self.server.name = name.clone();
        }
        if let Some(ref bind) = args.bind {
            self.server.bind_address = bind.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        for raw in &args.peers {
            let peer = parse_peer(raw)?;
            self.server.peers.retain(|p| p.name != peer.name);
            self.server.peers.push(peer);
            self.cross_server.enabled = true;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        Ok(())
    }
}
