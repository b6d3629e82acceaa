//! Waystone server binary.
//!
//! Loads `config.ron` (CLI flags override it), binds the TCP broker, connects
//! to the configured peers and runs the coordination loop until Ctrl-C. The
//! demo build serves a flat in-memory world backed by an in-memory store.
//!
//! Run two servers on one host with
//! `waystone --name a --port 7878 --peer b=127.0.0.1:7879` and
//! `waystone --name b --port 7879 --peer a=127.0.0.1:7878`.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use waystone_config::{CliArgs, Config};
use waystone_net::{TcpBroker, TcpBrokerConfig};
use waystone_server::Waystone;
use waystone_world::{MemoryStore, MemoryWorld, ServerName, WorldQuery};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let Some(config_dir) = args
        .config
        .clone()
        .or_else(|| dirs::config_dir().map(|dir| dir.join("waystone")))
    else {
        eprintln!("Failed to resolve config directory, pass --config");
        return ExitCode::FAILURE;
    };

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    if let Err(e) = config.apply_cli_overrides(&args) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let log_dir = config_dir.join("logs");
    waystone_log::init_logging(
        Some(&log_dir),
        config.debug.log_to_file || cfg!(debug_assertions),
        Some(&config),
    );

    let server = ServerName::new(config.server.name.clone());
    let bind = format!("{}:{}", config.server.bind_address, config.server.port);
    let broker_config = TcpBrokerConfig {
        frame: waystone_net::FrameConfig {
            max_payload_size: config.cross_server.max_frame_bytes,
        },
        ..Default::default()
    };
    let (broker, inbound) = match TcpBroker::bind(server.clone(), &bind, broker_config).await {
        Ok(bound) => bound,
        Err(e) => {
            tracing::error!("Failed to bind broker on {bind}: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%server, "Broker listening on {}", broker.local_addr());

    if config.cross_server.enabled {
        for peer in &config.server.peers {
            broker.add_peer(ServerName::new(peer.name.clone()), peer.address.clone());
        }
    }

    let world: Arc<dyn WorldQuery> = Arc::new(MemoryWorld::flat(
        &config.server.default_world,
        -64,
        320,
        64,
    ));
    let mut waystone = Waystone::new(
        config,
        Arc::new(MemoryStore::new()),
        world,
        broker.clone(),
    );
    if let Err(e) = waystone.start() {
        tracing::error!("Startup failed: {e}");
        return ExitCode::FAILURE;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runtime = tokio::spawn(waystone_server::run(waystone, inbound, shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received"),
        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {e}"),
    }
    let _ = shutdown_tx.send(true);
    if let Err(e) = runtime.await {
        tracing::error!("Runtime task failed: {e}");
    }
    broker.shutdown();
    ExitCode::SUCCESS
}
