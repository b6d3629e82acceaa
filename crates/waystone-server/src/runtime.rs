//! The async loop driving a [`Waystone`] context.

use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use waystone_net::Envelope;

use crate::context::Waystone;

/// Route inbound envelopes, sweep expired requests and broadcast the player
/// list until `shutdown` flips to `true` or its sender is dropped. Returns the
/// context after [`Waystone::shutdown`].
pub async fn run(
    mut waystone: Waystone,
    mut inbound: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) -> Waystone {
    let cross_server = &waystone.config().cross_server;
    let mut sweep = time::interval(cross_server.expiry_sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sync = time::interval(cross_server.player_list_sync_interval());
    sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            envelope = inbound.recv() => match envelope {
                Some(envelope) => {
                    waystone.route(envelope);
                }
                None => {
                    tracing::warn!("Broker inbound channel closed");
                    break;
                }
            },
            _ = sweep.tick() => {
                waystone.tick(Instant::now());
            }
            _ = sync.tick() => {
                waystone.broadcast_player_list();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Runtime shutting down");
                    break;
                }
            }
        }
    }

    waystone.tick(Instant::now());
    waystone.shutdown();
    waystone
}
