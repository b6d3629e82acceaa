//! TCP transport: one listener for inbound envelopes, one outbound task per peer.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use waystone_world::ServerName;

use crate::broker::{Broker, BrokerError};
use crate::framing::{FrameConfig, FrameError, read_envelope, write_frame};
use crate::messages::{Envelope, Recipient, serialize_envelope};
use crate::reconnection::{ReconnectConfig, ReconnectState};

/// Settings for [`TcpBroker`].
#[derive(Debug, Clone)]
pub struct TcpBrokerConfig {
    pub frame: FrameConfig,
    /// Encoded envelopes buffered per peer while it is unreachable.
    pub outbound_queue: usize,
    /// Envelopes buffered for the consumer of the inbound channel.
    pub inbound_queue: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for TcpBrokerConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            outbound_queue: 256,
            inbound_queue: 1024,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Broker speaking length-prefixed postcard frames over TCP.
pub struct TcpBroker {
    server: ServerName,
    local_addr: SocketAddr,
    config: TcpBrokerConfig,
    peers: DashMap<ServerName, mpsc::Sender<Vec<u8>>>,
    inbound: mpsc::Sender<Envelope>,
    shutdown_tx: watch::Sender<bool>,
}

impl TcpBroker {
    /// Bind the listener and start accepting peer connections.
    ///
    /// Envelopes addressed to `server` arrive on the returned receiver.
    pub async fn bind(
        server: ServerName,
        addr: &str,
        config: TcpBrokerConfig,
    ) -> std::io::Result<(Arc<Self>, mpsc::Receiver<Envelope>)> {
        let listener = TcpListener::bind(addr).await?;
        Self::with_listener(server, listener, config)
    }

    /// Start with a pre-bound listener (useful for tests).
    pub fn with_listener(
        server: ServerName,
        listener: TcpListener,
        config: TcpBrokerConfig,
    ) -> std::io::Result<(Arc<Self>, mpsc::Receiver<Envelope>)> {
        let local_addr = listener.local_addr()?;
        let (inbound, inbound_rx) = mpsc::channel(config.inbound_queue.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let broker = Arc::new(Self {
            server,
            local_addr,
            config,
            peers: DashMap::new(),
            inbound,
            shutdown_tx,
        });
        tracing::info!(server = %broker.server, "Broker listening on {local_addr}");

        tokio::spawn(Self::accept_loop(
            broker.server.clone(),
            listener,
            broker.inbound.clone(),
            broker.config.frame.clone(),
            broker.shutdown_tx.subscribe(),
        ));
        Ok((broker, inbound_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a peer and start its outbound connection task. Re-adding a
    /// peer replaces its address; envelopes queued for the old task are lost.
    pub fn add_peer(&self, name: ServerName, address: String) {
        let (tx, rx) = mpsc::channel(self.config.outbound_queue.max(1));
        self.peers.insert(name.clone(), tx);
        tokio::spawn(Self::peer_loop(
            name,
            address,
            rx,
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        ));
    }

    /// Forget a peer. Its outbound task stops once the queue is dropped.
    pub fn remove_peer(&self, name: &ServerName) {
        self.peers.remove(name);
    }

    /// Stop accepting, close every connection and stop all peer tasks.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn accept_loop(
        server: ServerName,
        listener: TcpListener,
        inbound: mpsc::Sender<Envelope>,
        frame: FrameConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("set_nodelay failed for {peer_addr}: {e}");
                    }
                    tracing::debug!(%server, "Accepted peer connection from {peer_addr}");
                    tokio::spawn(Self::read_loop(
                        server.clone(),
                        stream,
                        peer_addr,
                        inbound.clone(),
                        frame.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!(%server, "Broker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn read_loop(
        server: ServerName,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        inbound: mpsc::Sender<Envelope>,
        frame: FrameConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                result = read_envelope(&mut stream, &frame) => {
                    match result {
                        Ok(envelope) => {
                            if !envelope.is_for(&server) {
                                tracing::trace!(%server, "Ignoring envelope for {:?}", envelope.recipient);
                                continue;
                            }
                            if inbound.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(FrameError::Message(e)) => {
                            tracing::warn!("Dropping malformed envelope from {peer_addr}: {e}");
                        }
                        Err(FrameError::ConnectionClosed) => break,
                        Err(e) => {
                            tracing::warn!("Connection from {peer_addr} failed: {e}");
                            break;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        let _ = stream.shutdown().await;
        tracing::debug!(%server, "Peer connection from {peer_addr} closed");
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Connect with backoff. Returns `None` on shutdown.
    async fn connect(
        name: &ServerName,
        address: &str,
        state: &mut ReconnectState,
        rx: &mut mpsc::Receiver<Vec<u8>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<TcpStream> {
        loop {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    if state.attempts() > 0 {
                        tracing::info!(peer = %name, "Reconnected after {} attempts", state.attempts());
                    }
                    state.reset();
                    let _ = stream.set_nodelay(true);
                    return Some(stream);
                }
                Err(e) => {
                    let delay = match state.next_delay() {
                        Some(delay) => delay,
                        None => {
                            let mut dropped = 0usize;
                            while rx.try_recv().is_ok() {
                                dropped += 1;
                            }
                            tracing::warn!(peer = %name, dropped, "Peer unreachable, discarding queued envelopes");
                            state.reset();
                            state.next_delay().unwrap_or_default()
                        }
                    };
                    tracing::debug!(peer = %name, "Connect to {address} failed: {e}, retrying in {delay:?}");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn peer_loop(
        name: ServerName,
        address: String,
        mut rx: mpsc::Receiver<Vec<u8>>,
        config: TcpBrokerConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut state = ReconnectState::new(config.reconnect.clone());
        'connection: loop {
            let Some(mut stream) =
                Self::connect(&name, &address, &mut state, &mut rx, &mut shutdown_rx).await
            else {
                return;
            };
            tracing::debug!(peer = %name, "Connected to {address}");

            loop {
                tokio::select! {
                    next = rx.recv() => {
                        let Some(bytes) = next else {
                            tracing::debug!(peer = %name, "Peer removed");
                            return;
                        };
                        if let Err(e) = write_frame(&mut stream, &bytes, &config.frame).await {
                            tracing::warn!(peer = %name, "Write failed, reconnecting: {e}");
                            continue 'connection;
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            let _ = stream.shutdown().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn enqueue(&self, peer: &ServerName, bytes: Vec<u8>) -> Result<(), BrokerError> {
        let queue = self
            .peers
            .get(peer)
            .ok_or_else(|| BrokerError::PeerUnavailable(peer.clone()))?;
        queue.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BrokerError::QueueFull(peer.clone()),
            mpsc::error::TrySendError::Closed(_) => BrokerError::PeerUnavailable(peer.clone()),
        })
    }
}

impl Broker for TcpBroker {
    fn local_server(&self) -> &ServerName {
        &self.server
    }

    fn send(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let bytes = serialize_envelope(&envelope)?;
        let max = self.config.frame.max_payload_size;
        if bytes.len() > max as usize {
            return Err(BrokerError::TooLarge {
                size: bytes.len(),
                max,
            });
        }
        match &envelope.recipient {
            Recipient::Server(target) => self.enqueue(target, bytes),
            Recipient::All => {
                for peer in self.peers() {
                    if let Err(e) = self.enqueue(&peer, bytes.clone()) {
                        tracing::debug!(%peer, "Broadcast not queued: {e}");
                    }
                }
                Ok(())
            }
        }
    }

    fn peers(&self) -> Vec<ServerName> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Payload, PlayerListSync};
    use std::time::Duration;

    fn name(s: &str) -> ServerName {
        ServerName::from(s)
    }

    fn fast_config() -> TcpBrokerConfig {
        TcpBrokerConfig {
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(20),
                cap: Duration::from_millis(100),
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn start(server: &str) -> (Arc<TcpBroker>, mpsc::Receiver<Envelope>) {
        TcpBroker::bind(name(server), "127.0.0.1:0", fast_config())
            .await
            .unwrap()
    }

    async fn recv(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("inbound channel closed")
    }

    #[tokio::test]
    async fn test_unicast_between_brokers() {
        let (a, _a_rx) = start("a").await;
        let (b, mut b_rx) = start("b").await;
        a.add_peer(name("b"), b.local_addr().to_string());

        let envelope = Envelope::new(
            name("a"),
            Recipient::Server(name("b")),
            Payload::PlayerListRequest,
        );
        a.send(envelope.clone()).unwrap();
        assert_eq!(recv(&mut b_rx).await, envelope);

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let (a, _a_rx) = start("a").await;
        let (b, mut b_rx) = start("b").await;
        let (c, mut c_rx) = start("c").await;
        a.add_peer(name("b"), b.local_addr().to_string());
        a.add_peer(name("c"), c.local_addr().to_string());

        let envelope = Envelope::broadcast(
            name("a"),
            Payload::PlayerListSync(PlayerListSync {
                players: vec!["alice".to_string()],
            }),
        );
        a.send(envelope.clone()).unwrap();
        assert_eq!(recv(&mut b_rx).await, envelope);
        assert_eq!(recv(&mut c_rx).await, envelope);
    }

    #[tokio::test]
    async fn test_oversized_envelope_rejected() {
        let config = TcpBrokerConfig {
            frame: FrameConfig {
                max_payload_size: 32,
            },
            ..fast_config()
        };
        let (a, _a_rx) = TcpBroker::bind(name("a"), "127.0.0.1:0", config).await.unwrap();
        a.add_peer(name("b"), "127.0.0.1:9".to_string());
        let result = a.send(Envelope::broadcast(
            name("a"),
            Payload::PlayerListSync(PlayerListSync {
                players: (0..50).map(|i| format!("player{i}")).collect(),
            }),
        ));
        assert!(matches!(result, Err(BrokerError::TooLarge { max: 32, .. })));
        a.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_peer_is_unavailable() {
        let (a, _a_rx) = start("a").await;
        let result = a.send(Envelope::new(
            name("a"),
            Recipient::Server(name("nowhere")),
            Payload::PlayerListRequest,
        ));
        assert!(matches!(result, Err(BrokerError::PeerUnavailable(_))));
        assert!(!a.knows(&name("nowhere")));
    }

    #[tokio::test]
    async fn test_queued_until_peer_comes_up() {
        // Reserve a port, release it, and start the peer there later.
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = unused.local_addr().unwrap();
        drop(unused);

        let (a, _a_rx) = start("a").await;
        a.add_peer(name("b"), addr.to_string());
        let envelope = Envelope::new(
            name("a"),
            Recipient::Server(name("b")),
            Payload::PlayerListRequest,
        );
        a.send(envelope.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        let (_b, mut b_rx) = TcpBroker::with_listener(name("b"), listener, fast_config()).unwrap();
        assert_eq!(recv(&mut b_rx).await, envelope);
    }

    #[tokio::test]
    async fn test_envelope_for_other_server_ignored() {
        let (a, _a_rx) = start("a").await;
        let (b, mut b_rx) = start("b").await;
        // "c" is routed to b's address, but b must not accept it.
        a.add_peer(name("c"), b.local_addr().to_string());
        a.add_peer(name("b"), b.local_addr().to_string());

        a.send(Envelope::new(
            name("a"),
            Recipient::Server(name("c")),
            Payload::PlayerListRequest,
        ))
        .unwrap();
        let marker = Envelope::new(
            name("a"),
            Recipient::Server(name("b")),
            Payload::PlayerListRequest,
        );
        a.send(marker.clone()).unwrap();
        assert_eq!(recv(&mut b_rx).await, marker);
        assert!(b_rx.try_recv().is_err());
    }
}
