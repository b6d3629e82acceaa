//! The broker capability and its in-process transport.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use waystone_world::ServerName;

use crate::messages::{Envelope, MessageError, Recipient, deserialize_envelope, serialize_envelope};

/// Errors reported when handing an envelope to a transport.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No route to the named server.
    #[error("peer {0} is unavailable")]
    PeerUnavailable(ServerName),

    /// The outbound queue for the peer is full.
    #[error("outbound queue to {0} is full")]
    QueueFull(ServerName),

    /// The encoded envelope exceeds the transport's frame limit.
    #[error("envelope of {size} bytes exceeds frame limit {max}")]
    TooLarge { size: usize, max: u32 },

    /// The envelope could not be encoded.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] MessageError),
}

/// Fire-and-forget delivery of envelopes to other servers.
///
/// `send` never waits for the network. Replies arrive on the transport's
/// inbound channel.
pub trait Broker: Send + Sync {
    fn local_server(&self) -> &ServerName;

    fn send(&self, envelope: Envelope) -> Result<(), BrokerError>;

    /// Servers this broker can address directly.
    fn peers(&self) -> Vec<ServerName>;

    fn knows(&self, server: &ServerName) -> bool {
        self.peers().iter().any(|peer| peer == server)
    }
}

// ---------------------------------------------------------------------------
// In-process hub
// ---------------------------------------------------------------------------

/// Connects several servers living in one process.
///
/// Every envelope is encoded and decoded on the way through, so the hub
/// exercises the same codec as the TCP transport.
#[derive(Default)]
pub struct LocalHub {
    inboxes: DashMap<ServerName, mpsc::Sender<Envelope>>,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach `server` and return its broker and inbound channel. Re-attaching
    /// a name replaces the previous inbox.
    pub fn connect(
        self: &Arc<Self>,
        server: ServerName,
        buffer: usize,
    ) -> (LocalBroker, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        self.inboxes.insert(server.clone(), tx);
        tracing::debug!(%server, "Attached to local hub");
        (
            LocalBroker {
                hub: Arc::clone(self),
                server,
            },
            rx,
        )
    }

    /// Detach `server`; later sends to it fail with [`BrokerError::PeerUnavailable`].
    pub fn disconnect(&self, server: &ServerName) {
        self.inboxes.remove(server);
    }

    fn deliver(&self, target: &ServerName, envelope: Envelope) -> Result<(), BrokerError> {
        let inbox = self
            .inboxes
            .get(target)
            .ok_or_else(|| BrokerError::PeerUnavailable(target.clone()))?;
        inbox.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BrokerError::QueueFull(target.clone()),
            mpsc::error::TrySendError::Closed(_) => BrokerError::PeerUnavailable(target.clone()),
        })
    }
}

/// One server's handle on a [`LocalHub`].
pub struct LocalBroker {
    hub: Arc<LocalHub>,
    server: ServerName,
}

impl Broker for LocalBroker {
    fn local_server(&self) -> &ServerName {
        &self.server
    }

    fn send(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let envelope = deserialize_envelope(&serialize_envelope(&envelope)?)?;
        match &envelope.recipient {
            Recipient::Server(target) => {
                let target = target.clone();
                self.hub.deliver(&target, envelope)
            }
            Recipient::All => {
                for peer in self.peers() {
                    if let Err(e) = self.hub.deliver(&peer, envelope.clone()) {
                        tracing::debug!(%peer, "Broadcast not delivered: {e}");
                    }
                }
                Ok(())
            }
        }
    }

    fn peers(&self) -> Vec<ServerName> {
        self.hub
            .inboxes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| name != &self.server)
            .collect()
    }
}
