//! Message routing: dispatch incoming envelopes to payload-specific handlers.
//!
//! The [`MessageRouter`] maps [`MessageTag`] values to [`MessageHandler`]
//! implementations. Transports push envelopes into a bounded
//! [`tokio::sync::mpsc`] channel which the owner drains with
//! [`process_incoming_messages`].

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::messages::{Envelope, Payload};

// ---------------------------------------------------------------------------
// MessageTag
// ---------------------------------------------------------------------------

/// Routing key identifying a payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    PlayerListSync,
    PlayerListRequest,
    TeleportRequest,
    TeleportResponse,
    PositionUpdate,
}

impl Payload {
    /// Extract the routing tag without consuming the payload.
    pub fn tag(&self) -> MessageTag {
        match self {
            Payload::PlayerListSync(_) => MessageTag::PlayerListSync,
            Payload::PlayerListRequest => MessageTag::PlayerListRequest,
            Payload::TeleportRequest(_) => MessageTag::TeleportRequest,
            Payload::TeleportResponse(_) => MessageTag::TeleportResponse,
            Payload::PositionUpdate(_) => MessageTag::PositionUpdate,
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Processes one envelope. Implemented for closures.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, envelope: Envelope);
}

impl<F> MessageHandler for F
where
    F: Fn(Envelope) + Send + Sync,
{
    fn handle(&self, envelope: Envelope) {
        self(envelope);
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes envelopes to registered handlers by [`MessageTag`].
pub struct MessageRouter {
    handlers: HashMap<MessageTag, Box<dyn MessageHandler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one for `tag`.
    pub fn register<H: MessageHandler + 'static>(&mut self, tag: MessageTag, handler: H) {
        self.handlers.insert(tag, Box::new(handler));
    }

    /// Returns `true` if a handler took the envelope, `false` if it was dropped.
    pub fn route(&self, envelope: Envelope) -> bool {
        let tag = envelope.payload.tag();
        if let Some(handler) = self.handlers.get(&tag) {
            handler.handle(envelope);
            true
        } else {
            tracing::warn!("No handler registered for {:?}, dropping message", tag);
            false
        }
    }

    pub fn registered_tags(&self) -> impl Iterator<Item = &MessageTag> {
        self.handlers.keys()
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Channel bridge
// ---------------------------------------------------------------------------

/// Channel pair carrying envelopes from transport tasks to their consumer.
pub fn message_channel(buffer: usize) -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
    mpsc::channel(buffer)
}

/// Route every envelope already queued. Returns how many were routed.
pub fn process_incoming_messages(
    receiver: &mut mpsc::Receiver<Envelope>,
    router: &MessageRouter,
) -> usize {
    let mut routed = 0;
    while let Ok(envelope) = receiver.try_recv() {
        if router.route(envelope) {
            routed += 1;
        }
    }
    routed
}
