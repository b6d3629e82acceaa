//! Broker message definitions and versioned postcard encoding.
//!
//! Every payload on the wire is a single [`PROTOCOL_VERSION`] byte followed by
//! the postcard encoding of an [`Envelope`].

use serde::{Deserialize, Serialize};
use waystone_world::{CorrelationId, Position, ServerName, TeleportRequest};

/// Current protocol version. Prepended to every serialized envelope.
pub const PROTOCOL_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Who should process an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Server(ServerName),
    /// Every server except the origin.
    All,
}

/// A broker message with its routing header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// For requests, the request's ID; responses echo it back.
    pub correlation_id: CorrelationId,
    pub origin: ServerName,
    pub recipient: Recipient,
    pub payload: Payload,
}

impl Envelope {
    /// A new envelope with a fresh correlation ID.
    pub fn new(origin: ServerName, recipient: Recipient, payload: Payload) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            origin,
            recipient,
            payload,
        }
    }

    pub fn broadcast(origin: ServerName, payload: Payload) -> Self {
        Self::new(origin, Recipient::All, payload)
    }

    /// Whether `server` should process this envelope.
    pub fn is_for(&self, server: &ServerName) -> bool {
        match &self.recipient {
            Recipient::Server(name) => name == server,
            Recipient::All => &self.origin != server,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Broker message body. The enum discriminant is the type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// The sender's complete list of visible online players.
    PlayerListSync(PlayerListSync),
    /// Ask every peer for a fresh `PlayerListSync`.
    PlayerListRequest,
    TeleportRequest(TeleportRequest),
    TeleportResponse(TeleportResponse),
    /// A player finished a cross-server arrival.
    PositionUpdate(PositionUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerListSync {
    pub players: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleportResponse {
    pub outcome: ResponseOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseOutcome {
    Success(Position),
    Failure(FailureReason),
}

/// Coarse failure reported to the origin. Details stay on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    NoSafeLocationFound,
    TargetUserNotFound,
    PermissionDenied,
    WorldNotFound,
    /// The destination refused for a reason not listed above.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub username: String,
    pub server: ServerName,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during message deserialization.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard encoding or decoding failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize an [`Envelope`] into a versioned binary payload.
pub fn serialize_envelope(envelope: &Envelope) -> Result<Vec<u8>, MessageError> {
    let body = postcard::to_allocvec(envelope)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a versioned binary payload into an [`Envelope`].
pub fn deserialize_envelope(data: &[u8]) -> Result<Envelope, MessageError> {
    let Some((&version, body)) = data.split_first() else {
        return Err(MessageError::EmptyPayload);
    };
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}
