//! Broker protocol between Waystone servers: wire messages, length-prefixed
//! framing, tag-based routing and the two transports (in-process hub and TCP).

pub mod broker;
pub mod framing;
pub mod messages;
pub mod reconnection;
pub mod routing;
pub mod tcp;

pub use broker::{Broker, BrokerError, LocalBroker, LocalHub};
pub use framing::{FrameConfig, FrameError, read_envelope, read_frame, write_envelope, write_frame};
pub use messages::{
    Envelope, FailureReason, MessageError, PROTOCOL_VERSION, Payload, PlayerListSync,
    PositionUpdate, Recipient, ResponseOutcome, TeleportResponse, deserialize_envelope,
    serialize_envelope,
};
pub use reconnection::{ReconnectConfig, ReconnectState};
pub use routing::{MessageHandler, MessageRouter, MessageTag, message_channel, process_incoming_messages};
pub use tcp::{TcpBroker, TcpBrokerConfig};
