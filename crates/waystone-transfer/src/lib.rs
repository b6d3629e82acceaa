//! Cross-server teleport transactions.
//!
//! The [`TransactionResolver`] turns a teleport request into either an
//! immediate local result or a broker round-trip tracked in the
//! [`PendingTable`]. Peer player lists arrive through `PLAYER_LIST_SYNC` and
//! are kept in the [`PlayerListRegistry`], which also answers "which server is
//! this player on". Results for the game thread are queued as [`Completion`]s.

mod error;
pub mod pending;
pub mod player_list;
pub mod policy;
pub mod resolver;

pub use error::TransferError;
pub use pending::{PendingRequest, PendingState, PendingTable, Resolution};
pub use player_list::PlayerListRegistry;
pub use policy::{AccessPolicy, AllowAll, LocalPlayers};
pub use resolver::{
    Completion, CompletionQueue, RequestTicket, TeleportOutcome, TransactionResolver,
    TransferSettings,
};
