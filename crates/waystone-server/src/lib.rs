//! The Waystone server: one process-scoped context tying the teleport
//! subsystem to players, storage and the broker.

pub mod context;
mod error;
pub mod hooks;
pub mod online;
pub mod policy;
pub mod runtime;

pub use context::Waystone;
pub use error::ContextError;
pub use hooks::{AnalyticsHook, Hook, HookKind, HookRegistry, MapHook};
pub use online::OnlineUsers;
pub use policy::PlayerPreferences;
pub use runtime::run;
