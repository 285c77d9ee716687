//! Hearth - a single-room WebSocket chat relay server.
//!
//! Authenticates connections, routes messages and admin commands among
//! them, and enforces persistent moderation state (bans, mutes) across
//! restarts.

pub mod ai;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod moderation;
pub mod protocol;
pub mod registry;
pub mod server;

pub use ai::AiBridge;
pub use command::{parse as parse_command, Command, Verb};
pub use config::Config;
pub use error::{HearthError, Result};
pub use moderation::ModerationStore;
pub use protocol::{
    ClientEnvelope, Role, ServerEnvelope, UserView, AI_SENDER, POLICY_CLOSE_CODE,
};
pub use registry::{NameTaken, Outbound, Registry, Session};
pub use server::{RelayServer, ServerState};
