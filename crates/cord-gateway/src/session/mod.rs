//! Gateway sessions
//!
//! One [`Session`] per shard drives the connection lifecycle; its [`ShardHandle`] is the caller's
//! side for outbound commands and status.

mod config;
mod handle;
mod heartbeat;
mod runner;
mod state;

use cord_common::ClientError;
use cord_core::Snowflake;

pub use config::SessionConfig;
pub use handle::{ShardHandle, COMMANDS_PER_MINUTE, COMMAND_BURST, COMMAND_QUEUE_CAPACITY};
pub use heartbeat::MAX_MISSED_ACKS;
pub use runner::Session;
pub use state::{ResumeInfo, SessionState};

/// Why a session stopped
#[derive(Debug)]
pub enum ExitReason {
    /// Cancelled by the caller
    Shutdown,
    /// Unrecoverable error
    Failed(ClientError),
}

/// Terminal report of one session
#[derive(Debug)]
pub struct ShardExit {
    pub shard_id: u32,
    pub reason: ExitReason,
}

/// Session to coordinator notifications
#[derive(Debug)]
pub enum ShardNotice {
    State { shard_id: u32, state: SessionState },
    /// READY received with these guilds
    Ready { shard_id: u32, guilds: Vec<Snowflake> },
    Exited(ShardExit),
}
