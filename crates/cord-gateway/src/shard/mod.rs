//! Sharding
//!
//! [`ShardCoordinator`] runs one session per shard and routes guilds to shards with
//! [`shard_for_guild`].

mod assignment;
mod coordinator;
mod status;

pub use assignment::{shard_for_guild, ShardAssignment};
pub use coordinator::ShardCoordinator;
pub use status::{ShardStatus, StatusCallback};
