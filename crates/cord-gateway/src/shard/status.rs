//! Shard status reporting

use crate::session::SessionState;
use serde::Serialize;
use std::sync::Arc;

/// Supervisor's view of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShardStatus {
    /// Spawned, waiting for its turn
    Pending,
    /// Session running in the given state
    Running { state: SessionState },
    /// Restarted after a failure
    Restarting { attempt: u32 },
    /// Gave up; other shards keep running
    Failed { code: String, message: String },
    /// Shut down
    Stopped,
}

impl ShardStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Called with `(shard_id, status)` on every status change
pub type StatusCallback = Arc<dyn Fn(u32, &ShardStatus) + Send + Sync>;
