//! Gateway metadata (`GET /gateway/bot`)

use async_trait::async_trait;
use cord_common::ClientResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBotInfo {
    /// WebSocket URL to connect to
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Remaining session starts for the current day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the limit resets
    pub reset_after: u64,
    /// Identify buckets available at once
    pub max_concurrency: u32,
}

impl SessionStartLimit {
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }
}

/// Source of gateway metadata for the shard coordinator
#[async_trait]
pub trait GatewayMetadata: Send + Sync {
    async fn gateway_bot(&self) -> ClientResult<GatewayBotInfo>;
}
