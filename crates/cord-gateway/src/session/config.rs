//! Per-session settings

use crate::protocol::{IdentifyPayload, IdentifyProperties, PresenceUpdatePayload, ResumePayload};
use cord_common::{Backoff, ClientConfig};
use cord_core::Intents;
use std::time::Duration;

/// Everything one session needs to connect, identify and resume
#[derive(Clone)]
pub struct SessionConfig {
    pub shard_id: u32,
    pub shard_count: u32,
    pub token: String,
    pub intents: Intents,
    pub large_threshold: u16,
    /// Presence sent with Identify
    pub presence: Option<PresenceUpdatePayload>,
    pub properties: IdentifyProperties,
    /// Gateway URL from the metadata, without query
    pub gateway_url: String,
    pub version: u8,
    pub hello_timeout: Duration,
    /// Consecutive failed connections before the session gives up
    pub max_connect_attempts: u32,
    pub backoff: Backoff,
}

impl SessionConfig {
    pub fn new(
        config: &ClientConfig,
        shard_id: u32,
        shard_count: u32,
        gateway_url: impl Into<String>,
        intents: Intents,
    ) -> Self {
        Self {
            shard_id,
            shard_count,
            token: config.token.clone(),
            intents,
            large_threshold: config.gateway.large_threshold,
            presence: None,
            properties: IdentifyProperties::new(config.app.name.clone()),
            gateway_url: gateway_url.into(),
            version: config.gateway.version,
            hello_timeout: config.gateway.hello_timeout(),
            max_connect_attempts: config.gateway.max_connect_attempts.max(1),
            backoff: Backoff::gateway(),
        }
    }

    #[must_use]
    pub fn with_presence(mut self, presence: PresenceUpdatePayload) -> Self {
        self.presence = Some(presence);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// `base` with the version and encoding query appended
    pub fn connect_url(&self, base: &str) -> String {
        format!(
            "{}/?v={}&encoding=json",
            base.trim_end_matches('/'),
            self.version
        )
    }

    pub(crate) fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.token.clone(),
            intents: self.intents,
            properties: self.properties.clone(),
            shard: [self.shard_id, self.shard_count],
            large_threshold: self.large_threshold,
            compress: false,
            presence: self.presence.clone(),
        }
    }

    pub(crate) fn resume_payload(&self, session_id: &str, seq: u64) -> ResumePayload {
        ResumePayload {
            token: self.token.clone(),
            session_id: session_id.to_string(),
            seq,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("shard", &[self.shard_id, self.shard_count])
            .field("token", &"[REDACTED]")
            .field("intents", &self.intents)
            .field("gateway_url", &self.gateway_url)
            .field("version", &self.version)
            .field("hello_timeout", &self.hello_timeout)
            .field("max_connect_attempts", &self.max_connect_attempts)
            .finish_non_exhaustive()
    }
}
