//! Caller-facing handle to a running session

use super::SessionState;
use crate::protocol::{
    GatewayMessage, PresenceUpdatePayload, RequestGuildMembersPayload, VoiceStateUpdatePayload,
};
use cord_common::{ClientError, ClientResult};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::RwLock;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Commands a connection may send in any minute, leaving 10 of the gateway's 120 for heartbeats
pub const COMMANDS_PER_MINUTE: u32 = 110;

/// Commands that may go out back to back; the rest of the minute's budget refills at an even pace
pub const COMMAND_BURST: NonZeroU32 = match NonZeroU32::new(COMMANDS_PER_MINUTE / 2) {
    Some(n) => n,
    None => panic!("command burst must be non-zero"),
};

/// Buffered outbound commands per session
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

const UNSET: u64 = u64::MAX;

/// State the session publishes for its handles
pub(crate) struct SessionShared {
    state: watch::Sender<SessionState>,
    sequence: AtomicU64,
    latency_ms: AtomicU64,
    session_id: RwLock<Option<String>>,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            state,
            sequence: AtomicU64::new(UNSET),
            latency_ms: AtomicU64::new(UNSET),
            session_id: RwLock::new(None),
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    pub(crate) fn set_sequence(&self, sequence: Option<u64>) {
        self.sequence.store(sequence.unwrap_or(UNSET), Ordering::Release);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(UNSET - 1);
        self.latency_ms.store(millis, Ordering::Release);
    }

    pub(crate) fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.write() = session_id;
    }
}

/// Send budget for one connection.
///
/// A burst of [`COMMAND_BURST`] plus what refills over a minute stays within
/// [`COMMANDS_PER_MINUTE`].
pub(crate) fn command_limiter() -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_minute(COMMAND_BURST))
}

/// Handle to one shard's session
///
/// Cheap to clone. Commands are queued until the session is connected; the session charges each
/// one against the connection's send budget as it goes out.
#[derive(Clone)]
pub struct ShardHandle {
    shard_id: u32,
    shared: Arc<SessionShared>,
    commands: mpsc::Sender<GatewayMessage>,
}

impl ShardHandle {
    pub(crate) fn new(
        shard_id: u32,
        shared: Arc<SessionShared>,
        commands: mpsc::Sender<GatewayMessage>,
    ) -> Self {
        Self {
            shard_id,
            shared,
            commands,
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the session reaches `state`; `false` if the session is gone first
    pub async fn wait_for_state(&self, state: SessionState) -> bool {
        let mut rx = self.watch_state();
        let reached = rx.wait_for(|current| *current == state).await.is_ok();
        reached
    }

    /// Last sequence number received
    pub fn sequence(&self) -> Option<u64> {
        match self.shared.sequence.load(Ordering::Acquire) {
            UNSET => None,
            seq => Some(seq),
        }
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        match self.shared.latency_ms.load(Ordering::Acquire) {
            UNSET => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id.read().clone()
    }

    /// Send a presence update (op 3)
    pub async fn update_presence(&self, presence: PresenceUpdatePayload) -> ClientResult<()> {
        if !presence.is_valid_status() {
            return Err(ClientError::protocol(format!(
                "unknown presence status {:?}",
                presence.status
            )));
        }
        self.send(GatewayMessage::presence_update(&presence)?).await
    }

    /// Join, move or leave (`channel_id: None`) a voice channel (op 4)
    pub async fn update_voice_state(&self, voice: VoiceStateUpdatePayload) -> ClientResult<()> {
        self.send(GatewayMessage::voice_state_update(&voice)?).await
    }

    /// Request guild members (op 8). Returns the nonce echoed in the GUILD_MEMBERS_CHUNK events.
    pub async fn request_guild_members(
        &self,
        mut request: RequestGuildMembersPayload,
    ) -> ClientResult<String> {
        let nonce = request
            .nonce
            .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string())
            .clone();
        self.send(GatewayMessage::request_guild_members(&request)?)
            .await?;
        Ok(nonce)
    }

    async fn send(&self, message: GatewayMessage) -> ClientResult<()> {
        self.commands
            .send(message)
            .await
            .map_err(|_| ClientError::network(format!("shard {} is not running", self.shard_id)))
    }
}

impl std::fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardHandle")
            .field("shard_id", &self.shard_id)
            .field("state", &self.state())
            .field("sequence", &self.sequence())
            .finish_non_exhaustive()
    }
}
