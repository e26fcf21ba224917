//! Shard coordinator
//!
//! Boots one session per shard from the gateway metadata, supervises them, and keeps the
//! guild assignment table current.

use super::assignment::{shard_for_guild, ShardAssignment};
use super::status::{ShardStatus, StatusCallback};
use crate::dispatch::EventDispatcher;
use crate::protocol::PresenceUpdatePayload;
use crate::session::{ExitReason, Session, SessionConfig, ShardExit, ShardHandle, ShardNotice};
use crate::transport::Connector;
use cord_common::{Backoff, ClientConfig, ClientError, ClientResult, ShardCount};
use cord_core::{Intents, Snowflake};
use cord_http::GatewayMetadata;
use cord_ratelimit::RateLimiter;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A spawned shard
struct ShardSlot {
    handle: ShardHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    delivery: JoinHandle<()>,
    restarts: u32,
}

/// Everything needed to (re)spawn a session for the current shard count
struct Spawner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    limiter: Arc<RateLimiter>,
    dispatcher: Arc<EventDispatcher>,
    presence: Option<PresenceUpdatePayload>,
    backoff: Backoff,
    gateway_url: String,
    shard_count: u32,
    intents: Intents,
    cancel: CancellationToken,
    notices: mpsc::UnboundedSender<ShardNotice>,
}

impl Spawner {
    fn spawn(&self, shard_id: u32, restarts: u32) -> ShardSlot {
        let mut config = SessionConfig::new(
            &self.config,
            shard_id,
            self.shard_count,
            self.gateway_url.clone(),
            self.intents,
        )
        .with_backoff(self.backoff.clone());
        if let Some(presence) = &self.presence {
            config = config.with_presence(presence.clone());
        }

        let (events, delivery) = self
            .dispatcher
            .spawn_queue(shard_id, self.config.gateway.dispatch_queue_capacity);
        let cancel = self.cancel.child_token();
        let (session, handle) = Session::new(
            config,
            Arc::clone(&self.connector),
            Arc::clone(&self.limiter),
            events,
            cancel.clone(),
        );
        let session = session.with_notices(self.notices.clone());
        let notices = self.notices.clone();
        let task = tokio::spawn(async move {
            let exit = session.run().await;
            let _ = notices.send(ShardNotice::Exited(exit));
        });

        ShardSlot {
            handle,
            cancel,
            task,
            delivery,
            restarts,
        }
    }
}

/// State shared with the supervisor task
#[derive(Default)]
struct Fleet {
    assignment: RwLock<Arc<ShardAssignment>>,
    shards: DashMap<u32, ShardSlot>,
    statuses: DashMap<u32, ShardStatus>,
    spawner: RwLock<Option<Arc<Spawner>>>,
    on_status: Option<StatusCallback>,
}

impl Fleet {
    fn set_status(&self, shard_id: u32, status: ShardStatus) {
        if let Some(callback) = &self.on_status {
            callback(shard_id, &status);
        }
        self.statuses.insert(shard_id, status);
    }

    fn add_guilds(&self, guilds: Vec<Snowflake>) {
        let mut assignment = self.assignment.write();
        let next = assignment.with_guilds(guilds);
        *assignment = Arc::new(next);
    }

    /// A shard that reached Connected gets its full restart budget back
    fn reset_restarts(&self, shard_id: u32) {
        if let Some(mut slot) = self.shards.get_mut(&shard_id) {
            slot.restarts = 0;
        }
    }

    fn spawner(&self) -> Option<Arc<Spawner>> {
        self.spawner.read().clone()
    }

    fn all_exited(&self) -> bool {
        self.statuses
            .iter()
            .all(|entry| matches!(entry.value(), ShardStatus::Stopped | ShardStatus::Failed { .. }))
    }
}

/// Runs and supervises every shard of one bot
pub struct ShardCoordinator {
    config: ClientConfig,
    metadata: Arc<dyn GatewayMetadata>,
    connector: Arc<dyn Connector>,
    limiter: Arc<RateLimiter>,
    dispatcher: Arc<EventDispatcher>,
    presence: Option<PresenceUpdatePayload>,
    backoff: Backoff,
    cancel: CancellationToken,
    fleet: Arc<Fleet>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ShardCoordinator {
    pub fn new(
        config: ClientConfig,
        metadata: Arc<dyn GatewayMetadata>,
        connector: Arc<dyn Connector>,
        limiter: Arc<RateLimiter>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            config,
            metadata,
            connector,
            limiter,
            dispatcher,
            presence: None,
            backoff: Backoff::gateway(),
            cancel: CancellationToken::new(),
            fleet: Arc::new(Fleet::default()),
            supervisor: Mutex::new(None),
        }
    }

    /// Receive every shard status change. Must not block.
    #[must_use]
    pub fn with_status_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &ShardStatus) + Send + Sync + 'static,
    {
        if let Some(fleet) = Arc::get_mut(&mut self.fleet) {
            fleet.on_status = Some(Arc::new(callback));
        }
        self
    }

    /// Presence sent with every Identify
    #[must_use]
    pub fn with_presence(mut self, presence: PresenceUpdatePayload) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Reconnect backoff used by every session
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Fetch gateway metadata, validate the shard count, then spawn and supervise every shard.
    ///
    /// Fails with `FatalConfiguration` before any connection when no session starts remain or
    /// the requested count cannot be started.
    pub async fn start(&self, count: ShardCount) -> ClientResult<()> {
        if self.supervisor.lock().is_some() {
            return Err(ClientError::configuration("coordinator already started"));
        }

        let info = self.metadata.gateway_bot().await?;
        let limit = &info.session_start_limit;
        if limit.remaining == 0 {
            return Err(ClientError::configuration(format!(
                "no session starts remaining, limit resets in {:?}",
                limit.reset_after()
            )));
        }

        let shard_count = match count {
            ShardCount::Auto => info.shards.max(1),
            ShardCount::Fixed(n) => n,
        };
        if shard_count == 0 || shard_count > limit.remaining {
            return Err(ClientError::configuration(format!(
                "cannot start {shard_count} shards with {} session starts remaining",
                limit.remaining
            )));
        }

        self.limiter.set_max_concurrency(limit.max_concurrency.max(1));
        let intents = self.dispatcher.intents();
        *self.fleet.assignment.write() = Arc::new(ShardAssignment::empty(shard_count));

        let (notices_tx, notices) = mpsc::unbounded_channel();
        let spawner = Arc::new(Spawner {
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            limiter: Arc::clone(&self.limiter),
            dispatcher: Arc::clone(&self.dispatcher),
            presence: self.presence.clone(),
            backoff: self.backoff.clone(),
            gateway_url: info.url.clone(),
            shard_count,
            intents,
            cancel: self.cancel.clone(),
            notices: notices_tx,
        });
        *self.fleet.spawner.write() = Some(Arc::clone(&spawner));

        tracing::info!(
            shard_count,
            max_concurrency = limit.max_concurrency,
            remaining = limit.remaining,
            intents = intents.bits(),
            url = %info.url,
            "Starting shards"
        );

        let supervisor = tokio::spawn(supervise(
            Arc::clone(&self.fleet),
            notices,
            self.config.gateway.max_shard_restarts,
            self.cancel.clone(),
        ));
        *self.supervisor.lock() = Some(supervisor);

        self.spawn_all(&spawner).await;
        Ok(())
    }

    async fn spawn_all(&self, spawner: &Spawner) {
        let delay = self.config.gateway.shard_spawn_delay();
        for shard_id in 0..spawner.shard_count {
            if shard_id > 0 {
                tokio::select! {
                    () = self.cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            self.fleet.set_status(shard_id, ShardStatus::Pending);
            self.fleet.shards.insert(shard_id, spawner.spawn(shard_id, 0));
        }
    }

    /// Restart every shard with `shard_count` shards and rebuild the assignment table
    pub async fn reshard(&self, shard_count: u32) -> ClientResult<()> {
        if shard_count == 0 {
            return Err(ClientError::configuration("shard count must be at least 1"));
        }
        let Some(current) = self.fleet.spawner() else {
            return Err(ClientError::configuration("coordinator not started"));
        };
        if self.cancel.is_cancelled() {
            return Err(ClientError::configuration("coordinator is shut down"));
        }

        tracing::info!(from = current.shard_count, to = shard_count, "Resharding");

        let spawner = Arc::new(Spawner {
            config: current.config.clone(),
            connector: Arc::clone(&current.connector),
            limiter: Arc::clone(&current.limiter),
            dispatcher: Arc::clone(&current.dispatcher),
            presence: current.presence.clone(),
            backoff: current.backoff.clone(),
            gateway_url: current.gateway_url.clone(),
            shard_count,
            intents: self.dispatcher.intents(),
            cancel: current.cancel.clone(),
            notices: current.notices.clone(),
        });
        *self.fleet.spawner.write() = Some(Arc::clone(&spawner));

        self.stop_slots().await;
        {
            let mut assignment = self.fleet.assignment.write();
            let next = assignment.resharded(shard_count);
            *assignment = Arc::new(next);
        }
        self.fleet.statuses.retain(|shard_id, _| *shard_id < shard_count);

        self.spawn_all(&spawner).await;
        Ok(())
    }

    /// Cancel every session, wait up to the shutdown grace period, then abort what is left
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down shards");
        self.cancel.cancel();
        self.limiter.close_identify();

        self.stop_slots().await;

        let supervisor = self.supervisor.lock().take();
        if let Some(mut supervisor) = supervisor {
            let deadline = Instant::now() + self.config.gateway.shutdown_grace();
            if tokio::time::timeout_at(deadline, &mut supervisor).await.is_err() {
                supervisor.abort();
            }
        }
        tracing::info!("Shards stopped");
    }

    /// Cancel and remove every slot, aborting sessions that outlive the grace period
    async fn stop_slots(&self) {
        let ids: Vec<u32> = self.fleet.shards.iter().map(|entry| *entry.key()).collect();
        let slots: Vec<(u32, ShardSlot)> = ids
            .into_iter()
            .filter_map(|id| self.fleet.shards.remove(&id))
            .collect();
        for (_, slot) in &slots {
            slot.cancel.cancel();
        }

        let deadline = Instant::now() + self.config.gateway.shutdown_grace();
        for (shard_id, mut slot) in slots {
            if tokio::time::timeout_at(deadline, &mut slot.task).await.is_err() {
                tracing::warn!(shard_id, "Session did not stop in time, aborting");
                slot.task.abort();
            }
            if tokio::time::timeout_at(deadline, &mut slot.delivery).await.is_err() {
                tracing::warn!(shard_id, "Event delivery did not drain in time, aborting");
                slot.delivery.abort();
            }
            let failed = self
                .fleet
                .statuses
                .get(&shard_id)
                .is_some_and(|status| status.is_failed());
            if !failed {
                self.fleet.set_status(shard_id, ShardStatus::Stopped);
            }
        }
    }

    /// Handle for `shard_id`, if that shard is running
    pub fn shard(&self, shard_id: u32) -> Option<ShardHandle> {
        self.fleet
            .shards
            .get(&shard_id)
            .map(|slot| slot.handle.clone())
    }

    /// Handle of the shard that carries `guild_id`
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> Option<ShardHandle> {
        self.shard(shard_for_guild(guild_id, self.shard_count()))
    }

    pub fn shard_count(&self) -> u32 {
        self.fleet.assignment.read().shard_count()
    }

    /// Snapshot of the current assignment table
    pub fn assignment(&self) -> Arc<ShardAssignment> {
        Arc::clone(&self.fleet.assignment.read())
    }

    pub fn status(&self, shard_id: u32) -> Option<ShardStatus> {
        self.fleet
            .statuses
            .get(&shard_id)
            .map(|status| status.value().clone())
    }

    /// Status of every known shard, ordered by shard ID
    pub fn statuses(&self) -> Vec<(u32, ShardStatus)> {
        let mut statuses: Vec<_> = self
            .fleet
            .statuses
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        statuses.sort_by_key(|(shard_id, _)| *shard_id);
        statuses
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }
}

impl std::fmt::Debug for ShardCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCoordinator")
            .field("shard_count", &self.shard_count())
            .field("running", &self.fleet.shards.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Apply session notices until shutdown and every shard has exited
async fn supervise(
    fleet: Arc<Fleet>,
    mut notices: mpsc::UnboundedReceiver<ShardNotice>,
    max_restarts: u32,
    cancel: CancellationToken,
) {
    while let Some(notice) = notices.recv().await {
        match notice {
            ShardNotice::State { shard_id, state } => {
                if state.is_connected() {
                    fleet.reset_restarts(shard_id);
                }
                fleet.set_status(shard_id, ShardStatus::Running { state });
            }
            ShardNotice::Ready { shard_id, guilds } => {
                tracing::debug!(shard_id, guilds = guilds.len(), "Updating assignment");
                fleet.add_guilds(guilds);
            }
            ShardNotice::Exited(exit) => on_exit(&fleet, exit, max_restarts, &cancel),
        }

        if cancel.is_cancelled() && fleet.all_exited() {
            break;
        }
    }
    tracing::debug!("Supervisor stopped");
}

fn on_exit(fleet: &Fleet, exit: ShardExit, max_restarts: u32, cancel: &CancellationToken) {
    let ShardExit { shard_id, reason } = exit;
    let err = match reason {
        ExitReason::Shutdown => {
            fleet.set_status(shard_id, ShardStatus::Stopped);
            return;
        }
        ExitReason::Failed(err) => err,
    };

    let failed = ShardStatus::Failed {
        code: err.error_code().to_string(),
        message: err.to_string(),
    };

    if matches!(err, ClientError::Authentication(_)) {
        tracing::error!(shard_id, error = %err, "Authentication failed, halting every shard");
        fleet.set_status(shard_id, failed);
        cancel.cancel();
        return;
    }

    let restarts = fleet.shards.get(&shard_id).map_or(0, |slot| slot.restarts);
    let spawner = fleet.spawner();
    let restartable = err.is_retryable() && !cancel.is_cancelled() && restarts < max_restarts;
    match spawner {
        Some(spawner) if restartable && shard_id < spawner.shard_count => {
            let attempt = restarts + 1;
            tracing::warn!(shard_id, attempt, error = %err, "Restarting shard");
            fleet.set_status(shard_id, ShardStatus::Restarting { attempt });
            fleet.shards.insert(shard_id, spawner.spawn(shard_id, attempt));
        }
        _ => {
            tracing::error!(shard_id, error = %err, code = err.error_code(), "Shard failed");
            fleet.set_status(shard_id, failed);
        }
    }
}
