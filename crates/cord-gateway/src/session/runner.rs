//! Session run loop
//!
//! A [`Session`] owns its transport and runs as a single task. Each connection goes through
//! Hello, then Identify or Resume, then the read loop; the loop ends with a reconnect, a fatal
//! error or shutdown. Everything that can suspend (frames, heartbeats, the identify ticket,
//! outbound commands, cancellation) is raced in one `select!` so none of them blocks the others.

use super::handle::{command_limiter, SessionShared, COMMAND_QUEUE_CAPACITY};
use super::heartbeat::{run_heartbeat, Pulse, MAX_MISSED_ACKS};
use super::{
    ExitReason, ResumeInfo, SessionConfig, SessionState, ShardExit, ShardHandle, ShardNotice,
};
use crate::dispatch::DispatchEvent;
use crate::protocol::{CloseAction, CloseCode, GatewayMessage, OpCode};
use crate::transport::{Connector, Frame, Transport, TransportError};
use cord_common::ClientError;
use cord_core::Snowflake;
use cord_ratelimit::{IdentifyTicket, RateLimiter};
use governor::DefaultDirectRateLimiter;
use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::instrument;

/// Close code that keeps the session resumable
const RESUMABLE_CLOSE: u16 = 4000;
const NORMAL_CLOSE: u16 = 1000;

/// How one connection ended
#[derive(Debug)]
enum End {
    Shutdown,
    Fatal(ClientError),
    Reconnect(ClientError),
}

/// Pending identify ticket; aborts the acquisition when dropped
struct TicketRequest {
    rx: oneshot::Receiver<Option<IdentifyTicket>>,
    task: JoinHandle<()>,
}

impl Drop for TicketRequest {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Per-connection state; dropping it stops the heartbeat and releases any ticket
struct Connection {
    pulses: mpsc::Receiver<Pulse>,
    acked: Arc<AtomicBool>,
    beat_sent: Option<Instant>,
    ticket_request: Option<TicketRequest>,
    ticket: Option<IdentifyTicket>,
    /// Send budget for commands on this connection
    budget: DefaultDirectRateLimiter,
    /// Pending Invalid Session: when to act on it and whether it was resumable
    invalidated: Option<(Instant, bool)>,
    _heartbeat: DropGuard,
}

impl Connection {
    fn open(interval: Duration, cancel: CancellationToken) -> Self {
        let acked = Arc::new(AtomicBool::new(true));
        let (tx, pulses) = mpsc::channel(2);
        tokio::spawn(run_heartbeat(
            interval,
            Arc::clone(&acked),
            tx,
            cancel.clone(),
        ));
        Self {
            pulses,
            acked,
            beat_sent: None,
            ticket_request: None,
            ticket: None,
            budget: command_limiter(),
            invalidated: None,
            _heartbeat: cancel.drop_guard(),
        }
    }
}

async fn next_ticket(request: &mut Option<TicketRequest>) -> Option<Option<IdentifyTicket>> {
    match request {
        Some(request) => Some((&mut request.rx).await.ok().flatten()),
        None => std::future::pending().await,
    }
}

async fn invalidation_elapsed(invalidated: Option<(Instant, bool)>) -> bool {
    match invalidated {
        Some((until, resumable)) => {
            tokio::time::sleep_until(until).await;
            resumable
        }
        None => std::future::pending().await,
    }
}

/// One shard's gateway session
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    limiter: Arc<RateLimiter>,
    shared: Arc<SessionShared>,
    commands: mpsc::Receiver<GatewayMessage>,
    /// Command taken from the queue and waiting for send budget
    outbound: Option<GatewayMessage>,
    events: mpsc::Sender<DispatchEvent>,
    notices: Option<mpsc::UnboundedSender<ShardNotice>>,
    cancel: CancellationToken,
    state: SessionState,
    resume: Option<ResumeInfo>,
    sequence: Option<u64>,
    /// Whether the current connection reached `Connected`
    established: bool,
    /// Consecutive connections that failed before `Connected`
    failures: u32,
}

impl Session {
    /// Create a session and the handle used to command it.
    ///
    /// Dispatches are pushed to `events` in sequence order. Cancelling `cancel` closes the
    /// session with code 1000.
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        limiter: Arc<RateLimiter>,
        events: mpsc::Sender<DispatchEvent>,
        cancel: CancellationToken,
    ) -> (Self, ShardHandle) {
        let shared = Arc::new(SessionShared::new());
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let handle = ShardHandle::new(config.shard_id, Arc::clone(&shared), command_tx);
        let session = Self {
            config,
            connector,
            limiter,
            shared,
            commands,
            outbound: None,
            events,
            notices: None,
            cancel,
            state: SessionState::Disconnected,
            resume: None,
            sequence: None,
            established: false,
            failures: 0,
        };
        (session, handle)
    }

    /// Report state changes and READY guilds on `notices`
    #[must_use]
    pub fn with_notices(mut self, notices: mpsc::UnboundedSender<ShardNotice>) -> Self {
        self.notices = Some(notices);
        self
    }

    pub fn shard_id(&self) -> u32 {
        self.config.shard_id
    }

    /// Run until shutdown or an unrecoverable error
    #[instrument(name = "session", skip_all, fields(shard_id = self.config.shard_id))]
    pub async fn run(mut self) -> ShardExit {
        let reason = self.run_connections().await;
        if !self.state.is_terminal() {
            self.transition(SessionState::Closing);
        }

        match &reason {
            ExitReason::Shutdown => tracing::info!("Session closed"),
            ExitReason::Failed(err) => {
                tracing::error!(error = %err, code = err.error_code(), "Session failed");
            }
        }

        ShardExit {
            shard_id: self.config.shard_id,
            reason,
        }
    }

    async fn run_connections(&mut self) -> ExitReason {
        self.transition(SessionState::Connecting);

        loop {
            let base = self
                .resume
                .as_ref()
                .map_or(self.config.gateway_url.as_str(), |r| r.resume_url.as_str());
            let url = self.config.connect_url(base);
            self.established = false;

            let connected = tokio::select! {
                () = self.cancel.cancelled() => return ExitReason::Shutdown,
                result = self.connector.connect(&url) => result,
            };

            let end = match connected {
                Ok(transport) => {
                    tracing::debug!(url = %url, "Transport open");
                    self.transition(SessionState::AwaitingHello);
                    self.drive(transport).await
                }
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "Connect failed");
                    self.transition(SessionState::Reconnecting);
                    End::Reconnect(err.into())
                }
            };

            let reason = match end {
                End::Shutdown => return ExitReason::Shutdown,
                End::Fatal(err) => return ExitReason::Failed(err),
                End::Reconnect(reason) => reason,
            };

            if self.established {
                self.failures = 0;
            } else {
                self.failures += 1;
            }
            if self.failures >= self.config.max_connect_attempts {
                return ExitReason::Failed(ClientError::network(format!(
                    "gave up after {} failed connection attempts: {reason}",
                    self.failures
                )));
            }

            let delay = if self.failures == 0 {
                Duration::ZERO
            } else {
                self.config.backoff.delay(self.failures)
            };
            tracing::info!(
                attempt = self.failures,
                delay_ms = delay.as_millis() as u64,
                resumable = self.resume.is_some(),
                reason = %reason,
                "Reconnecting"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return ExitReason::Shutdown,
                () = tokio::time::sleep(delay) => {}
            }
            self.transition(SessionState::Connecting);
        }
    }

    /// Run one connection to its end, then close the transport
    async fn drive(&mut self, mut transport: Box<dyn Transport>) -> End {
        let end = match self.await_hello(transport.as_mut()).await {
            Ok(interval) => self.serve(transport.as_mut(), interval).await,
            Err(end) => end,
        };

        let code = match &end {
            End::Reconnect(_) => {
                self.transition(SessionState::Reconnecting);
                RESUMABLE_CLOSE
            }
            End::Shutdown | End::Fatal(_) => {
                self.transition(SessionState::Closing);
                NORMAL_CLOSE
            }
        };
        if let Err(err) = transport.close(code, "").await {
            tracing::debug!(error = %err, code, "Close failed");
        }
        end
    }

    async fn await_hello(&mut self, transport: &mut dyn Transport) -> Result<Duration, End> {
        let frame = tokio::select! {
            () = self.cancel.cancelled() => return Err(End::Shutdown),
            frame = tokio::time::timeout(self.config.hello_timeout, transport.recv()) => frame,
        };
        let Ok(frame) = frame else {
            return Err(End::Reconnect(ClientError::protocol(format!(
                "no Hello within {:?}",
                self.config.hello_timeout
            ))));
        };

        match frame {
            Some(Ok(Frame::Text(text))) => {
                let hello = GatewayMessage::from_json(&text)
                    .ok()
                    .and_then(|message| message.as_hello());
                match hello {
                    Some(hello) if hello.heartbeat_interval > 0 => {
                        Ok(Duration::from_millis(hello.heartbeat_interval))
                    }
                    _ => Err(End::Reconnect(ClientError::protocol(
                        "expected Hello as the first frame",
                    ))),
                }
            }
            Some(Ok(Frame::Close(frame))) => Err(self.on_close(frame.map(|f| f.code))),
            Some(Err(err)) => Err(End::Reconnect(err.into())),
            None => Err(End::Reconnect(ClientError::network(
                "connection closed before Hello",
            ))),
        }
    }

    async fn serve(&mut self, transport: &mut dyn Transport, interval: Duration) -> End {
        let mut conn = Connection::open(interval, self.cancel.child_token());
        tracing::debug!(interval_ms = interval.as_millis() as u64, "Hello received");

        if let Some(end) = self.handshake(transport, &mut conn).await {
            return end;
        }

        loop {
            let connected = self.state.is_connected();
            let flow = tokio::select! {
                () = self.cancel.cancelled() => Some(End::Shutdown),
                frame = transport.recv() => self.on_frame(frame, transport, &mut conn).await,
                Some(pulse) = conn.pulses.recv() => {
                    self.on_pulse(pulse, transport, &mut conn).await
                }
                Some(ticket) = next_ticket(&mut conn.ticket_request) => {
                    self.on_ticket(ticket, transport, &mut conn).await
                }
                resumable = invalidation_elapsed(conn.invalidated) => {
                    conn.invalidated = None;
                    self.after_invalid_session(resumable, &mut conn)
                }
                Some(command) = self.commands.recv(), if connected && self.outbound.is_none() => {
                    self.outbound = Some(command);
                    None
                }
                () = conn.budget.until_ready(), if connected && self.outbound.is_some() => {
                    match self.outbound.take() {
                        Some(command) => self.send(transport, &command).await,
                        None => None,
                    }
                }
            };
            if let Some(end) = flow {
                return end;
            }
        }
    }

    /// Resume when possible, otherwise queue for an identify ticket
    async fn handshake(
        &mut self,
        transport: &mut dyn Transport,
        conn: &mut Connection,
    ) -> Option<End> {
        if let (Some(resume), Some(seq)) = (self.resume.clone(), self.sequence) {
            self.transition(SessionState::Resuming);
            tracing::info!(session_id = %resume.session_id, seq, "Resuming session");
            let payload = self.config.resume_payload(&resume.session_id, seq);
            return match GatewayMessage::resume(&payload) {
                Ok(message) => self.send(transport, &message).await,
                Err(err) => Some(End::Fatal(err.into())),
            };
        }

        self.transition(SessionState::Identifying);
        self.request_ticket(conn);
        None
    }

    fn request_ticket(&self, conn: &mut Connection) {
        let (tx, rx) = oneshot::channel();
        let limiter = Arc::clone(&self.limiter);
        let shard_id = self.config.shard_id;
        let task = tokio::spawn(async move {
            let _ = tx.send(limiter.acquire_identify(shard_id).await);
        });
        conn.ticket_request = Some(TicketRequest { rx, task });
    }

    async fn on_ticket(
        &mut self,
        ticket: Option<IdentifyTicket>,
        transport: &mut dyn Transport,
        conn: &mut Connection,
    ) -> Option<End> {
        conn.ticket_request = None;
        // A closed identify queue means the coordinator is shutting down
        let Some(ticket) = ticket else {
            return Some(End::Shutdown);
        };

        let message = match GatewayMessage::identify(&self.config.identify_payload()) {
            Ok(message) => message,
            Err(err) => return Some(End::Fatal(err.into())),
        };
        tracing::info!(
            shard = ?[self.config.shard_id, self.config.shard_count],
            bucket = ticket.bucket(),
            intents = self.config.intents.bits(),
            "Identifying"
        );
        conn.ticket = Some(ticket);
        self.send(transport, &message).await
    }

    async fn on_frame(
        &mut self,
        frame: Option<Result<Frame, TransportError>>,
        transport: &mut dyn Transport,
        conn: &mut Connection,
    ) -> Option<End> {
        match frame {
            None => Some(End::Reconnect(ClientError::network(
                "connection closed by peer",
            ))),
            Some(Err(err)) => Some(End::Reconnect(err.into())),
            Some(Ok(Frame::Close(frame))) => Some(self.on_close(frame.map(|f| f.code))),
            Some(Ok(Frame::Text(text))) => match GatewayMessage::from_json(&text) {
                Ok(message) => self.on_message(message, transport, conn).await,
                Err(err) => {
                    tracing::warn!(error = %err, "Undecodable frame");
                    Some(End::Reconnect(ClientError::protocol(format!(
                        "undecodable frame: {err}"
                    ))))
                }
            },
        }
    }

    async fn on_message(
        &mut self,
        message: GatewayMessage,
        transport: &mut dyn Transport,
        conn: &mut Connection,
    ) -> Option<End> {
        tracing::trace!(op = %message.op, "Frame received");
        match message.op {
            OpCode::Dispatch => self.on_dispatch(message, transport, conn).await,
            OpCode::Heartbeat => self.heartbeat(transport, conn).await,
            OpCode::HeartbeatAck => {
                conn.acked.store(true, Ordering::Release);
                if let Some(sent) = conn.beat_sent.take() {
                    let latency = sent.elapsed();
                    self.shared.set_latency(latency);
                    tracing::trace!(
                        latency_ms = latency.as_millis() as u64,
                        "Heartbeat acknowledged"
                    );
                }
                None
            }
            OpCode::Reconnect => {
                tracing::info!("Gateway requested reconnect");
                Some(End::Reconnect(ClientError::network(
                    "gateway requested reconnect",
                )))
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                self.on_invalid_session(resumable, conn);
                None
            }
            OpCode::Hello => {
                tracing::debug!("Ignoring repeated Hello");
                None
            }
            op => {
                tracing::warn!(op = %op, "Ignoring client opcode sent by gateway");
                None
            }
        }
    }

    async fn on_dispatch(
        &mut self,
        message: GatewayMessage,
        transport: &mut dyn Transport,
        conn: &mut Connection,
    ) -> Option<End> {
        let (Some(seq), Some(name)) = (message.s, message.t.clone()) else {
            return Some(End::Reconnect(ClientError::protocol(
                "dispatch without sequence or type",
            )));
        };

        if let Some(current) = self.sequence {
            if seq <= current {
                tracing::debug!(seq, current, "Dropping duplicate dispatch");
                return None;
            }
            if seq > current + 1 {
                tracing::warn!(seq, expected = current + 1, "Sequence gap, resuming");
                return Some(End::Reconnect(ClientError::protocol(format!(
                    "sequence gap: expected {}, got {seq}",
                    current + 1
                ))));
            }
        }

        match name.as_str() {
            "READY" => {
                if let Some(end) = self.on_ready(&message, conn) {
                    return Some(end);
                }
            }
            "RESUMED" => {
                self.established = true;
                self.transition(SessionState::Connected);
                tracing::info!(seq, "Session resumed");
            }
            _ => {}
        }

        self.sequence = Some(seq);
        self.shared.set_sequence(Some(seq));

        let event = DispatchEvent::new(
            self.config.shard_id,
            seq,
            name,
            message.d.unwrap_or(Value::Null),
        );
        self.forward(event, transport, conn).await
    }

    fn on_ready(&mut self, message: &GatewayMessage, conn: &mut Connection) -> Option<End> {
        let ready = match message.as_ready()? {
            Ok(ready) => ready,
            Err(err) => {
                return Some(End::Reconnect(ClientError::protocol(format!(
                    "malformed READY: {err}"
                ))))
            }
        };

        self.resume = Some(ResumeInfo {
            session_id: ready.session_id.clone(),
            resume_url: ready.resume_gateway_url.clone(),
        });
        self.shared.set_session_id(Some(ready.session_id.clone()));
        if let Some(ticket) = conn.ticket.take() {
            ticket.release();
        }
        self.established = true;
        self.transition(SessionState::Connected);

        let guilds: Vec<Snowflake> = ready.guild_ids().collect();
        tracing::info!(
            session_id = %ready.session_id,
            guilds = guilds.len(),
            "Session ready"
        );
        self.notify(ShardNotice::Ready {
            shard_id: self.config.shard_id,
            guilds,
        });
        None
    }

    /// Queue an event for delivery; when the queue is full, wait for room while still heartbeating
    async fn forward(
        &mut self,
        event: DispatchEvent,
        transport: &mut dyn Transport,
        conn: &mut Connection,
    ) -> Option<End> {
        let event = match self.events.try_send(event) {
            Ok(()) => return None,
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Dispatch queue closed, dropping event");
                return None;
            }
            Err(TrySendError::Full(event)) => event,
        };

        tracing::debug!(seq = event.sequence, "Dispatch queue full, waiting");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Some(End::Shutdown),
                permit = self.events.reserve() => {
                    if let Ok(permit) = permit {
                        permit.send(event);
                    }
                    return None;
                }
                Some(pulse) = conn.pulses.recv() => {
                    if let Some(end) = self.on_pulse(pulse, transport, conn).await {
                        return Some(end);
                    }
                }
            }
        }
    }

    async fn on_pulse(
        &self,
        pulse: Pulse,
        transport: &mut dyn Transport,
        conn: &mut Connection,
    ) -> Option<End> {
        match pulse {
            Pulse::Beat => self.heartbeat(transport, conn).await,
            Pulse::Zombie => {
                tracing::warn!(missed = MAX_MISSED_ACKS, "Heartbeats not acknowledged");
                Some(End::Reconnect(ClientError::network(
                    "heartbeat not acknowledged",
                )))
            }
        }
    }

    async fn heartbeat(&self, transport: &mut dyn Transport, conn: &mut Connection) -> Option<End> {
        conn.beat_sent = Some(Instant::now());
        self.send(transport, &GatewayMessage::heartbeat(self.sequence))
            .await
    }

    /// Wait 1-5s before acting on Invalid Session; the read loop keeps heartbeating meanwhile
    fn on_invalid_session(&self, resumable: bool, conn: &mut Connection) {
        if conn.invalidated.is_some() {
            tracing::debug!(resumable, "Invalid session already pending");
            return;
        }
        let wait = Duration::from_millis(rand::thread_rng().gen_range(1_000..=5_000));
        tracing::warn!(resumable, wait_ms = wait.as_millis() as u64, "Invalid session");
        conn.invalidated = Some((Instant::now() + wait, resumable));
    }

    fn after_invalid_session(&mut self, resumable: bool, conn: &mut Connection) -> Option<End> {
        if resumable && self.resume.is_some() {
            return Some(End::Reconnect(ClientError::InvalidSession));
        }

        self.discard_resume();
        if self.state == SessionState::Resuming {
            self.transition(SessionState::Identifying);
            self.request_ticket(conn);
            return None;
        }
        Some(End::Reconnect(ClientError::InvalidSession))
    }

    fn on_close(&mut self, code: Option<u16>) -> End {
        let Some(code) = code else {
            return End::Reconnect(ClientError::network("closed without a code"));
        };
        let description = CloseCode::from_u16(code)
            .map_or_else(|| format!("close code {code}"), |known| known.to_string());

        match CloseCode::action_for(code) {
            CloseAction::Resume => {
                tracing::info!(code, "Gateway closed the connection");
                End::Reconnect(ClientError::network(format!("closed: {description}")))
            }
            CloseAction::Reidentify => {
                tracing::warn!(code, "Session invalidated by close code");
                self.discard_resume();
                End::Reconnect(ClientError::InvalidSession)
            }
            CloseAction::Authentication => End::Fatal(ClientError::Authentication(description)),
            CloseAction::FatalConfiguration => End::Fatal(ClientError::configuration(description)),
        }
    }

    fn discard_resume(&mut self) {
        self.resume = None;
        self.sequence = None;
        self.shared.set_sequence(None);
        self.shared.set_session_id(None);
    }

    async fn send(&self, transport: &mut dyn Transport, message: &GatewayMessage) -> Option<End> {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(err) => return Some(End::Fatal(err.into())),
        };
        tracing::trace!(op = %message.op, "Sending frame");
        match transport.send(json).await {
            Ok(()) => None,
            Err(err) => Some(End::Reconnect(err.into())),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Ignoring illegal state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        self.shared.set_state(next);
        self.notify(ShardNotice::State {
            shard_id: self.config.shard_id,
            state: next,
        });
    }

    fn notify(&self, notice: ShardNotice) {
        if let Some(notices) = &self.notices {
            let _ = notices.send(notice);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}
