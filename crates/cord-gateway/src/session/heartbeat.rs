//! Heartbeat timer
//!
//! One task per connection. It never touches the transport; it tells the session loop when to
//! beat and when the connection has gone zombie.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Consecutive unacknowledged beats that mark a connection dead
pub const MAX_MISSED_ACKS: u32 = 2;

/// Signal from the heartbeat task to the session loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pulse {
    /// Send a heartbeat now
    Beat,
    /// Too many beats went unacknowledged
    Zombie,
}

/// Run until cancelled, the loop stops listening, or the connection goes zombie.
///
/// The first beat fires after `interval * random(0..1)`. Before every later beat, `acked` is
/// checked and cleared; the session sets it when op 11 arrives.
pub(crate) async fn run_heartbeat(
    interval: Duration,
    acked: Arc<AtomicBool>,
    pulses: mpsc::Sender<Pulse>,
    cancel: CancellationToken,
) {
    let mut delay = interval.mul_f64(rand::random::<f64>());
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        delay = interval;

        if acked.swap(false, Ordering::AcqRel) {
            missed = 0;
        } else {
            missed += 1;
            if missed >= MAX_MISSED_ACKS {
                let _ = pulses.send(Pulse::Zombie).await;
                return;
            }
        }

        if pulses.send(Pulse::Beat).await.is_err() {
            return;
        }
    }
}
