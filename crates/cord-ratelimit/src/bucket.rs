//! Rate-limit bucket
//!
//! A bucket tracks one scope's budget: how many requests the scope allows per window, how many
//! are left, and when the window resets.

use std::time::Duration;
use tokio::time::Instant;

/// How long to wait on a bucket whose reset time is not yet known (a request is in flight and its
/// response has not reported the real limit).
pub(crate) const PENDING_RESET_RETRY: Duration = Duration::from_millis(100);

/// How long a reservation on a bucket without a known window is held before it is returned.
///
/// Covers responses that never arrive or never report rate-limit state.
pub const PENDING_RESERVATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Rate-limit state reported by the remote for one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketUpdate {
    /// Requests allowed per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Time until the window resets
    pub reset_after: Duration,
    /// Opaque bucket identifier reported by the remote
    pub bucket: Option<String>,
}

/// Point-in-time view of a bucket, for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub scope_key: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Option<Instant>,
    pub bucket: Option<String>,
}

/// Budget for a single rate-limit scope
///
/// Invariants: `remaining <= limit`, and the reset time never moves backwards.
#[derive(Debug)]
pub struct Bucket {
    scope_key: String,
    limit: u32,
    remaining: u32,
    /// Reset of the current window; `None` until a window has been observed
    reset_at: Option<Instant>,
    /// Highest reset time ever recorded
    last_reset: Option<Instant>,
    /// When reservations made without a known window are given back
    pending_until: Option<Instant>,
    /// Locally managed window length (global and custom buckets)
    window: Option<Duration>,
    server_bucket: Option<String>,
    last_used: Instant,
}

impl Bucket {
    /// Create a bucket for a scope whose limits are learned from responses.
    ///
    /// Allows a single request until the first response reports the real limit.
    #[must_use]
    pub fn new(scope_key: impl Into<String>) -> Self {
        Self {
            scope_key: scope_key.into(),
            limit: 1,
            remaining: 1,
            reset_at: None,
            last_reset: None,
            pending_until: None,
            window: None,
            server_bucket: None,
            last_used: Instant::now(),
        }
    }

    /// Create a bucket that refills itself every `window`.
    ///
    /// The window starts with the first request after a refill.
    #[must_use]
    pub fn with_window(scope_key: impl Into<String>, limit: u32, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            remaining: limit,
            window: Some(window),
            ..Self::new(scope_key)
        }
    }

    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Whether the bucket is untouched or fully refilled
    pub fn is_idle(&self, now: Instant) -> bool {
        let window_over = matches!(self.reset_at, Some(reset) if now >= reset);
        window_over || self.remaining == self.limit
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            scope_key: self.scope_key.clone(),
            limit: self.limit,
            remaining: self.remaining,
            reset_at: self.reset_at,
            bucket: self.server_bucket.clone(),
        }
    }

    /// Refill the bucket if its window has ended or its pending reservations timed out
    fn refresh(&mut self, now: Instant) {
        match (self.reset_at, self.pending_until) {
            (Some(reset), _) if now >= reset => {
                self.remaining = self.limit;
                self.reset_at = None;
                self.pending_until = None;
            }
            (None, Some(deadline)) if now >= deadline => {
                self.remaining = self.limit;
                self.pending_until = None;
            }
            _ => {}
        }
    }

    /// Time to wait before `cost` requests fit in this bucket; zero when they fit now.
    ///
    /// Costs above the limit are clamped so a request can always eventually proceed.
    pub fn wait_time(&mut self, cost: u32, now: Instant) -> Duration {
        self.refresh(now);
        let cost = cost.min(self.limit);
        if self.remaining >= cost {
            return Duration::ZERO;
        }
        match (self.reset_at, self.pending_until) {
            (Some(reset), _) => reset.saturating_duration_since(now),
            (None, Some(deadline)) => {
                PENDING_RESET_RETRY.min(deadline.saturating_duration_since(now))
            }
            (None, None) => PENDING_RESET_RETRY,
        }
    }

    /// Reserve `cost` requests. Callers check [`Bucket::wait_time`] first.
    pub fn consume(&mut self, cost: u32, now: Instant) {
        let cost = cost.min(self.limit);
        self.remaining = self.remaining.saturating_sub(cost);
        self.last_used = now;
        if self.reset_at.is_none() {
            match self.window {
                Some(window) => self.set_reset(now + window),
                None => self.pending_until = Some(now + PENDING_RESERVATION_TIMEOUT),
            }
        }
    }

    /// Give back `cost` reserved while no window was known.
    ///
    /// Used when a response carried no rate-limit state or the request never got one. Buckets
    /// with a live window keep the reservation until the window resets.
    pub fn release(&mut self, cost: u32, now: Instant) {
        self.refresh(now);
        if self.reset_at.is_some() || self.window.is_some() {
            return;
        }
        let cost = cost.min(self.limit);
        self.remaining = self.remaining.saturating_add(cost).min(self.limit);
        if self.remaining == self.limit {
            self.pending_until = None;
        }
    }

    /// Apply state reported by the remote.
    ///
    /// While a window is live the count only decreases, so reservations made while the response
    /// was in flight are not forgotten, however the remote reports the reset. The remote's count is
    /// taken as-is once the tracked window has ended.
    pub fn update(&mut self, update: &BucketUpdate, now: Instant) {
        self.refresh(now);
        let reset = now + update.reset_after;
        let limit = update.limit.max(1);
        let remaining = update.remaining.min(limit);

        self.limit = limit;
        self.remaining = match self.reset_at {
            Some(_) => self.remaining.min(remaining),
            None => remaining,
        };
        self.pending_until = None;
        self.set_reset(reset);
        if update.bucket.is_some() {
            self.server_bucket.clone_from(&update.bucket);
        }
    }

    /// Server said we are over the limit: nothing is left until at least `retry_after` from now.
    pub fn block_for(&mut self, retry_after: Duration, now: Instant) {
        self.remaining = 0;
        self.set_reset(now + retry_after);
    }

    fn set_reset(&mut self, reset: Instant) {
        let reset = match (self.reset_at, self.last_reset) {
            (Some(current), _) => reset.max(current),
            (None, Some(previous)) => reset.max(previous),
            (None, None) => reset,
        };
        self.reset_at = Some(reset);
        self.last_reset = Some(self.last_reset.map_or(reset, |previous| previous.max(reset)));
    }
}
