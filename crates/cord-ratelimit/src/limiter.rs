//! Rate limiter
//!
//! Owns every REST bucket, the global bucket and the identify queue.

use crate::bucket::{Bucket, BucketSnapshot, BucketUpdate};
use crate::identify::{IdentifyQueue, IdentifyTicket};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Scope key of the global REST bucket
pub const GLOBAL_SCOPE: &str = "global";

/// Default global REST budget per second
pub const DEFAULT_GLOBAL_PER_SECOND: u32 = 50;

/// Default spacing between identifies in one identify bucket
pub const DEFAULT_IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of [`RateLimiter::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Budget reserved; the request may go out now
    Granted,
    /// Nothing reserved; try again after this long
    Wait(Duration),
}

impl Acquire {
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Locally enforced limit for every scope key starting with `prefix`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomLimit {
    pub prefix: String,
    pub limit: u32,
    pub window: Duration,
}

impl CustomLimit {
    pub fn new(prefix: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            limit,
            window,
        }
    }

    /// One reaction per 250 ms per channel
    #[must_use]
    pub fn reactions() -> Self {
        Self::new("reactions:", 1, Duration::from_millis(250))
    }
}

/// Shared REST and identify rate limiter
///
/// Each scope has its own lock, so unrelated routes never contend. Cloning the `Arc` around the
/// limiter is the intended way to share it between the REST client and the shard coordinator.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
    global: Arc<Mutex<Bucket>>,
    custom: RwLock<Vec<CustomLimit>>,
    identify: RwLock<Arc<IdentifyQueue>>,
    identify_interval: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_PER_SECOND, DEFAULT_IDENTIFY_INTERVAL)
    }
}

impl RateLimiter {
    /// Create a limiter with the given global budget and identify spacing.
    ///
    /// The identify queue starts with a single bucket until gateway metadata reports the real
    /// `max_concurrency`. The reactions limit is registered by default.
    #[must_use]
    pub fn new(global_per_second: u32, identify_interval: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            global: Arc::new(Mutex::new(Bucket::with_window(
                GLOBAL_SCOPE,
                global_per_second,
                Duration::from_secs(1),
            ))),
            custom: RwLock::new(vec![CustomLimit::reactions()]),
            identify: RwLock::new(Arc::new(IdentifyQueue::new(1, identify_interval))),
            identify_interval,
        }
    }

    /// Register a custom limit. Applies to buckets created afterwards.
    pub fn register_custom_limit(&self, limit: CustomLimit) {
        let mut custom = self.custom.write();
        custom.retain(|existing| existing.prefix != limit.prefix);
        custom.push(limit);
    }

    /// Try to reserve `cost` from `scope_key` and the global bucket.
    pub fn acquire(&self, scope_key: &str, cost: u32) -> Acquire {
        self.acquire_all(&[scope_key], cost)
    }

    /// Try to reserve `cost` from every scope in `scope_keys` plus the global bucket.
    ///
    /// Either every bucket is charged or none is. When any bucket is short the longest wait is
    /// returned.
    pub fn acquire_all(&self, scope_keys: &[&str], cost: u32) -> Acquire {
        let mut keys: Vec<&str> = scope_keys
            .iter()
            .copied()
            .filter(|key| *key != GLOBAL_SCOPE)
            .collect();
        keys.sort_unstable();
        keys.dedup();

        // Locks are always taken in key order, then global, so concurrent callers cannot deadlock.
        let handles: Vec<Arc<Mutex<Bucket>>> = keys.iter().map(|key| self.bucket(key)).collect();
        let mut guards: Vec<_> = handles.iter().map(|bucket| bucket.lock()).collect();
        let mut global = self.global.lock();

        let now = Instant::now();
        let wait = guards
            .iter_mut()
            .map(|bucket| bucket.wait_time(cost, now))
            .chain(std::iter::once(global.wait_time(cost, now)))
            .max()
            .unwrap_or(Duration::ZERO);

        if !wait.is_zero() {
            tracing::trace!(scopes = ?keys, wait_ms = wait.as_millis(), "Rate limit wait");
            return Acquire::Wait(wait);
        }

        for bucket in &mut guards {
            bucket.consume(cost, now);
        }
        global.consume(cost, now);
        Acquire::Granted
    }

    /// Wait until `cost` can be reserved from every scope, then reserve it.
    pub async fn until_ready(&self, scope_keys: &[&str], cost: u32) {
        while let Acquire::Wait(wait) = self.acquire_all(scope_keys, cost) {
            tokio::time::sleep(wait).await;
        }
    }

    /// Apply rate-limit state reported in a response
    pub fn update(&self, scope_key: &str, update: &BucketUpdate) {
        let bucket = self.bucket(scope_key);
        bucket.lock().update(update, Instant::now());
    }

    /// Give back `cost` on scopes whose request got no rate-limit state from the remote.
    ///
    /// Scopes with a live window are left alone.
    pub fn release(&self, scope_keys: &[&str], cost: u32) {
        let now = Instant::now();
        for key in scope_keys.iter().filter(|key| **key != GLOBAL_SCOPE) {
            let bucket = self.buckets.get(*key).map(|bucket| Arc::clone(&bucket));
            if let Some(bucket) = bucket {
                bucket.lock().release(cost, now);
            }
        }
    }

    /// Record a 429: the scope (or the global bucket) is empty for at least `retry_after`.
    pub fn rate_limited(&self, scope_key: &str, retry_after: Duration, global: bool) {
        let now = Instant::now();
        if global {
            tracing::warn!(retry_after_ms = retry_after.as_millis(), "Global rate limit hit");
            self.global.lock().block_for(retry_after, now);
        } else {
            tracing::warn!(
                scope = scope_key,
                retry_after_ms = retry_after.as_millis(),
                "Rate limit hit"
            );
            self.bucket(scope_key).lock().block_for(retry_after, now);
        }
    }

    /// Current state of a scope, if it has been used
    pub fn snapshot(&self, scope_key: &str) -> Option<BucketSnapshot> {
        if scope_key == GLOBAL_SCOPE {
            return Some(self.global.lock().snapshot());
        }
        self.buckets
            .get(scope_key)
            .map(|bucket| bucket.lock().snapshot())
    }

    /// Number of tracked scopes, excluding the global bucket
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets that are full and unused for at least `idle_for`.
    ///
    /// Returns how many were removed.
    pub fn prune_idle(&self, idle_for: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| match bucket.try_lock() {
            Some(bucket) => {
                let unused_for = now.saturating_duration_since(bucket.last_used());
                !(bucket.is_idle(now) && unused_for >= idle_for)
            }
            None => true,
        });
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, "Pruned idle rate limit buckets");
        }
        removed
    }

    /// Wait for an identify ticket for `shard_id`.
    ///
    /// Returns `None` once the identify queue has been closed for shutdown.
    pub async fn acquire_identify(&self, shard_id: u32) -> Option<IdentifyTicket> {
        let queue = Arc::clone(&self.identify.read());
        queue.acquire(shard_id).await
    }

    /// Rebuild the identify queue for the remote's `max_concurrency`.
    ///
    /// Tickets already handed out stay valid; new requests use the new queue, which starts no
    /// earlier than the old one would have allowed.
    pub fn set_max_concurrency(&self, max_concurrency: u32) {
        let mut identify = self.identify.write();
        if identify.max_concurrency() == max_concurrency.max(1) {
            return;
        }
        tracing::debug!(max_concurrency, "Rebuilding identify queue");
        let resized = identify.resized(max_concurrency);
        *identify = Arc::new(resized);
    }

    /// `max_concurrency` of the current identify queue
    pub fn max_concurrency(&self) -> u32 {
        self.identify.read().max_concurrency()
    }

    /// Wake every identify waiter with `None`
    pub fn close_identify(&self) {
        self.identify.read().close();
    }

    fn bucket(&self, scope_key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.get(scope_key) {
            return Arc::clone(&bucket);
        }
        let bucket = self.new_bucket(scope_key);
        Arc::clone(
            &self
                .buckets
                .entry(scope_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(bucket))),
        )
    }

    fn new_bucket(&self, scope_key: &str) -> Bucket {
        self.custom
            .read()
            .iter()
            .find(|custom| scope_key.starts_with(&custom.prefix))
            .map_or_else(
                || Bucket::new(scope_key),
                |custom| Bucket::with_window(scope_key, custom.limit, custom.window),
            )
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("buckets", &self.buckets.len())
            .field("max_concurrency", &self.max_concurrency())
            .field("identify_interval", &self.identify_interval)
            .finish_non_exhaustive()
    }
}
