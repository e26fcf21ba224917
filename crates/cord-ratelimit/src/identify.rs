//! Identify queue
//!
//! Session starts are limited to `max_concurrency` at a time. Shard `s` waits on bucket
//! `s % max_concurrency`; a bucket hands out one ticket at a time and becomes ready again one
//! identify interval after the ticket is released.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

struct IdentifyBucket {
    permit: Arc<Semaphore>,
    ready_at: Arc<Mutex<Option<Instant>>>,
}

impl IdentifyBucket {
    fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            ready_at: Arc::new(Mutex::new(None)),
        }
    }
}

/// Queue of identify buckets
pub struct IdentifyQueue {
    buckets: Vec<IdentifyBucket>,
    interval: Duration,
}

impl IdentifyQueue {
    #[must_use]
    pub fn new(max_concurrency: u32, interval: Duration) -> Self {
        let buckets = (0..max_concurrency.max(1))
            .map(|_| IdentifyBucket::new())
            .collect();
        Self { buckets, interval }
    }

    pub fn max_concurrency(&self) -> u32 {
        self.buckets.len() as u32
    }

    /// Queue for `max_concurrency` that keeps this queue's spacing.
    ///
    /// Every new bucket waits for the latest ready time of the old buckets. A ticket still out on
    /// this queue counts as released now.
    #[must_use]
    pub fn resized(&self, max_concurrency: u32) -> Self {
        let now = Instant::now();
        let floor = self
            .buckets
            .iter()
            .filter_map(|bucket| {
                let ready_at = *bucket.ready_at.lock();
                if bucket.permit.available_permits() == 0 {
                    Some(now + self.interval).max(ready_at)
                } else {
                    ready_at
                }
            })
            .max();

        let queue = Self::new(max_concurrency, self.interval);
        for bucket in &queue.buckets {
            *bucket.ready_at.lock() = floor;
        }
        queue
    }

    /// Identify bucket used by `shard_id`
    pub fn bucket_for(&self, shard_id: u32) -> usize {
        shard_id as usize % self.buckets.len()
    }

    /// Wait for this shard's bucket, then return its ticket.
    ///
    /// Waiters on one bucket are served in arrival order. Returns `None` if the queue is closed.
    pub async fn acquire(&self, shard_id: u32) -> Option<IdentifyTicket> {
        let index = self.bucket_for(shard_id);
        let bucket = &self.buckets[index];

        let permit = Arc::clone(&bucket.permit).acquire_owned().await.ok()?;
        let ready_at = *bucket.ready_at.lock();
        if let Some(ready_at) = ready_at {
            tokio::time::sleep_until(ready_at).await;
        }

        tracing::debug!(shard_id, bucket = index, "Identify ticket granted");
        Some(IdentifyTicket {
            shard_id,
            bucket: index,
            ready_at: Arc::clone(&bucket.ready_at),
            interval: self.interval,
            _permit: permit,
        })
    }

    /// Close every bucket; pending and future `acquire` calls return `None`.
    pub fn close(&self) {
        for bucket in &self.buckets {
            bucket.permit.close();
        }
    }
}

/// Single-use permit to send one Identify
///
/// Dropping the ticket releases the bucket; the next shard in the bucket may identify one interval
/// later.
#[must_use = "dropping the ticket releases the identify bucket immediately"]
pub struct IdentifyTicket {
    shard_id: u32,
    bucket: usize,
    ready_at: Arc<Mutex<Option<Instant>>>,
    interval: Duration,
    _permit: OwnedSemaphorePermit,
}

impl IdentifyTicket {
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Release the ticket after READY (or after the attempt failed)
    pub fn release(self) {}
}

impl Drop for IdentifyTicket {
    fn drop(&mut self) {
        // Runs before the permit field is dropped, so the next waiter sees the new ready time.
        *self.ready_at.lock() = Some(Instant::now() + self.interval);
        tracing::trace!(shard_id = self.shard_id, bucket = self.bucket, "Identify ticket released");
    }
}

impl std::fmt::Debug for IdentifyTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifyTicket")
            .field("shard_id", &self.shard_id)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn test_first_ticket_is_immediate() {
        let queue = IdentifyQueue::new(1, INTERVAL);
        let start = Instant::now();
        let ticket = queue.acquire(0).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(ticket.shard_id(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_one_orders_shards() {
        let queue = Arc::new(IdentifyQueue::new(1, INTERVAL));
        let start = Instant::now();

        let ticket0 = queue.acquire(0).await.unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let _ticket = queue.acquire(1).await.unwrap();
                Instant::now()
            })
        };

        // Shard 0 holds its ticket for 2s (waiting for READY)
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!waiter.is_finished());
        let released_at = Instant::now();
        ticket0.release();

        let shard1_at = waiter.await.unwrap();
        assert!(shard1_at >= released_at + INTERVAL);
        assert_eq!(shard1_at.duration_since(start), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_shards_identify_in_sequence() {
        let queue = Arc::new(IdentifyQueue::new(1, INTERVAL));
        let start = Instant::now();

        let mut handles = Vec::new();
        for shard in 0..3 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let ticket = queue.acquire(shard).await.unwrap();
                let at = Instant::now();
                drop(ticket);
                at
            }));
            tokio::task::yield_now().await;
        }

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap().duration_since(start));
        }
        assert_eq!(times, vec![Duration::ZERO, INTERVAL, INTERVAL * 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_buckets_run_concurrently() {
        let queue = IdentifyQueue::new(2, INTERVAL);
        assert_eq!(queue.bucket_for(0), 0);
        assert_eq!(queue.bucket_for(3), 1);

        let start = Instant::now();
        let _a = queue.acquire(0).await.unwrap();
        let _b = queue.acquire(1).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resized_queue_waits_for_outstanding_ticket() {
        let queue = IdentifyQueue::new(1, INTERVAL);
        let start = Instant::now();
        let held = queue.acquire(0).await.unwrap();

        let resized = queue.resized(4);
        assert_eq!(resized.max_concurrency(), 4);
        let _ticket = resized.acquire(3).await.unwrap();
        assert_eq!(start.elapsed(), INTERVAL);
        drop(held);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_waiters() {
        let queue = Arc::new(IdentifyQueue::new(1, INTERVAL));
        let held = queue.acquire(0).await.unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.acquire(1).await.is_none() })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert!(waiter.await.unwrap());
        drop(held);
    }
}
