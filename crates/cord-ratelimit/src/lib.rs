//! # cord-ratelimit
//!
//! Rate limiting for REST requests and gateway identifies.
//!
//! REST budgets are tracked per scope (route + major parameter, or a specific resource) plus one
//! global bucket. [`RateLimiter::acquire`] never blocks: it either grants the request or returns
//! how long to wait. Identify tickets come from an [`IdentifyQueue`] that spaces session starts
//! according to the remote's `max_concurrency`.
//!
//! All timing uses `tokio::time::Instant`, so tests drive the limiter with a paused clock.

mod bucket;
mod identify;
mod limiter;

pub use bucket::{Bucket, BucketSnapshot, BucketUpdate, PENDING_RESERVATION_TIMEOUT};
pub use identify::{IdentifyQueue, IdentifyTicket};
pub use limiter::{
    Acquire, CustomLimit, RateLimiter, DEFAULT_GLOBAL_PER_SECOND, DEFAULT_IDENTIFY_INTERVAL,
    GLOBAL_SCOPE,
};
