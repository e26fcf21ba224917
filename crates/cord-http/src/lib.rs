//! # cord-http
//!
//! REST client for the gateway's companion API.
//!
//! Every request goes through the shared [`RateLimiter`](cord_ratelimit::RateLimiter): the route's
//! scope keys are acquired first, response headers feed the buckets back, and 429s block the scope
//! for at least the server's hint before the request is retried.

pub mod client;
pub mod headers;
pub mod metadata;
pub mod route;

pub use client::RestClient;
pub use headers::{RateLimitBody, RateLimitHeaders};
pub use metadata::{GatewayBotInfo, GatewayMetadata, SessionStartLimit};
pub use route::Route;
