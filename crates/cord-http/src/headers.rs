//! Rate-limit response headers and 429 bodies

use cord_ratelimit::BucketUpdate;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use std::time::Duration;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const SCOPE: &str = "x-ratelimit-scope";

/// Rate-limit state carried by one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    pub bucket: Option<String>,
    /// The 429 came from the global limit
    pub global: bool,
    /// `user`, `global` or `shared`
    pub scope: Option<String>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    pub fn parse(headers: &HeaderMap) -> Self {
        Self {
            limit: header_str(headers, LIMIT).and_then(|v| v.parse().ok()),
            remaining: header_str(headers, REMAINING).and_then(|v| v.parse().ok()),
            reset_after: header_str(headers, RESET_AFTER).and_then(parse_seconds),
            bucket: header_str(headers, BUCKET).map(str::to_string),
            global: header_str(headers, GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: header_str(headers, SCOPE).map(str::to_string),
            retry_after: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_seconds),
        }
    }

    /// Bucket state, when the response reported a complete one
    pub fn bucket_update(&self) -> Option<BucketUpdate> {
        Some(BucketUpdate {
            limit: self.limit?,
            remaining: self.remaining?,
            reset_after: self.reset_after?,
            bucket: self.bucket.clone(),
        })
    }

    /// Whether the 429 applies to every route (global limit)
    pub fn is_global(&self) -> bool {
        self.global || self.scope.as_deref() == Some("global")
    }
}

/// JSON body of a 429 response
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitBody {
    #[serde(default)]
    pub message: String,
    /// Seconds, fractional
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}

impl RateLimitBody {
    pub fn retry_after(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.retry_after).ok()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
