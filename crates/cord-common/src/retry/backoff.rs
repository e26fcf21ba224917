use rand::Rng;
use std::time::Duration;

/// Exponential backoff with symmetric jitter
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for later retries
    pub max_delay: Duration,
    /// Jitter ratio in `0.0..=1.0`
    pub jitter_ratio: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::http()
    }
}

impl Backoff {
    /// Retries of failed REST requests
    #[must_use]
    pub fn http() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            jitter_ratio: 0.2,
        }
    }

    /// Gateway reconnect attempts
    #[must_use]
    pub fn gateway() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.25,
        }
    }

    /// Backoff without jitter, for deterministic tests
    #[must_use]
    pub fn fixed(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_ratio: 0.0,
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based)
    pub fn base(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.with_jitter(self.base(attempt))
    }

    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let millis = delay.as_millis() as f64;
        let spread = millis * ratio;
        let low = (millis - spread).max(0.0);
        let high = millis + spread;
        if high <= low {
            return Duration::from_millis(low as u64);
        }
        let sampled = rand::thread_rng().gen_range(low..high);
        Duration::from_millis(sampled.round() as u64)
    }
}
