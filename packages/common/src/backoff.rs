use std::time::Duration;

use rand::Rng;

/// Maps a record's retry count to the delay before its next attempt.
///
/// Implementations must be pure: the same retry count always yields the same
/// delay (jittered policies excepted). Any `Fn(u32) -> Duration` closure is a
/// policy, so callers can plug in their own curve.
pub trait BackoffPolicy: Send + Sync {
    fn delay(&self, retry_count: u32) -> Duration;
}

impl<F> BackoffPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, retry_count: u32) -> Duration {
        self(retry_count)
    }
}

/// Default schedule: 1 minute, 5 minutes, 15 minutes, then hourly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagedBackoff;

impl StagedBackoff {
    const MINUTE: u64 = 60;

    pub const fn delay_for(retry_count: u32) -> Duration {
        let minutes = match retry_count {
            0 => 1,
            1 => 5,
            2 => 15,
            _ => 60,
        };
        Duration::from_secs(minutes * Self::MINUTE)
    }
}

impl BackoffPolicy for StagedBackoff {
    fn delay(&self, retry_count: u32) -> Duration {
        Self::delay_for(retry_count)
    }
}

/// Capped exponential backoff with optional jitter.
///
/// Formula: `min(base_ms * 2^retry_count + jitter, max_ms)` (0-25% jitter)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, retry_count: u32) -> Duration {
        let exp_factor = 2u64.saturating_pow(retry_count);
        let delay_ms = self.base_ms.saturating_mul(exp_factor);

        let jitter = if self.jitter && delay_ms > 0 {
            rand::rng().random_range(0..=delay_ms / 4)
        } else {
            0
        };

        let total_delay = delay_ms.saturating_add(jitter).min(self.max_ms);
        Duration::from_millis(total_delay)
    }
}
