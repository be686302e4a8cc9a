//! Exponential backoff policy for failed dispatch attempts.
//!
//! Pure delay computation: `base * 2^(attempt-1)`, clamped to a maximum, then
//! multiplied by a uniform ±15% jitter so a fleet of workers retrying the
//! same backlog doesn't thunder in lockstep.

use rand::Rng;
use std::time::Duration;

/// Backoff configuration for dispatch retries.
///
/// # Default Values
///
/// - `base_delay`: 2 seconds
/// - `max_delay`: 5 minutes
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay for the first retry (attempt 1)
    pub base_delay: Duration,
    /// Cap for the exponential growth
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with explicit base and maximum delays.
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Compute the delay before the next dispatch attempt.
    ///
    /// `attempt` is the post-increment attempt count: the first retry passes
    /// 1. The result is `base * 2^(attempt-1)` clamped to `max_delay`, with a
    /// jitter factor drawn uniformly from `[0.85, 1.15]`, and never negative.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        let exp = f64::powi(2.0, (attempt - 1).max(0));
        let mut ms = duration_as_ms(self.base_delay) * exp;

        ms = ms.min(duration_as_ms(self.max_delay));

        let jitter = rand::thread_rng().gen_range(0.85..=1.15);
        ms *= jitter;

        Duration::from_millis(to_millis_clamped(ms))
    }
}

fn duration_as_ms(d: Duration) -> f64 {
    // u128 -> f64 precision loss is irrelevant at these magnitudes
    #[allow(clippy::cast_precision_loss)]
    {
        d.as_millis() as f64
    }
}

fn to_millis_clamped(ms: f64) -> u64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        ms.max(0.0) as u64
    }
}
