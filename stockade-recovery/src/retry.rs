//! Retryability and backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Errors that no amount of retrying will fix.
const PERMANENT_ERROR_MARKERS: &[&str] = &[
    "no space left on device",
    "read-only file system",
    "out of memory",
    "disk full",
];

/// Exponential backoff with equal jitter.
///
/// The raw delay for attempt `n` is `initial * multiplier^(n-1)`, capped at
/// `max_delay`; the returned delay is drawn uniformly from the upper half
/// of that interval (`d/2 + uniform(0, d/2)`) so synchronized retries
/// spread out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier: multiplier.max(1.0),
            max_delay,
        }
    }

    /// Whether retrying this error can ever help.
    pub fn is_retryable(&self, error: &str) -> bool {
        let lowered = error.to_lowercase();
        !PERMANENT_ERROR_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    }

    /// The jittered delay before retry attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        if capped <= 0.0 {
            return Duration::ZERO;
        }
        let half = capped / 2.0;
        let jittered = half + rand::rng().random_range(0.0..=half);
        Duration::from_secs_f64(jittered)
    }
}
