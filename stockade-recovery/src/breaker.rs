//! Circuit breaker over recovery attempts.
//!
//! Closed is the normal state. A run of consecutive failures opens the
//! circuit; while open, [`CircuitBreaker::allow`] refuses attempts until
//! the reset timeout elapses, then a single half-open probe is let through.
//! The probe's outcome either closes the circuit or re-opens it with a
//! doubled timeout, bounded between the configured minimum and maximum.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Initial open interval before a half-open probe.
    pub reset_timeout: Duration,
    /// Lower bound on the open interval.
    pub min_reset_timeout: Duration,
    /// Upper bound the doubling can reach.
    pub max_reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            min_reset_timeout: Duration::from_secs(10),
            max_reset_timeout: Duration::from_secs(300),
        }
    }
}

/// Point-in-time snapshot for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerDiagnostics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub times_opened: u64,
    pub current_reset_timeout: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    times_opened: u64,
    opened_at: Option<Instant>,
    current_reset_timeout: Duration,
}

impl BreakerInner {
    fn transition(&mut self, to: CircuitState) {
        if self.state == to {
            return;
        }
        if transition_is_legal(self.state, to) {
            debug!(from = %self.state, to = %to, "circuit breaker transition");
            self.state = to;
        } else {
            // Fail safe: an illegal transition is a logic bug, but a
            // security component must not panic over it.
            warn!(from = %self.state, to = %to, "illegal circuit breaker transition ignored");
        }
    }
}

const fn transition_is_legal(from: CircuitState, to: CircuitState) -> bool {
    matches!(
        (from, to),
        (CircuitState::Closed, CircuitState::Open)
            | (CircuitState::Open, CircuitState::HalfOpen)
            | (CircuitState::HalfOpen, CircuitState::Open)
            | (CircuitState::HalfOpen, CircuitState::Closed)
    )
}

/// Shared failure gate; interior-mutable so one instance can be consulted
/// from `&self` across tasks.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let initial_timeout = config
            .reset_timeout
            .clamp(config.min_reset_timeout, config.max_reset_timeout);
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                total_failures: 0,
                total_successes: 0,
                times_opened: 0,
                opened_at: None,
                current_reset_timeout: initial_timeout,
            }),
        }
    }

    /// Whether an attempt may proceed right now. An open circuit whose
    /// timeout has elapsed moves to half-open and lets this attempt through
    /// as the probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed());
                if elapsed.is_some_and(|elapsed| elapsed >= inner.current_reset_timeout) {
                    inner.transition(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.transition(CircuitState::Closed);
            inner.opened_at = None;
            inner.current_reset_timeout = self
                .config
                .reset_timeout
                .clamp(self.config.min_reset_timeout, self.config.max_reset_timeout);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.consecutive_failures += 1;
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        if inner.times_opened > 0 {
            inner.current_reset_timeout =
                (inner.current_reset_timeout * 2).min(self.config.max_reset_timeout);
        }
        inner.times_opened += 1;
        inner.opened_at = Some(Instant::now());
        warn!(
            consecutive_failures = inner.consecutive_failures,
            reset_timeout = ?inner.current_reset_timeout,
            "circuit breaker opened"
        );
        inner.transition(CircuitState::Open);
    }

    /// Manual override back to closed; counters for the current run are
    /// cleared, lifetime totals are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        debug!(from = %inner.state, "circuit breaker manually reset");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.current_reset_timeout = self
            .config
            .reset_timeout
            .clamp(self.config.min_reset_timeout, self.config.max_reset_timeout);
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn diagnostics(&self) -> BreakerDiagnostics {
        let inner = self.inner.lock();
        BreakerDiagnostics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            times_opened: inner.times_opened,
            current_reset_timeout: inner.current_reset_timeout,
        }
    }
}
