//! Per-dependency circuit breaker.
//!
//! After `failure_threshold` consecutive failures the circuit opens and
//! every call is rejected until `cooldown` has elapsed. The first call after
//! that is admitted as a trial (half-open): success closes the circuit,
//! failure opens it again for another cool-down.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn to_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single trial call allowed while half-open.
    Trial,
    Rejected,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
    /// Mirror of `inner.state` for lock-free health reads.
    observed: AtomicU8,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_started: None,
            }),
            observed: AtomicU8::new(CircuitState::Closed.to_u8()),
        }
    }

    /// Best-effort state for health reporting; never takes the lock.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.observed.load(Ordering::Relaxed))
    }

    pub fn admit(&self) -> Admission {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at) >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    info!(dependency = %self.name, "Circuit half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started = Some(now);
                    self.publish(CircuitState::HalfOpen);
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                // A trial whose caller was cancelled never reports back;
                // allow a fresh one once it is older than the cool-down.
                let stale = inner
                    .trial_started
                    .map(|at| now.saturating_duration_since(at) >= self.cooldown)
                    .unwrap_or(true);
                if stale {
                    inner.trial_started = Some(now);
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(dependency = %self.name, "Circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_started = None;
        self.publish(CircuitState::Closed);
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            warn!(
                dependency = %self.name,
                failures = inner.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs_f64(),
                "Circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_started = None;
            self.publish(CircuitState::Open);
        }
    }

    /// End a trial without a verdict (the call failed for a reason that
    /// says nothing about the dependency).
    pub fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_started = None;
        }
    }

    fn publish(&self, state: CircuitState) {
        self.observed.store(state.to_u8(), Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("ga4", 3, Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.admit(), Admission::Allowed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.admit(), Admission::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_count() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.admit(), Admission::Trial);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.admit(), Admission::Rejected);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.admit(), Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.admit(), Admission::Trial);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.admit(), Admission::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_trial_can_be_retaken() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.admit(), Admission::Trial);
        breaker.release_trial();
        assert_eq!(breaker.admit(), Admission::Trial);
    }
}
