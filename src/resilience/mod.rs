//! Resilience layer for outbound calls.
//!
//! Every call to the model, the GA4 API or the Sheets API goes through a
//! [`Dependency`] guard: concurrency limit, per-call timeout bounded by the
//! query deadline, retry of transient faults with backoff, and a circuit
//! breaker shared by all requests hitting that dependency.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use retry::RetryPolicy;

use crate::config::ResilienceConfig;
use crate::error::{Fault, FaultCode};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Guard around one external dependency.
#[derive(Debug)]
pub struct Dependency {
    name: String,
    retry: RetryPolicy,
    call_timeout: Duration,
    breaker: CircuitBreaker,
    limiter: Semaphore,
}

impl Dependency {
    pub fn new(name: impl Into<String>, config: &ResilienceConfig) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(
                name.clone(),
                config.failure_threshold,
                Duration::from_secs(config.cooldown_seconds),
            ),
            retry: RetryPolicy::from(config),
            call_timeout: Duration::from_secs(config.call_timeout_seconds),
            limiter: Semaphore::new(config.max_concurrent_calls.max(1)),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `op` under this guard until it succeeds, fails permanently,
    /// runs out of attempts, or the deadline passes.
    ///
    /// A transient fault returned from here means retries were exhausted.
    pub async fn call<T, F, Fut>(&self, deadline: Instant, mut op: F) -> Result<T, Fault>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if Instant::now() >= deadline {
                return Err(Fault::deadline_exceeded());
            }

            if self.breaker.admit() == Admission::Rejected {
                debug!(dependency = %self.name, "Circuit open, failing fast");
                return Err(Fault::circuit_open(&self.name));
            }

            let outcome = self.attempt(deadline, &mut op).await;

            let fault = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(fault) => fault,
            };

            if fault.code.counts_against_dependency() {
                self.breaker.record_failure();
            } else {
                self.breaker.release_trial();
            }

            if !fault.code.is_transient() || attempt >= self.retry.max_attempts {
                if fault.code.is_transient() {
                    warn!(
                        dependency = %self.name,
                        attempts = attempt,
                        code = %fault.code,
                        "Retries exhausted"
                    );
                }
                return Err(fault);
            }

            let delay = self.retry.delay_for(attempt);
            if Instant::now() + delay >= deadline {
                debug!(dependency = %self.name, "No time left for another attempt");
                return Err(fault);
            }

            debug!(
                dependency = %self.name,
                attempt,
                code = %fault.code,
                delay_ms = delay.as_millis() as u64,
                "Transient fault, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt<T, F, Fut>(&self, deadline: Instant, op: &mut F) -> Result<T, Fault>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let _permit = match timeout_at(deadline, self.limiter.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Fault::unavailable(format!("{} limiter closed", self.name))),
            Err(_) => return Err(Fault::deadline_exceeded()),
        };

        let call_deadline = (Instant::now() + self.call_timeout).min(deadline);
        match timeout_at(call_deadline, op()).await {
            Ok(result) => result,
            Err(_) if call_deadline >= deadline => Err(Fault::deadline_exceeded()),
            Err(_) => Err(Fault::new(
                FaultCode::Timeout,
                format!(
                    "{} did not respond within {}s",
                    self.name,
                    self.call_timeout.as_secs()
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn settings() -> ResilienceConfig {
        ResilienceConfig {
            call_timeout_seconds: 5,
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            failure_threshold: 3,
            cooldown_seconds: 30,
            max_concurrent_calls: 2,
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let dep = Dependency::new("ga4", &settings());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result = dep
            .call(far_deadline(), move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Fault::unavailable("503"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dep.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fault_propagates_immediately() {
        let dep = Dependency::new("ga4", &settings());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result: Result<(), Fault> = dep
            .call(far_deadline(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Fault::new(FaultCode::Auth, "unauthorized")) }
            })
            .await;

        assert_eq!(result.unwrap_err().code, FaultCode::Auth);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_and_short_circuits_without_io() {
        let dep = Dependency::new("sheets", &settings());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let first: Result<(), Fault> = dep
            .call(far_deadline(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Fault::unavailable("503")) }
            })
            .await;
        assert_eq!(first.unwrap_err().code, FaultCode::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(dep.state(), CircuitState::Open);

        let counter = calls.clone();
        let second: Result<(), Fault> = dep
            .call(far_deadline(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(second.unwrap_err().code, FaultCode::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_after_cooldown_closes_circuit() {
        let dep = Dependency::new("model", &settings());
        let _: Result<(), Fault> = dep
            .call(far_deadline(), || async { Err(Fault::unavailable("down")) })
            .await;
        assert_eq!(dep.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        let result = dep.call(far_deadline(), || async { Ok("up") }).await;
        assert_eq!(result, Ok("up"));
        assert_eq!(dep.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_faults_do_not_open_circuit() {
        let dep = Dependency::new("ga4", &settings());
        for _ in 0..5 {
            let _: Result<(), Fault> = dep
                .call(far_deadline(), || async {
                    Err(Fault::invalid_argument("unknown metric"))
                })
                .await;
        }
        assert_eq!(dep.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let dep = Dependency::new("ga4", &settings());
        let result: Result<(), Fault> = dep
            .call(far_deadline(), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().code, FaultCode::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_the_call() {
        let dep = Dependency::new("ga4", &settings());
        let deadline = Instant::now() + Duration::from_secs(1);
        let result: Result<(), Fault> = dep
            .call(deadline, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().code, FaultCode::DeadlineExceeded);
        assert_eq!(dep.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_skips_call() {
        let dep = Dependency::new("ga4", &settings());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<(), Fault> = dep
            .call(Instant::now(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(result.unwrap_err().code, FaultCode::DeadlineExceeded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
