//! # Circuit Breaker Implementation
//!
//! Guards browser launches. Three states: Closed (launches allowed), Open
//! (failing fast until the cooldown elapses) and Half-Open (exactly one probe
//! launch in flight at a time).
//!
//! Unlike a call-wrapping breaker, admission and outcome are split
//! ([`CircuitBreaker::try_admit`] then `record_*`) because the pool has to
//! reserve capacity under its own lock between the two.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - launches are allowed
    Closed,
    /// Failure mode - launches fail fast without executing
    Open,
    /// Testing recovery - a single probe launch at a time
    HalfOpen,
}

/// Result of asking the breaker whether a launch may proceed
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Closed: launch normally
    Allowed,
    /// Half-open: this launch is the single recovery probe
    Probe,
    /// Half-open and another probe is already running
    ProbeInFlight,
    /// Open: fail fast
    Rejected { retry_after: Duration, reason: String },
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u64,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    half_open_successes: u64,
    last_failure_reason: Option<String>,
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    times_opened: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            half_open_successes: 0,
            last_failure_reason: None,
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            times_opened: 0,
        }
    }

    fn remaining_cooldown(&self, timeout: Duration) -> Option<Duration> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(timeout.saturating_sub(opened_at.elapsed())),
            _ => None,
        }
    }
}

/// Circuit breaker with mutex-guarded state. The lock is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask whether a launch may proceed.
    ///
    /// An Open breaker whose cooldown has elapsed moves to Half-Open and hands
    /// out the probe. While that probe runs every other caller gets
    /// [`Admission::ProbeInFlight`].
    pub fn try_admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed())
                    .unwrap_or(self.config.timeout);

                if elapsed >= self.config.timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.probe_in_flight = true;
                    info!(
                        component = %self.name,
                        success_threshold = self.config.success_threshold,
                        "Circuit breaker half-open (testing recovery)"
                    );
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_after: self.config.timeout.saturating_sub(elapsed),
                        reason: inner
                            .last_failure_reason
                            .clone()
                            .unwrap_or_else(|| "circuit open".to_string()),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::ProbeInFlight
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Whether the breaker is Open and its cooldown has already elapsed.
    /// The self-heal loop uses this to probe without demand.
    pub fn is_probe_due(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == CircuitState::Open
            && inner
                .opened_at
                .map(|opened_at| opened_at.elapsed() >= self.config.timeout)
                .unwrap_or(true)
    }

    /// Remaining cooldown while Open
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        self.inner.lock().remaining_cooldown(self.config.timeout)
    }

    /// Reason of the most recent failure, kept until the breaker closes
    pub fn last_failure_reason(&self) -> Option<String> {
        self.inner.lock().last_failure_reason.clone()
    }

    /// Record a successful launch
    pub fn record_success(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.success_count += 1;

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Launch succeeded"
        );

        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold as u64 {
                    self.transition_to_closed(&mut inner);
                }
            }
            CircuitState::Closed => {
                // Isolated blips do not accumulate
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed launch
    pub fn record_failure(&self, duration: Duration, reason: &str) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.failure_count += 1;
        inner.consecutive_failures += 1;
        inner.last_failure_reason = Some(reason.to_string());

        error!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            reason = %reason,
            "Launch failed"
        );

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold as u64 {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                // Cooldown restarts from this failure
                inner.probe_in_flight = false;
                self.transition_to_open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.probe_in_flight = false;
        inner.opened_at = None;
        inner.last_failure_reason = None;

        info!(
            component = %self.name,
            total_calls = inner.total_calls,
            "Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_successes = 0;
        inner.times_opened += 1;

        error!(
            component = %self.name,
            consecutive_failures = inner.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Circuit breaker opened (failing fast)"
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
        if inner.last_failure_reason.is_none() {
            inner.last_failure_reason = Some("circuit forced open".to_string());
        }
        self.transition_to_open(&mut inner);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.transition_to_closed(&mut inner);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let failure_rate = if inner.total_calls > 0 {
            inner.failure_count as f64 / inner.total_calls as f64
        } else {
            0.0
        };

        CircuitBreakerMetrics {
            total_calls: inner.total_calls,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            probe_in_flight: inner.probe_in_flight,
            times_opened: inner.times_opened,
            current_state: inner.state,
            last_failure_reason: inner.last_failure_reason.clone(),
            remaining_cooldown: inner.remaining_cooldown(self.config.timeout),
            failure_rate,
        }
    }

    /// Check if circuit breaker is healthy
    pub fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, timeout_ms: u64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test".to_string(),
            CircuitBreakerConfig {
                failure_threshold,
                timeout: Duration::from_millis(timeout_ms),
                success_threshold,
            },
        )
    }

    fn fail(cb: &CircuitBreaker, times: usize) {
        for _ in 0..times {
            cb.record_failure(Duration::from_millis(1), "chromium crashed");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_opens_at_threshold() {
        let cb = breaker(3, 1000, 1);

        fail(&cb, 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.try_admit(), Admission::Allowed);

        fail(&cb, 1);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        match cb.try_admit() {
            Admission::Rejected { retry_after, reason } => {
                assert_eq!(reason, "chromium crashed");
                assert!(retry_after <= Duration::from_millis(999));
                assert!(retry_after > Duration::from_millis(900));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_success_resets_closed_failures() {
        let cb = breaker(3, 1000, 1);
        fail(&cb, 2);
        cb.record_success(Duration::from_millis(5));
        fail(&cb, 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_single_probe() {
        let cb = breaker(1, 1000, 1);
        fail(&cb, 1);
        assert!(!cb.is_probe_due());

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(cb.is_probe_due());
        assert_eq!(cb.try_admit(), Admission::Probe);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.try_admit(), Admission::ProbeInFlight);

        cb.record_success(Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
        assert!(cb.last_failure_reason().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_failure_restarts_cooldown() {
        let cb = breaker(1, 1000, 1);
        fail(&cb, 1);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(cb.try_admit(), Admission::Probe);

        cb.record_failure(Duration::from_millis(1), "probe failed");
        assert_eq!(cb.state(), CircuitState::Open);

        // Cooldown measured from the probe failure, not the original opening
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(matches!(cb.try_admit(), Admission::Rejected { .. }));
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(cb.try_admit(), Admission::Probe);
        assert_eq!(cb.metrics().times_opened, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_success_threshold_closes() {
        let cb = breaker(1, 100, 2);
        fail(&cb, 1);
        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(cb.try_admit(), Admission::Probe);
        cb.record_success(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert_eq!(cb.try_admit(), Admission::Probe);
        cb.record_success(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }

    #[test]
    fn test_circuit_breaker_force_transitions() {
        let cb = breaker(5, 60_000, 1);
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_healthy());
        assert!(matches!(cb.try_admit(), Admission::Rejected { .. }));

        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.try_admit(), Admission::Allowed);
    }
}
