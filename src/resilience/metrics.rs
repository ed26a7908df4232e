//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshot of a circuit breaker, exposed through pool stats.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of recorded outcomes
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls
    pub failure_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Consecutive successful half-open probes
    pub half_open_successes: u64,

    /// Whether a half-open probe is currently running
    pub probe_in_flight: bool,

    /// How many times the circuit has opened
    pub times_opened: u64,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Last failure reason, kept until the circuit closes
    pub last_failure_reason: Option<String>,

    /// Remaining cooldown when open
    pub remaining_cooldown: Option<Duration>,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,
}

impl CircuitBreakerMetrics {
    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.5,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all launches",
            CircuitState::HalfOpen => "Recovering - Probing with a single launch",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Failures: {} | Consecutive: {} | Opened: {}x",
            self.state_description(),
            self.total_calls,
            self.failure_count,
            self.consecutive_failures,
            self.times_opened
        )
    }
}
