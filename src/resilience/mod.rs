//! # Resilience Module
//!
//! Circuit breaker protecting browser launches. When launches keep failing the
//! pool stops spawning processes, fails fast with the last recorded reason, and
//! probes for recovery one launch at a time once the cooldown has elapsed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use broker_session::resilience::{Admission, CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new("browser_launch".to_string(), CircuitBreakerConfig::default());
//!
//! match breaker.try_admit() {
//!     Admission::Allowed | Admission::Probe => {
//!         // launch, then record the outcome
//!         breaker.record_failure(Duration::from_millis(120), "chromium exited with code 1");
//!     }
//!     Admission::Rejected { reason, retry_after } => {
//!         println!("blocked for {retry_after:?}: {reason}");
//!     }
//!     Admission::ProbeInFlight => {}
//! }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
