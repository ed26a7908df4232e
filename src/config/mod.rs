//! # Session Keeper Configuration System
//!
//! Layered configuration for the browser pool, circuit breaker, distributed
//! lock, refresh orchestrator and scheduler.
//!
//! ## Architecture
//!
//! - **Defaults in code**: every section has a `Default` and `#[serde(default)]`
//! - **Layered sources**: `session-keeper.toml`, `session-keeper.{env}.toml`,
//!   then `SESSION_KEEPER__SECTION__FIELD` environment variables
//! - **Explicit validation**: out-of-range values fail loading, never silently clamp
//!
//! ## Usage
//!
//! ```rust,no_run
//! use broker_session::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let max_size = manager.config().pool.max_size;
//! let cooldown = manager.config().circuit_breaker.reset_timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{defaults, keys};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Headless browser pool sizing and lifecycle
    pub pool: PoolConfig,

    /// Circuit breaker guarding browser launches
    pub circuit_breaker: CircuitBreakerSettings,

    /// Cross-process refresh locks
    pub lock: LockConfig,

    /// Refresh retry policy
    pub orchestrator: OrchestratorConfig,

    /// Sweep timing
    pub scheduler: SchedulerConfig,
}

impl SessionConfig {
    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.pool.validate()?;
        self.circuit_breaker.validate()?;
        self.lock.validate()?;
        self.orchestrator.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

/// Browser pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: usize,
    pub idle_timeout_ms: u64,
    pub max_age_ms: u64,
    pub max_queue_size: usize,
    /// Hard deadline for a queued acquisition
    pub acquire_timeout_ms: u64,
    /// Leases older than this are reclaimed by the sweep
    pub stale_lease_ms: u64,
    pub sweep_interval_ms: u64,
    /// Self-heal runs more often than the sweep
    pub self_heal_interval_ms: u64,
    /// Used-memory fraction (0.0 - 1.0) above which launches are deferred
    pub memory_pressure_threshold: f64,
    pub memory_recheck_delay_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: defaults::MAX_POOL_SIZE,
            idle_timeout_ms: 5 * 60 * 1000,
            max_age_ms: 30 * 60 * 1000,
            max_queue_size: defaults::MAX_QUEUE_SIZE,
            acquire_timeout_ms: 60 * 1000,
            stale_lease_ms: 5 * 60 * 1000,
            sweep_interval_ms: 60 * 1000,
            self_heal_interval_ms: 15 * 1000,
            memory_pressure_threshold: defaults::MEMORY_PRESSURE_THRESHOLD,
            memory_recheck_delay_ms: 2000,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn stale_lease(&self) -> Duration {
        Duration::from_millis(self.stale_lease_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn self_heal_interval(&self) -> Duration {
        Duration::from_millis(self.self_heal_interval_ms)
    }

    pub fn memory_recheck_delay(&self) -> Duration {
        Duration::from_millis(self.memory_recheck_delay_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.max_size",
                self.max_size,
                "must be greater than 0",
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.acquire_timeout_ms",
                self.acquire_timeout_ms,
                "must be greater than 0",
            ));
        }
        if self.sweep_interval_ms == 0 || self.self_heal_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.sweep_interval_ms",
                self.sweep_interval_ms,
                "sweep and self-heal intervals must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.memory_pressure_threshold) {
            return Err(ConfigurationError::invalid_value(
                "pool.memory_pressure_threshold",
                self.memory_pressure_threshold,
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

/// Circuit breaker settings as they appear in configuration files
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive launch failures before opening
    pub failure_threshold: u32,
    /// Cooldown before a half-open probe is allowed
    pub reset_timeout_ms: u64,
    /// Consecutive half-open successes required to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 30 * 1000,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Convert into the resilience module's runtime configuration
    pub fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: self.reset_timeout(),
            success_threshold: self.success_threshold,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.to_resilience_config()
            .validate()
            .map_err(|reason| ConfigurationError::invalid_value("circuit_breaker", "-", reason))
    }
}

/// Distributed lock configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl_ms: u64,
    /// Refuse to fall back to in-process locks when no shared store is configured
    pub strict: bool,
    pub namespace: String,
    /// Shared coordination store; `None` means local fallback (non-strict only)
    pub redis_url: Option<String>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5 * 60 * 1000,
            strict: false,
            namespace: keys::DEFAULT_LOCK_NAMESPACE.to_string(),
            redis_url: None,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.ttl_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "lock.ttl_ms",
                self.ttl_ms,
                "must be greater than 0",
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "lock.namespace",
                &self.namespace,
                "must not be empty",
            ));
        }
        Ok(())
    }
}

/// Refresh orchestrator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub failure_reason_max_len: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1000,
            failure_reason_max_len: defaults::FAILURE_REASON_MAX_LEN,
        }
    }
}

impl OrchestratorConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.max_attempts",
                self.max_attempts,
                "must be at least 1",
            ));
        }
        if self.max_attempts > 10 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.max_attempts",
                self.max_attempts,
                "should not exceed 10",
            ));
        }
        Ok(())
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Local wall-clock time of the daily bulk sweep, `HH:MM`
    pub daily_sweep_time: String,
    /// Offset of the scheduler's local time from UTC
    pub utc_offset_minutes: i32,
    pub proactive_interval_ms: u64,
    /// Tokens expiring within this window are refreshed by the proactive sweep
    pub lookahead_ms: u64,
    pub operating_hours_start: String,
    pub operating_hours_end: String,
    /// Pause between principals within one sweep
    pub inter_request_delay_ms: u64,
    pub max_attempts: u32,
    /// Backoff before retrying a principal after a pool-pressure error
    pub pool_backoff_ms: u64,
    /// How long shutdown waits for an in-flight refresh before aborting it
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_sweep_time: "08:00".to_string(),
            utc_offset_minutes: 0,
            proactive_interval_ms: 4 * 60 * 60 * 1000,
            lookahead_ms: 2 * 60 * 60 * 1000,
            operating_hours_start: "07:00".to_string(),
            operating_hours_end: "20:00".to_string(),
            inter_request_delay_ms: 2000,
            max_attempts: 2,
            pool_backoff_ms: 15 * 1000,
            shutdown_grace_ms: 30 * 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn proactive_interval(&self) -> Duration {
        Duration::from_millis(self.proactive_interval_ms)
    }

    pub fn lookahead(&self) -> Duration {
        Duration::from_millis(self.lookahead_ms)
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    pub fn pool_backoff(&self) -> Duration {
        Duration::from_millis(self.pool_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn daily_time(&self) -> ConfigResult<NaiveTime> {
        parse_wall_clock("scheduler.daily_sweep_time", &self.daily_sweep_time)
    }

    pub fn operating_hours(&self) -> ConfigResult<(NaiveTime, NaiveTime)> {
        Ok((
            parse_wall_clock("scheduler.operating_hours_start", &self.operating_hours_start)?,
            parse_wall_clock("scheduler.operating_hours_end", &self.operating_hours_end)?,
        ))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.daily_time()?;
        self.operating_hours()?;
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.utc_offset_minutes",
                self.utc_offset_minutes,
                "must be within +/- 14 hours",
            ));
        }
        if self.proactive_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.proactive_interval_ms",
                self.proactive_interval_ms,
                "must be greater than 0",
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_attempts",
                self.max_attempts,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_wall_clock(field: &str, value: &str) -> ConfigResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| ConfigurationError::invalid_value(field, value, format!("expected HH:MM ({e})")))
}
