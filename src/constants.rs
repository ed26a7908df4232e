//! # System Constants
//!
//! Key namespaces, status values and default limits shared across the pool,
//! the lock, the orchestrator and the scheduler.

use serde::{Deserialize, Serialize};

/// Namespaces used to derive coordination-store keys
pub mod keys {
    /// Default prefix for every lock key written to the coordination store
    pub const DEFAULT_LOCK_NAMESPACE: &str = "session-keeper:lock";
    /// Logical lock key prefix for per-principal refreshes
    pub const REFRESH_LOCK_PREFIX: &str = "refresh";
}

/// Component names used in structured logs
pub mod components {
    pub const POOL: &str = "browser_pool";
    pub const CIRCUIT_BREAKER: &str = "browser_launch";
    pub const LOCK: &str = "distributed_lock";
    pub const ORCHESTRATOR: &str = "refresh_orchestrator";
    pub const SCHEDULER: &str = "refresh_scheduler";
}

/// Default limits
pub mod defaults {
    /// Failure reasons persisted for operators are truncated to this many characters
    pub const FAILURE_REASON_MAX_LEN: usize = 500;
    pub const MAX_POOL_SIZE: usize = 3;
    pub const MAX_QUEUE_SIZE: usize = 10;
    pub const MEMORY_PRESSURE_THRESHOLD: f64 = 0.90;
    /// Retry hint attached to queue-full, exhausted and queue-timeout errors
    pub const BACKPRESSURE_RETRY_AFTER_MS: u64 = 5_000;
}

/// Persisted status of a principal's broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Failed,
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Expired => write!(f, "expired"),
        }
    }
}

/// Outcome recorded for every refresh attempt in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// Truncate a failure reason to at most `max_len` characters on a char boundary.
pub fn truncate_reason(reason: &str, max_len: usize) -> String {
    if reason.chars().count() <= max_len {
        return reason.to_string();
    }
    reason.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_reason_respects_char_boundaries() {
        assert_eq!(truncate_reason("short", 10), "short");
        assert_eq!(truncate_reason("abcdef", 3), "abc");
        assert_eq!(truncate_reason("ééééé", 2), "éé");
    }

    #[test]
    fn test_session_status_serialization() {
        let json = serde_json::to_string(&SessionStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
        assert_eq!(SessionStatus::Failed.to_string(), "failed");
    }
}
