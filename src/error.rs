//! Error types for the session keeper.
//!
//! A single taxonomy is shared by the pool, the lock, the orchestrator and the
//! scheduler. Variants are `Clone + PartialEq` so every caller attached to a
//! single-flight refresh observes the exact same failure.

use crate::config::ConfigurationError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Circuit breaker is open; creation of new browsers is blocked.
    #[error("Browser pool unavailable: {reason}")]
    PoolUnavailable {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Pool at capacity and the wait queue has no slot left.
    #[error("Browser pool exhausted ({max_size} in use)")]
    PoolExhausted {
        max_size: usize,
        retry_after: Option<Duration>,
    },

    #[error("Browser pool wait queue full ({queue_size} waiting)")]
    QueueFull {
        queue_size: usize,
        retry_after: Option<Duration>,
    },

    /// Queued past the acquire deadline.
    #[error("Timed out after {waited:?} waiting for a browser")]
    PoolTimeout {
        waited: Duration,
        retry_after: Option<Duration>,
    },

    #[error("Browser pool is shutting down")]
    PoolShutdown,

    /// Launching a browser process failed without tripping the breaker.
    #[error("Browser launch failed: {0}")]
    ResourceLaunchFailed(String),

    #[error("Lock '{key}' is held by another owner")]
    LockHeld {
        key: String,
        retry_after: Option<Duration>,
    },

    #[error("Lock transport unavailable: {0}")]
    LockTransportUnavailable(String),

    #[error("Credentials incomplete for {principal}: missing {missing}")]
    CredentialIncomplete { principal: String, missing: String },

    #[error("No credentials stored for {principal}")]
    CredentialNotFound { principal: String },

    #[error("Automation failure ({kind}): {reason}")]
    AutomationFailure {
        kind: AutomationFailureKind,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure kinds reported by an automation adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutomationFailureKind {
    SelectorNotFound,
    NavigationFailure,
    CredentialRejected,
    /// Session reissue endpoint refused or failed.
    RenewalRejected,
    Other,
}

impl std::fmt::Display for AutomationFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutomationFailureKind::SelectorNotFound => write!(f, "selector_not_found"),
            AutomationFailureKind::NavigationFailure => write!(f, "navigation_failure"),
            AutomationFailureKind::CredentialRejected => write!(f, "credential_rejected"),
            AutomationFailureKind::RenewalRejected => write!(f, "renewal_rejected"),
            AutomationFailureKind::Other => write!(f, "other"),
        }
    }
}

impl SessionError {
    pub fn automation(kind: AutomationFailureKind, reason: impl Into<String>) -> Self {
        SessionError::AutomationFailure {
            kind,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::PoolUnavailable { .. } => "POOL_UNAVAILABLE",
            SessionError::PoolExhausted { .. } => "POOL_EXHAUSTED",
            SessionError::QueueFull { .. } => "QUEUE_FULL",
            SessionError::PoolTimeout { .. } => "POOL_TIMEOUT",
            SessionError::PoolShutdown => "POOL_SHUTDOWN",
            SessionError::ResourceLaunchFailed(_) => "RESOURCE_LAUNCH_FAILED",
            SessionError::LockHeld { .. } => "LOCK_HELD",
            SessionError::LockTransportUnavailable(_) => "LOCK_TRANSPORT_UNAVAILABLE",
            SessionError::CredentialIncomplete { .. } => "CREDENTIAL_INCOMPLETE",
            SessionError::CredentialNotFound { .. } => "CREDENTIAL_NOT_FOUND",
            SessionError::AutomationFailure { .. } => "AUTOMATION_FAILURE",
            SessionError::ValidationError(_) => "VALIDATION_ERROR",
            SessionError::Persistence(_) => "PERSISTENCE_ERROR",
            SessionError::Configuration(_) => "CONFIGURATION_ERROR",
            SessionError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-equivalent status for transports that want one.
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::PoolUnavailable { .. }
            | SessionError::PoolShutdown
            | SessionError::ResourceLaunchFailed(_)
            | SessionError::LockTransportUnavailable(_) => 503,
            SessionError::PoolExhausted { .. } | SessionError::QueueFull { .. } => 429,
            SessionError::PoolTimeout { .. } => 504,
            SessionError::LockHeld { .. } => 409,
            SessionError::CredentialIncomplete { .. } | SessionError::CredentialNotFound { .. } => {
                422
            }
            SessionError::ValidationError(_) => 400,
            SessionError::AutomationFailure { .. } => 502,
            SessionError::Persistence(_)
            | SessionError::Configuration(_)
            | SessionError::Internal(_) => 500,
        }
    }

    /// Retry hint surfaced to callers.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SessionError::PoolUnavailable { retry_after, .. }
            | SessionError::PoolExhausted { retry_after, .. }
            | SessionError::QueueFull { retry_after, .. }
            | SessionError::PoolTimeout { retry_after, .. }
            | SessionError::LockHeld { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Errors that stem from browser-pool pressure. The scheduler backs off and
    /// retries the same principal on these.
    pub fn is_pool_pressure(&self) -> bool {
        matches!(
            self,
            SessionError::PoolUnavailable { .. }
                | SessionError::PoolExhausted { .. }
                | SessionError::QueueFull { .. }
                | SessionError::PoolTimeout { .. }
        )
    }

    /// Whether the orchestrator may retry the strategy call.
    ///
    /// Credential, validation and adapter errors are terminal. Lock errors are
    /// returned to the caller, never retried internally.
    pub fn is_retryable(&self) -> bool {
        self.is_pool_pressure() || matches!(self, SessionError::ResourceLaunchFailed(_))
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
            && !matches!(
                self,
                SessionError::LockHeld { .. }
                    | SessionError::LockTransportUnavailable(_)
                    | SessionError::PoolShutdown
            )
    }
}

impl From<ConfigurationError> for SessionError {
    fn from(error: ConfigurationError) -> Self {
        SessionError::Configuration(error.to_string())
    }
}

impl From<redis::RedisError> for SessionError {
    fn from(error: redis::RedisError) -> Self {
        SessionError::LockTransportUnavailable(error.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(error: serde_json::Error) -> Self {
        SessionError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_retryable_with_hint() {
        let err = SessionError::PoolUnavailable {
            reason: "launch failed".to_string(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert!(err.is_retryable());
        assert!(err.is_pool_pressure());
        assert!(!err.is_terminal());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(err.code(), "POOL_UNAVAILABLE");
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn credential_and_automation_errors_are_terminal() {
        let missing = SessionError::CredentialNotFound {
            principal: "u1".to_string(),
        };
        assert!(missing.is_terminal());
        assert_eq!(missing.status_code(), 422);

        let rejected = SessionError::automation(AutomationFailureKind::CredentialRejected, "bad pin");
        assert!(rejected.is_terminal());
        assert_eq!(rejected.to_string(), "Automation failure (credential_rejected): bad pin");
    }

    #[test]
    fn lock_contention_is_neither_retried_nor_terminal() {
        let held = SessionError::LockHeld {
            key: "refresh:u1".to_string(),
            retry_after: Some(Duration::from_millis(900)),
        };
        assert!(!held.is_retryable());
        assert!(!held.is_terminal());
        assert_eq!(held.status_code(), 409);
    }
}
