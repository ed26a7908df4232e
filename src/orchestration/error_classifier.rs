//! # Refresh Error Classification
//!
//! Decides, per failed strategy attempt, whether the orchestrator retries and
//! how long it waits first.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ SessionError    │────▶│ ErrorClassifier │────▶│ Classification  │
//! │ + Context       │     │ Strategy        │     │ Result          │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Pool pressure and failed launches are transient. Credential, validation and
//! automation failures are terminal. Lock errors are returned to the caller
//! untouched; the orchestrator never retries them itself.
//!
//! ## Usage
//!
//! ```rust
//! use broker_session::error::SessionError;
//! use broker_session::orchestration::error_classifier::{
//!     ErrorClassifier, ErrorContext, StandardErrorClassifier,
//! };
//! use broker_session::orchestration::RetryPolicy;
//! use std::time::Duration;
//!
//! let classifier = StandardErrorClassifier::new(RetryPolicy::new(3, Duration::from_secs(1)));
//! let context = ErrorContext {
//!     principal: "u1".to_string(),
//!     broker: "zerodha".to_string(),
//!     strategy: "full_login".to_string(),
//!     attempt_number: 1,
//!     max_attempts: 3,
//!     execution_duration: Duration::from_millis(40),
//!     correlation_id: "c-1".to_string(),
//! };
//! let error = SessionError::PoolTimeout {
//!     waited: Duration::from_secs(60),
//!     retry_after: Some(Duration::from_secs(5)),
//! };
//!
//! let classification = classifier.classify_error(&error, &context);
//! assert!(classification.is_retryable);
//! assert_eq!(classification.retry_delay, Some(Duration::from_secs(1)));
//! ```

use super::retry::RetryPolicy;
use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Context information for error classification
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub principal: String,
    pub broker: String,
    /// Strategy that produced the error
    pub strategy: String,
    /// Current attempt number (1-based)
    pub attempt_number: u32,
    pub max_attempts: u32,
    /// How long the attempt ran before failing
    pub execution_duration: Duration,
    pub correlation_id: String,
}

/// Result of error classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub error_category: ErrorCategory,

    /// Whether another attempt should be made
    pub is_retryable: bool,

    /// Delay before the next attempt (if retryable)
    pub retry_delay: Option<Duration>,

    /// Hint surfaced to the caller once attempts run out
    pub retry_after: Option<Duration>,

    /// Stable error code for tracking
    pub error_code: String,

    pub error_message: String,

    pub remediation_suggestions: Vec<String>,

    pub is_final_attempt: bool,
}

/// Primary error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Browser pool saturated or breaker open - retry when capacity returns
    ResourceExhaustion,

    /// Launch failed without tripping the breaker
    Transient,

    /// Another owner holds the refresh lock
    Contention,

    /// Shared coordination store required but unavailable
    Coordination,

    /// Missing or rejected credentials - operator must fix
    Credential,

    /// Login automation failed against the broker site
    Automation,

    /// Bad input to the core
    Validation,

    /// Configuration or internal failure
    Permanent,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::ResourceExhaustion => write!(f, "Resource Exhaustion"),
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::Contention => write!(f, "Contention"),
            ErrorCategory::Coordination => write!(f, "Coordination"),
            ErrorCategory::Credential => write!(f, "Credential"),
            ErrorCategory::Automation => write!(f, "Automation"),
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::Permanent => write!(f, "Permanent"),
        }
    }
}

/// Trait for error classification strategies
pub trait ErrorClassifier: Send + Sync + std::fmt::Debug {
    fn classify_error(&self, error: &SessionError, context: &ErrorContext) -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

/// Default classification rules
#[derive(Debug, Clone)]
pub struct StandardErrorClassifier {
    policy: RetryPolicy,
}

impl StandardErrorClassifier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    fn category_of(error: &SessionError) -> ErrorCategory {
        match error {
            SessionError::PoolUnavailable { .. }
            | SessionError::PoolExhausted { .. }
            | SessionError::QueueFull { .. }
            | SessionError::PoolTimeout { .. } => ErrorCategory::ResourceExhaustion,
            SessionError::ResourceLaunchFailed(_) => ErrorCategory::Transient,
            SessionError::LockHeld { .. } => ErrorCategory::Contention,
            SessionError::LockTransportUnavailable(_) => ErrorCategory::Coordination,
            SessionError::CredentialIncomplete { .. } | SessionError::CredentialNotFound { .. } => {
                ErrorCategory::Credential
            }
            SessionError::AutomationFailure { .. } => ErrorCategory::Automation,
            SessionError::ValidationError(_) => ErrorCategory::Validation,
            SessionError::PoolShutdown
            | SessionError::Persistence(_)
            | SessionError::Configuration(_)
            | SessionError::Internal(_) => ErrorCategory::Permanent,
        }
    }

    fn suggestions_for(category: ErrorCategory) -> Vec<String> {
        let suggestions: &[&str] = match category {
            ErrorCategory::ResourceExhaustion => &[
                "Retry after the indicated delay",
                "Check browser launch failures in the pool breaker metrics",
            ],
            ErrorCategory::Transient => &["Check host resources and browser binary availability"],
            ErrorCategory::Contention => &["Another instance is refreshing this principal; retry after the lock TTL"],
            ErrorCategory::Coordination => &["Configure lock.redis_url or disable strict lock mode"],
            ErrorCategory::Credential => &["Update the stored credentials for this principal"],
            ErrorCategory::Automation => &[
                "Inspect the broker login page for layout changes",
                "Verify the credentials are accepted by the broker",
            ],
            ErrorCategory::Validation => &["Fix the refresh request parameters"],
            ErrorCategory::Permanent => &["Check service logs for the correlation id"],
        };
        suggestions.iter().map(|s| s.to_string()).collect()
    }
}

impl Default for StandardErrorClassifier {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(&self, error: &SessionError, context: &ErrorContext) -> ErrorClassification {
        let category = Self::category_of(error);
        let is_final_attempt = context.attempt_number >= context.max_attempts;
        let is_retryable = error.is_retryable() && !is_final_attempt;

        ErrorClassification {
            error_category: category,
            is_retryable,
            retry_delay: is_retryable.then(|| self.policy.delay_for_attempt(context.attempt_number)),
            retry_after: error.retry_after(),
            error_code: error.code().to_string(),
            error_message: format!(
                "{} refresh for '{}' via {} failed on attempt {}/{}: {}",
                context.broker,
                context.principal,
                context.strategy,
                context.attempt_number,
                context.max_attempts,
                error
            ),
            remediation_suggestions: Self::suggestions_for(category),
            is_final_attempt,
        }
    }

    fn classifier_name(&self) -> &'static str {
        "standard"
    }
}
