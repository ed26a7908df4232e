//! Persistence seam: credentials, session records, audit log and sweep targets.

use crate::constants::{AttemptOutcome, SessionStatus};
use crate::error::Result;
use crate::orchestration::types::BrokerType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Encrypted credential record; field values are ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub principal: String,
    pub broker: BrokerType,
    pub fields: BTreeMap<String, String>,
}

/// Current session of one principal at one broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub principal: String,
    pub broker: BrokerType,
    pub account_id: Option<String>,
    pub connection_id: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Truncated reason of the last terminal failure
    pub failure_reason: Option<String>,
    pub correlation_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether a usable token exists that is not expiring within `lookahead`
    pub fn is_valid_for(&self, now: DateTime<Utc>, lookahead: chrono::Duration) -> bool {
        self.status == SessionStatus::Active
            && self.access_token.is_some()
            && self.expires_at.map(|at| at > now + lookahead).unwrap_or(false)
    }
}

/// One row of the append-only attempt log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub principal: String,
    pub broker: BrokerType,
    pub correlation_id: String,
    pub strategy: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A principal the scheduler may refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTarget {
    pub principal: String,
    pub broker: BrokerType,
    pub account_id: Option<String>,
    pub connection_id: Option<String>,
    /// Expiry of the stored token, `None` if there is no usable token
    pub expires_at: Option<DateTime<Utc>>,
}

impl RefreshTarget {
    /// No token, or one expiring before `now + lookahead`
    pub fn needs_refresh(&self, now: DateTime<Utc>, lookahead: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + lookahead,
            None => true,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync + Debug {
    async fn load_credentials(&self, principal: &str, broker: &BrokerType) -> Result<Option<StoredCredentials>>;

    async fn load_session(&self, principal: &str, broker: &BrokerType) -> Result<Option<SessionRecord>>;

    async fn upsert_session(&self, record: SessionRecord) -> Result<()>;

    /// Persist a terminal failure for operators; the previous token is kept
    async fn record_failure(
        &self,
        principal: &str,
        broker: &BrokerType,
        reason: &str,
        correlation_id: &str,
    ) -> Result<()>;

    async fn append_audit(&self, record: AuditRecord) -> Result<()>;

    /// Every principal with stored credentials, with its current token expiry
    async fn list_targets(&self) -> Result<Vec<RefreshTarget>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_needs_refresh_inside_lookahead() {
        let now = Utc::now();
        let lookahead = chrono::Duration::hours(2);
        let mut target = RefreshTarget {
            principal: "u1".to_string(),
            broker: BrokerType::from("zerodha"),
            account_id: None,
            connection_id: None,
            expires_at: None,
        };
        assert!(target.needs_refresh(now, lookahead));

        target.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(target.needs_refresh(now, lookahead));

        target.expires_at = Some(now + chrono::Duration::hours(3));
        assert!(!target.needs_refresh(now, lookahead));
    }
}
