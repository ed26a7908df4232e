//! Refresh request and result types.

use crate::constants::keys;
use crate::error::{Result, SessionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Broker identifier (`"zerodha"`, `"upstox"`, ...), lower-cased
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerType(String);

impl BrokerType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BrokerType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for BrokerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invocation context for a refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshContext {
    pub principal: String,
    pub broker: BrokerType,
    pub account_id: Option<String>,
    pub connection_id: Option<String>,
    pub correlation_id: String,
}

impl RefreshContext {
    pub fn new(principal: impl Into<String>, broker: impl Into<BrokerType>) -> Self {
        Self {
            principal: principal.into(),
            broker: broker.into(),
            account_id: None,
            connection_id: None,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.principal.trim().is_empty() {
            return Err(SessionError::ValidationError("principal must not be empty".to_string()));
        }
        if self.broker.as_str().is_empty() {
            return Err(SessionError::ValidationError("broker type must not be empty".to_string()));
        }
        if self.principal.contains(':') {
            return Err(SessionError::ValidationError(format!(
                "principal '{}' must not contain ':'",
                self.principal
            )));
        }
        Ok(())
    }

    /// Single-flight key
    pub fn key(&self) -> RefreshKey {
        RefreshKey {
            broker: self.broker.clone(),
            principal: self.principal.clone(),
            account_id: self.account_id.clone(),
            connection_id: self.connection_id.clone(),
        }
    }

    /// Cross-process lock key, one per principal per broker
    pub fn lock_key(&self) -> String {
        format!("{}:{}:{}", keys::REFRESH_LOCK_PREFIX, self.broker, self.principal)
    }
}

/// Identity of an in-flight refresh within one process
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshKey {
    pub broker: BrokerType,
    pub principal: String,
    pub account_id: Option<String>,
    pub connection_id: Option<String>,
}

/// Result of a successful strategy run
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

impl fmt::Debug for TokenPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPayload")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("expires_at", &self.expires_at)
            .field("execution_time_ms", &self.execution_time_ms)
            .finish()
    }
}
