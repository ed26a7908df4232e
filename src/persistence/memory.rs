//! In-memory [`SessionStore`] for tests and single-process deployments.

use crate::constants::SessionStatus;
use crate::error::Result;
use crate::orchestration::types::BrokerType;
use crate::ports::persistence::{AuditRecord, RefreshTarget, SessionRecord, SessionStore, StoredCredentials};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

type RecordKey = (String, BrokerType);

#[derive(Debug, Default)]
struct StoreState {
    credentials: HashMap<RecordKey, StoredCredentials>,
    sessions: HashMap<RecordKey, SessionRecord>,
    audit: Vec<AuditRecord>,
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    state: Mutex<StoreState>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_credentials(&self, credentials: StoredCredentials) {
        let key = (credentials.principal.clone(), credentials.broker.clone());
        self.state.lock().credentials.insert(key, credentials);
    }

    pub fn insert_session(&self, record: SessionRecord) {
        let key = (record.principal.clone(), record.broker.clone());
        self.state.lock().sessions.insert(key, record);
    }

    pub fn session(&self, principal: &str, broker: &BrokerType) -> Option<SessionRecord> {
        self.state
            .lock()
            .sessions
            .get(&(principal.to_string(), broker.clone()))
            .cloned()
    }

    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.state.lock().audit.clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_credentials(&self, principal: &str, broker: &BrokerType) -> Result<Option<StoredCredentials>> {
        Ok(self
            .state
            .lock()
            .credentials
            .get(&(principal.to_string(), broker.clone()))
            .cloned())
    }

    async fn load_session(&self, principal: &str, broker: &BrokerType) -> Result<Option<SessionRecord>> {
        Ok(self.session(principal, broker))
    }

    async fn upsert_session(&self, record: SessionRecord) -> Result<()> {
        debug!(principal = %record.principal, broker = %record.broker, status = %record.status, "Upserting session");
        self.insert_session(record);
        Ok(())
    }

    async fn record_failure(
        &self,
        principal: &str,
        broker: &BrokerType,
        reason: &str,
        correlation_id: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let record = state
            .sessions
            .entry((principal.to_string(), broker.clone()))
            .or_insert_with(|| SessionRecord {
                principal: principal.to_string(),
                broker: broker.clone(),
                account_id: None,
                connection_id: None,
                access_token: None,
                refresh_token: None,
                expires_at: None,
                status: SessionStatus::Failed,
                last_refreshed_at: None,
                failure_reason: None,
                correlation_id: None,
                updated_at: now,
            });

        record.status = SessionStatus::Failed;
        record.failure_reason = Some(reason.to_string());
        record.correlation_id = Some(correlation_id.to_string());
        record.updated_at = now;
        Ok(())
    }

    async fn append_audit(&self, record: AuditRecord) -> Result<()> {
        self.state.lock().audit.push(record);
        Ok(())
    }

    async fn list_targets(&self) -> Result<Vec<RefreshTarget>> {
        let state = self.state.lock();
        let mut targets: Vec<RefreshTarget> = state
            .credentials
            .values()
            .map(|credentials| {
                let key = (credentials.principal.clone(), credentials.broker.clone());
                let session = state.sessions.get(&key);
                RefreshTarget {
                    principal: credentials.principal.clone(),
                    broker: credentials.broker.clone(),
                    account_id: session.and_then(|s| s.account_id.clone()),
                    connection_id: session.and_then(|s| s.connection_id.clone()),
                    expires_at: session
                        .filter(|s| s.status == SessionStatus::Active && s.access_token.is_some())
                        .and_then(|s| s.expires_at),
                }
            })
            .collect();

        // Stable sweep order
        targets.sort_by(|a, b| (&a.principal, &a.broker).cmp(&(&b.principal, &b.broker)));
        Ok(targets)
    }
}
