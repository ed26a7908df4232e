//! Configuration and fixture builders shared by integration tests.

use super::fakes::{FakeLauncher, FixedMemory};
use broker_session::config::PoolConfig;
use broker_session::constants::SessionStatus;
use broker_session::orchestration::BrokerType;
use broker_session::persistence::InMemorySessionStore;
use broker_session::pool::BrowserPool;
use broker_session::ports::{SessionRecord, StoredCredentials};
use broker_session::resilience::CircuitBreakerConfig;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const BROKER: &str = "zerodha";

pub fn pool_config(max_size: usize, max_queue_size: usize) -> PoolConfig {
    PoolConfig {
        max_size,
        max_queue_size,
        acquire_timeout_ms: 2_000,
        idle_timeout_ms: 60_000,
        max_age_ms: 600_000,
        stale_lease_ms: 30_000,
        memory_recheck_delay_ms: 10,
        ..PoolConfig::default()
    }
}

pub fn breaker_config(failure_threshold: u32, timeout: Duration) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        timeout,
        success_threshold: 1,
    }
}

pub fn test_pool(config: PoolConfig, launcher: Arc<FakeLauncher>) -> BrowserPool {
    BrowserPool::new(
        config,
        breaker_config(3, Duration::from_secs(30)),
        launcher,
        Arc::new(FixedMemory(0.25)),
    )
}

pub fn credentials(principal: &str, password: &str) -> StoredCredentials {
    StoredCredentials {
        principal: principal.to_string(),
        broker: BrokerType::from(BROKER),
        fields: BTreeMap::from([
            ("user_id".to_string(), format!("enc:{principal}")),
            ("password".to_string(), format!("enc:{password}")),
        ]),
    }
}

pub fn active_session(principal: &str, access_token: &str, expires_at: DateTime<Utc>) -> SessionRecord {
    SessionRecord {
        principal: principal.to_string(),
        broker: BrokerType::from(BROKER),
        account_id: None,
        connection_id: None,
        access_token: Some(access_token.to_string()),
        refresh_token: Some("refresh-0".to_string()),
        expires_at: Some(expires_at),
        status: SessionStatus::Active,
        last_refreshed_at: Some(Utc::now()),
        failure_reason: None,
        correlation_id: None,
        updated_at: Utc::now(),
    }
}

pub fn store_with_principals(principals: &[(&str, &str)]) -> Arc<InMemorySessionStore> {
    let store = Arc::new(InMemorySessionStore::new());
    for (principal, password) in principals {
        store.insert_credentials(credentials(principal, password));
    }
    store
}
