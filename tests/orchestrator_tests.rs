//! End-to-end refresh orchestration over a real pool with fake collaborators.

mod common;

use broker_session::config::SessionConfig;
use broker_session::constants::{AttemptOutcome, SessionStatus};
use broker_session::error::SessionError;
use broker_session::lock::{CoordinationStore, DistributedLock, InMemoryCoordinationStore};
use broker_session::orchestration::{
    BrokerType, FastRenewalStrategy, FullLoginStrategy, RefreshContext, RefreshOrchestrator, RefreshStrategy,
    StrategyRegistry,
};
use broker_session::persistence::InMemorySessionStore;
use broker_session::pool::BrowserPool;
use chrono::Utc;
use common::*;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    pool: BrowserPool,
    launcher: Arc<FakeLauncher>,
    adapter: Arc<FakeAdapter>,
    store: Arc<InMemorySessionStore>,
    orchestrator: RefreshOrchestrator,
}

fn harness(adapter: Arc<FakeAdapter>, store: Arc<InMemorySessionStore>, lock: Arc<DistributedLock>) -> Harness {
    let launcher = FakeLauncher::new();
    let pool = test_pool(pool_config(2, 4), launcher.clone());
    let full_login: Arc<dyn RefreshStrategy> = Arc::new(FullLoginStrategy::new(
        pool.clone(),
        Arc::new(PrefixVault),
        store.clone(),
        adapter.clone(),
    ));
    let strategies = StrategyRegistry::new().with_default(full_login);

    let mut config = SessionConfig::default();
    config.orchestrator.base_backoff_ms = 10;
    let orchestrator = RefreshOrchestrator::from_config(&config, strategies, lock, store.clone());

    Harness {
        pool,
        launcher,
        adapter,
        store,
        orchestrator,
    }
}

fn broker() -> BrokerType {
    BrokerType::from(BROKER)
}

#[tokio::test]
async fn test_concurrent_identical_refreshes_share_one_login() {
    let h = harness(
        FakeAdapter::slow(Duration::from_millis(50)),
        store_with_principals(&[("u1", "hunter2")]),
        Arc::new(DistributedLock::local("keeper")),
    );

    let (a, b) = tokio::join!(
        h.orchestrator.refresh(RefreshContext::new("u1", BROKER)),
        h.orchestrator.refresh(RefreshContext::new("u1", BROKER)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(h.adapter.calls(), 1);
    assert_eq!(h.launcher.launches(), 1);
    assert_eq!(h.orchestrator.in_flight_count(), 0);

    let session = h.store.session("u1", &broker()).unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.access_token, Some(a.access_token.clone()));
    assert_eq!(h.store.audit_log().len(), 1);

    // Settled; the next call starts fresh
    let c = h.orchestrator.refresh(RefreshContext::new("u1", BROKER)).await.unwrap();
    assert_ne!(c.access_token, a.access_token);
    assert_eq!(h.adapter.calls(), 2);
}

#[tokio::test]
async fn test_concurrent_callers_observe_same_error() {
    let h = harness(
        FakeAdapter::slow(Duration::from_millis(20)),
        store_with_principals(&[("u1", "wrong")]),
        Arc::new(DistributedLock::local("keeper")),
    );

    let (a, b) = tokio::join!(
        h.orchestrator.refresh(RefreshContext::new("u1", BROKER)),
        h.orchestrator.refresh(RefreshContext::new("u1", BROKER)),
    );
    let (a, b) = (a.unwrap_err(), b.unwrap_err());
    assert_eq!(a, b);
    assert_eq!(a.code(), "AUTOMATION_FAILURE");
    assert_eq!(h.adapter.calls(), 1);

    // Browser back in the pool despite the failure
    let stats = h.pool.stats();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.idle, 1);

    let session = h.store.session("u1", &broker()).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.failure_reason.unwrap().contains("rejected"));
}

#[tokio::test]
async fn test_distinct_accounts_are_not_merged() {
    let h = harness(
        FakeAdapter::slow(Duration::from_millis(20)),
        store_with_principals(&[("u1", "hunter2")]),
        Arc::new(DistributedLock::local("keeper")),
    );

    let first = h.orchestrator.refresh(RefreshContext::new("u1", BROKER).with_account("A"));
    let second = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.orchestrator
            .refresh(RefreshContext::new("u1", BROKER).with_account("B"))
            .await
    };
    let (first, second) = tokio::join!(first, second);

    // Same principal, so the cross-process lock still serialises them
    assert!(first.is_ok());
    assert!(matches!(second, Err(SessionError::LockHeld { .. })));
}

#[tokio::test]
async fn test_missing_credentials_never_touch_the_pool() {
    let store = Arc::new(InMemorySessionStore::new());
    let mut partial = credentials("u1", "hunter2");
    partial.fields.remove("password");
    store.insert_credentials(partial);

    let h = harness(FakeAdapter::new(), store, Arc::new(DistributedLock::local("keeper")));

    let err = h.orchestrator.refresh(RefreshContext::new("u1", BROKER)).await.unwrap_err();
    match err {
        SessionError::CredentialIncomplete { missing, .. } => assert_eq!(missing, "password"),
        other => panic!("expected CredentialIncomplete, got {other:?}"),
    }

    let err = h.orchestrator.refresh(RefreshContext::new("u2", BROKER)).await.unwrap_err();
    assert!(matches!(err, SessionError::CredentialNotFound { .. }));
    assert_eq!(h.launcher.launches(), 0);
    assert!(h
        .store
        .audit_log()
        .iter()
        .all(|record| record.outcome == AttemptOutcome::Failure && record.attempt == 1));
}

#[tokio::test]
async fn test_invalid_context_rejected_before_any_work() {
    let h = harness(
        FakeAdapter::new(),
        store_with_principals(&[]),
        Arc::new(DistributedLock::local("keeper")),
    );
    let err = h.orchestrator.refresh(RefreshContext::new("a:b", BROKER)).await.unwrap_err();
    assert!(matches!(err, SessionError::ValidationError(_)));
    assert_eq!(err.status_code(), 400);
    assert!(h.store.audit_log().is_empty());
}

#[tokio::test]
async fn test_second_process_gets_lock_held_while_first_refreshes() {
    let coordination: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordinationStore::new());
    let store = store_with_principals(&[("u1", "hunter2")]);

    let first = harness(
        FakeAdapter::slow(Duration::from_millis(50)),
        store.clone(),
        Arc::new(DistributedLock::new(Some(coordination.clone()), true, "keeper")),
    );
    let second = harness(
        FakeAdapter::new(),
        store,
        Arc::new(DistributedLock::new(Some(coordination), true, "keeper")),
    );

    let running = first.orchestrator.refresh(RefreshContext::new("u1", BROKER));
    let contender = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        second.orchestrator.refresh(RefreshContext::new("u1", BROKER)).await
    };
    let (running, contender) = tokio::join!(running, contender);

    assert!(running.is_ok());
    let err = contender.unwrap_err();
    assert!(matches!(err, SessionError::LockHeld { .. }));
    assert!(err.retry_after().is_some());
    assert_eq!(second.adapter.calls(), 0);
}

#[tokio::test]
async fn test_fast_renewal_and_fallback() {
    let store = store_with_principals(&[("u1", "hunter2"), ("u2", "hunter2")]);
    store.insert_session(active_session("u1", "old", Utc::now() + chrono::Duration::minutes(5)));
    store.insert_session(active_session("u2", "old", Utc::now() + chrono::Duration::minutes(5)));

    let launcher = FakeLauncher::new();
    let pool = test_pool(pool_config(1, 2), launcher.clone());
    let adapter = FakeAdapter::new();
    let full_login: Arc<dyn RefreshStrategy> = Arc::new(FullLoginStrategy::new(
        pool,
        Arc::new(PrefixVault),
        store.clone(),
        adapter.clone(),
    ));

    let working = FakeReissuer::working();
    let broken = FakeReissuer::failing();
    let mut strategies = StrategyRegistry::new();
    strategies
        .register("zerodha", Arc::new(FastRenewalStrategy::new(working.clone(), full_login.clone())))
        .register("upstox", Arc::new(FastRenewalStrategy::new(broken.clone(), full_login)));

    let orchestrator = RefreshOrchestrator::from_config(
        &SessionConfig::default(),
        strategies,
        Arc::new(DistributedLock::local("keeper")),
        store.clone(),
    );

    let renewed = orchestrator.refresh(RefreshContext::new("u1", BROKER)).await.unwrap();
    assert_eq!(renewed.access_token, "old-renewed");
    assert_eq!(launcher.launches(), 0);
    // Reissue returned no refresh token; the stored one is kept
    assert_eq!(
        store.session("u1", &broker()).unwrap().refresh_token.as_deref(),
        Some("refresh-0")
    );

    let mut upstox = credentials("u2", "hunter2");
    upstox.broker = BrokerType::from("upstox");
    store.insert_credentials(upstox);
    let mut upstox_session = active_session("u2", "old", Utc::now());
    upstox_session.broker = BrokerType::from("upstox");
    store.insert_session(upstox_session);

    let fallback = orchestrator.refresh(RefreshContext::new("u2", "upstox")).await.unwrap();
    assert_eq!(broken.calls(), 1);
    assert_eq!(adapter.calls(), 1);
    assert!(fallback.access_token.starts_with("token-"));
    assert_eq!(working.calls(), 1);
}
