//! Scheduler sweeps driving the real orchestrator, plus keeper lifecycle.

mod common;

use broker_session::config::{ConfigManager, SchedulerConfig, SessionConfig};
use broker_session::constants::SessionStatus;
use broker_session::lock::DistributedLock;
use broker_session::orchestration::{
    BrokerType, FullLoginStrategy, RefreshOrchestrator, RefreshStrategy, SessionKeeper, StrategyRegistry,
};
use broker_session::persistence::InMemorySessionStore;
use broker_session::pool::BrowserPool;
use broker_session::scheduler::{RefreshScheduler, SweepKind, SweepOutcome};
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator_over(pool: &BrowserPool, store: &Arc<InMemorySessionStore>) -> Arc<RefreshOrchestrator> {
    let full_login: Arc<dyn RefreshStrategy> = Arc::new(FullLoginStrategy::new(
        pool.clone(),
        Arc::new(PrefixVault),
        store.clone(),
        FakeAdapter::new(),
    ));
    let mut config = SessionConfig::default();
    config.orchestrator.base_backoff_ms = 10;
    Arc::new(RefreshOrchestrator::from_config(
        &config,
        StrategyRegistry::new().with_default(full_login),
        Arc::new(DistributedLock::local("keeper")),
        store.clone(),
    ))
}

/// Operating hours from one hour before to one hour after now (UTC)
fn open_now() -> SchedulerConfig {
    let now = Utc::now();
    SchedulerConfig {
        operating_hours_start: (now - ChronoDuration::hours(1)).format("%H:%M").to_string(),
        operating_hours_end: (now + ChronoDuration::hours(1)).format("%H:%M").to_string(),
        inter_request_delay_ms: 50,
        pool_backoff_ms: 1_000,
        max_attempts: 2,
        ..SchedulerConfig::default()
    }
}

fn broker() -> BrokerType {
    BrokerType::from(BROKER)
}

#[tokio::test(start_paused = true)]
async fn test_manual_sweep_continues_past_terminal_failure() {
    let store = store_with_principals(&[("u1", "hunter2"), ("u2", "wrong"), ("u3", "hunter2")]);
    let pool = test_pool(pool_config(1, 2), FakeLauncher::new());
    let scheduler = RefreshScheduler::new(open_now(), orchestrator_over(&pool, &store), store.clone()).unwrap();

    let outcome = scheduler.run_sweep(SweepKind::Manual).await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);

    assert_eq!(store.session("u1", &broker()).unwrap().status, SessionStatus::Active);
    assert_eq!(store.session("u2", &broker()).unwrap().status, SessionStatus::Failed);
    assert_eq!(store.session("u3", &broker()).unwrap().status, SessionStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_pool_pressure_retries_same_principal_after_backoff() {
    let store = store_with_principals(&[("u1", "hunter2")]);
    let pool = test_pool(pool_config(1, 0), FakeLauncher::new());
    let scheduler = RefreshScheduler::new(open_now(), orchestrator_over(&pool, &store), store.clone()).unwrap();

    // Someone else holds the only browser for two seconds
    let held = pool.acquire().await.unwrap();
    let releaser = {
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            pool.release(held.resource_id, held.token);
        })
    };

    let outcome = scheduler.run_sweep(SweepKind::Daily).await.unwrap();
    releaser.await.unwrap();

    let report = outcome.report().unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.deferred, 0);

    let audit = store.audit_log();
    assert!(audit.len() > 1);
    assert!(audit.iter().rev().skip(1).all(|r| r.error_code.as_deref() == Some("POOL_EXHAUSTED")));
}

#[tokio::test(start_paused = true)]
async fn test_persistent_pool_pressure_defers_principal() {
    let store = store_with_principals(&[("u1", "hunter2")]);
    let pool = test_pool(pool_config(1, 0), FakeLauncher::new());
    let scheduler = RefreshScheduler::new(open_now(), orchestrator_over(&pool, &store), store.clone()).unwrap();

    let _held = pool.acquire().await.unwrap();
    let outcome = scheduler.run_sweep(SweepKind::Proactive).await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(report.failed, 0);
    assert!(store.session("u1", &broker()).is_none());
}

#[tokio::test]
async fn test_startup_catch_up_only_when_needed() {
    let store = store_with_principals(&[("u1", "hunter2"), ("u2", "hunter2")]);
    store.insert_session(active_session("u1", "valid", Utc::now() + ChronoDuration::hours(12)));
    let pool = test_pool(pool_config(1, 2), FakeLauncher::new());
    let orchestrator = orchestrator_over(&pool, &store);

    let scheduler = RefreshScheduler::new(open_now(), orchestrator.clone(), store.clone()).unwrap();
    let outcome = scheduler.startup_catch_up().await.unwrap();
    assert!(matches!(
        outcome,
        Some(SweepOutcome::Completed(ref report)) if report.attempted == 1 && report.succeeded == 1
    ));

    // Every token now valid
    assert!(scheduler.startup_catch_up().await.unwrap().is_none());

    let now = Utc::now();
    let closed = SchedulerConfig {
        operating_hours_start: (now + ChronoDuration::hours(1)).format("%H:%M").to_string(),
        operating_hours_end: (now + ChronoDuration::hours(2)).format("%H:%M").to_string(),
        ..SchedulerConfig::default()
    };
    let store_needing = store_with_principals(&[("u9", "hunter2")]);
    let outside = RefreshScheduler::new(closed, orchestrator, store_needing).unwrap();
    assert!(outside.startup_catch_up().await.unwrap().is_none());
}

#[tokio::test]
async fn test_keeper_start_catches_up_and_shuts_down() {
    let store = store_with_principals(&[("u1", "hunter2")]);
    let mut config = SessionConfig::default();
    config.scheduler = open_now();
    config.pool = pool_config(1, 1);
    let manager = ConfigManager::from_config(config, "test").unwrap();

    let keeper = SessionKeeper::builder(manager)
        .launcher(FakeLauncher::new())
        .automation_adapter(FakeAdapter::new())
        .vault(Arc::new(PrefixVault))
        .store(store.clone())
        .memory_probe(Arc::new(FixedMemory(0.1)))
        .lock(Arc::new(DistributedLock::local("keeper")))
        .build()
        .await
        .unwrap();

    keeper.start();
    assert!(keeper.status().running);

    let mut caught_up = false;
    for _ in 0..100 {
        if store.session("u1", &broker()).is_some_and(|s| s.status == SessionStatus::Active) {
            caught_up = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(caught_up, "startup catch-up never refreshed u1");

    keeper.shutdown().await;
    let status = keeper.status();
    assert!(!status.running);
    assert!(status.pool.shut_down);
    assert!(!status.sweep_running);
}

#[tokio::test]
async fn test_keeper_requires_collaborators() {
    let manager = ConfigManager::from_config(SessionConfig::default(), "test").unwrap();
    let err = SessionKeeper::builder(manager)
        .launcher(FakeLauncher::new())
        .build()
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");
}
