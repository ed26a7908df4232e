//! # Session Keeper Bootstrap
//!
//! Builds the long-lived service objects once at process start and hands
//! them to each other:
//!
//! ```text
//! ConfigManager ──▶ BrowserPool ──▶ FullLoginStrategy ──┐
//!               ──▶ DistributedLock ───────────────────┼──▶ RefreshOrchestrator ──▶ RefreshScheduler
//!               ──▶ TokenReissuers ──▶ FastRenewal ─────┘
//! ```
//!
//! `start()` launches pool maintenance and the scheduler loops;
//! `shutdown()` stops the scheduler first, then drains the pool.

use super::orchestrator::RefreshOrchestrator;
use super::strategies::{FastRenewalStrategy, FullLoginStrategy};
use super::strategy::{RefreshStrategy, StrategyRegistry};
use super::types::{BrokerType, RefreshContext, TokenPayload};
use crate::config::ConfigManager;
use crate::error::{Result, SessionError};
use crate::lock::DistributedLock;
use crate::pool::{BrowserLauncher, BrowserPool, MemoryProbe, PoolStats, SysinfoMemoryProbe};
use crate::ports::{AutomationAdapter, CredentialVault, SessionStore, TokenReissuer};
use crate::scheduler::RefreshScheduler;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Point-in-time view of a running keeper
#[derive(Debug, Clone)]
pub struct KeeperStatus {
    pub running: bool,
    pub environment: String,
    pub strict_lock: bool,
    pub shared_lock_store: bool,
    pub pool: PoolStats,
    pub refreshes_in_flight: usize,
    pub sweep_running: bool,
}

/// Collaborators the keeper cannot build itself
pub struct SessionKeeperBuilder {
    config_manager: Arc<ConfigManager>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    adapter: Option<Arc<dyn AutomationAdapter>>,
    vault: Option<Arc<dyn CredentialVault>>,
    store: Option<Arc<dyn SessionStore>>,
    memory: Option<Arc<dyn MemoryProbe>>,
    lock: Option<Arc<DistributedLock>>,
    reissuers: HashMap<BrokerType, Arc<dyn TokenReissuer>>,
}

impl SessionKeeperBuilder {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        Self {
            config_manager,
            launcher: None,
            adapter: None,
            vault: None,
            store: None,
            memory: None,
            lock: None,
            reissuers: HashMap::new(),
        }
    }

    pub fn launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn automation_adapter(mut self, adapter: Arc<dyn AutomationAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to the `sysinfo` probe
    pub fn memory_probe(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Use an existing lock instead of building one from `lock.*` settings
    pub fn lock(mut self, lock: Arc<DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Brokers with a reissuer get fast renewal in front of full login
    pub fn reissuer(mut self, broker: impl Into<BrokerType>, reissuer: Arc<dyn TokenReissuer>) -> Self {
        self.reissuers.insert(broker.into(), reissuer);
        self
    }

    pub async fn build(self) -> Result<SessionKeeper> {
        info!(
            environment = %self.config_manager.environment(),
            "🚀 BOOTSTRAP: Building session keeper"
        );
        let config = self.config_manager.config();
        config.validate()?;

        let launcher = required(self.launcher, "browser launcher")?;
        let adapter = required(self.adapter, "automation adapter")?;
        let vault = required(self.vault, "credential vault")?;
        let store = required(self.store, "session store")?;
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(SysinfoMemoryProbe::new()));

        let pool = BrowserPool::new(
            config.pool.clone(),
            config.circuit_breaker.to_resilience_config(),
            launcher,
            memory,
        );

        let lock = match self.lock {
            Some(lock) => lock,
            None => Arc::new(DistributedLock::from_config(&config.lock).await?),
        };
        if self.config_manager.is_production() && !lock.has_shared_store() {
            warn!("🔒 BOOTSTRAP: Production without a shared lock store; refreshes will fail");
        }

        let full_login: Arc<dyn RefreshStrategy> =
            Arc::new(FullLoginStrategy::new(pool.clone(), vault, Arc::clone(&store), adapter));
        let mut strategies = StrategyRegistry::new().with_default(Arc::clone(&full_login));
        for (broker, reissuer) in self.reissuers {
            strategies.register(
                broker,
                Arc::new(FastRenewalStrategy::new(reissuer, Arc::clone(&full_login))),
            );
        }

        let orchestrator = RefreshOrchestrator::from_config(config, strategies, Arc::clone(&lock), Arc::clone(&store));
        let scheduler = RefreshScheduler::new(config.scheduler.clone(), Arc::new(orchestrator.clone()), store)?;

        info!("✅ BOOTSTRAP: Session keeper ready");
        Ok(SessionKeeper {
            config_manager: self.config_manager,
            pool,
            lock,
            orchestrator,
            scheduler,
            running: AtomicBool::new(false),
        })
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| SessionError::Configuration(format!("session keeper requires a {name}")))
}

/// The assembled service
#[derive(Debug)]
pub struct SessionKeeper {
    config_manager: Arc<ConfigManager>,
    pool: BrowserPool,
    lock: Arc<DistributedLock>,
    orchestrator: RefreshOrchestrator,
    scheduler: RefreshScheduler,
    running: AtomicBool,
}

impl SessionKeeper {
    pub fn builder(config_manager: Arc<ConfigManager>) -> SessionKeeperBuilder {
        SessionKeeperBuilder::new(config_manager)
    }

    /// Start background work. Calling again while running is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Session keeper already running");
            return;
        }
        self.pool.start_maintenance();
        self.scheduler.start();
        info!("🎉 Session keeper started");
    }

    /// Scheduler first so no sweep starts against a draining pool
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) && self.pool.is_shut_down() {
            return;
        }
        info!("🛑 Session keeper shutting down");
        self.scheduler.shutdown().await;
        self.pool.shutdown().await;
        info!("✅ Session keeper stopped");
    }

    pub async fn refresh(&self, context: RefreshContext) -> Result<TokenPayload> {
        self.orchestrator.refresh(context).await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn pool(&self) -> &BrowserPool {
        &self.pool
    }

    pub fn lock(&self) -> &Arc<DistributedLock> {
        &self.lock
    }

    pub fn orchestrator(&self) -> &RefreshOrchestrator {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn status(&self) -> KeeperStatus {
        KeeperStatus {
            running: self.is_running(),
            environment: self.config_manager.environment().to_string(),
            strict_lock: self.lock.is_strict(),
            shared_lock_store: self.lock.has_shared_store(),
            pool: self.pool.stats(),
            refreshes_in_flight: self.orchestrator.in_flight_count(),
            sweep_running: self.scheduler.is_sweep_running(),
        }
    }
}
