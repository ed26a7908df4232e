//! # Browser Pool
//!
//! Bounded, self-healing pool of headless browser processes.
//!
//! ## Key Features
//!
//! - **Leases with ownership tokens**: `release` is refused unless the caller
//!   presents the token of the current lease
//! - **Circuit breaker**: repeated launch failures stop new launches and fail
//!   fast with the last failure reason
//! - **FIFO backpressure**: requests beyond capacity wait in a bounded queue
//!   with a hard deadline
//! - **Maintenance loops**: a periodic sweep reclaims idle, expired, unhealthy
//!   and stale resources; a faster self-heal loop also probes a tripped breaker
//!
//! All state lives behind one `parking_lot` mutex that is never held across an
//! await. Launches, closes and waiter notifications happen outside it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use broker_session::pool::{BrowserPool, BrowserLauncher};
//! # use broker_session::config::SessionConfig;
//! # use std::sync::Arc;
//! # async fn example(launcher: Arc<dyn BrowserLauncher>) -> broker_session::error::Result<()> {
//! let pool = BrowserPool::from_config(&SessionConfig::default(), launcher);
//! pool.start_maintenance();
//!
//! let lease = pool.acquire().await?;
//! // drive lease.browser ...
//! pool.release(lease.resource_id, lease.token);
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod guard;
pub mod launcher;
pub mod memory;
mod queue;
pub mod resource;
pub mod stats;
mod sweep;


pub use guard::LeaseGuard;
pub use launcher::{BrowserLauncher, BrowserProcess};
pub use memory::{MemoryProbe, SysinfoMemoryProbe};
pub use resource::{Lease, LeaseToken, ReleaseOutcome, ResourceId};
pub use stats::PoolStats;
pub use sweep::SweepSummary;

use crate::config::{PoolConfig, SessionConfig};
use crate::constants::{components, defaults};
use crate::error::{Result, SessionError};
use crate::logging::log_pool_event;
use crate::resilience::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use parking_lot::Mutex;
use queue::{Fulfilment, WaitQueue};
use resource::PooledResource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cheap to clone; clones share one pool.
#[derive(Debug, Clone)]
pub struct BrowserPool {
    shared: Arc<PoolShared>,
}

#[derive(Debug)]
struct PoolShared {
    config: PoolConfig,
    launcher: Arc<dyn BrowserLauncher>,
    memory: Arc<dyn MemoryProbe>,
    breaker: CircuitBreaker,
    state: Mutex<PoolState>,
    shutdown_notify: Notify,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Pool order; the idle scan hands out the first leasable entry
    resources: Vec<PooledResource>,
    queue: WaitQueue,
    /// Launches in flight, counted against capacity
    creating: usize,
    shut_down: bool,
    created_total: u64,
    destroyed_total: u64,
    reclaimed_total: u64,
}

impl PoolState {
    fn size(&self) -> usize {
        self.resources.len() + self.creating
    }

    fn idle_count(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| !r.is_leased() && r.reclaimed_at.is_none())
            .count()
    }

    /// Scan-and-mark in one step; callers hold the pool lock.
    fn lease_idle(&mut self, max_age: Duration) -> Option<resource::Lease> {
        self.resources
            .iter_mut()
            .find(|r| r.is_leasable(max_age))
            .map(|r| r.lease())
    }

    fn take(&mut self, index: usize) -> PooledResource {
        self.destroyed_total += 1;
        self.resources.remove(index)
    }

    /// Give leasable idle resources to queued waiters, oldest first.
    fn offer_idle(&mut self, max_age: Duration) {
        while !self.queue.is_empty() {
            let Some(index) = self.resources.iter().position(|r| r.is_leasable(max_age)) else {
                break;
            };
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };

            let lease = self.resources[index].lease();
            let resource_id = lease.resource_id;
            if waiter.sender.send(Ok(lease)).is_err() {
                // Waiter gave up; the resource stays idle for the next one
                self.resources[index].unlease();
                continue;
            }
            debug!(
                resource_id = %resource_id,
                waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                "Queued acquisition fulfilled"
            );
        }
    }
}

enum AcquirePlan {
    Ready(Lease),
    Launch,
    Wait(u64, oneshot::Receiver<Fulfilment>),
}

impl BrowserPool {
    pub fn new(
        config: PoolConfig,
        breaker_config: CircuitBreakerConfig,
        launcher: Arc<dyn BrowserLauncher>,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        info!(
            max_size = config.max_size,
            max_queue_size = config.max_queue_size,
            acquire_timeout_ms = config.acquire_timeout_ms,
            "🏊 Browser pool created"
        );

        Self {
            shared: Arc::new(PoolShared {
                config,
                launcher,
                memory,
                breaker: CircuitBreaker::new(components::CIRCUIT_BREAKER.to_string(), breaker_config),
                state: Mutex::new(PoolState::default()),
                shutdown_notify: Notify::new(),
                maintenance: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Build from loaded configuration with the `sysinfo` memory probe
    pub fn from_config(config: &SessionConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self::new(
            config.pool.clone(),
            config.circuit_breaker.to_resilience_config(),
            launcher,
            Arc::new(SysinfoMemoryProbe::new()),
        )
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }

    /// Lease a browser.
    ///
    /// Order of preference: an idle healthy browser, a fresh launch when below
    /// capacity and the breaker admits it, a slot in the wait queue. An open
    /// breaker fails fast with [`SessionError::PoolUnavailable`].
    pub async fn acquire(&self) -> Result<Lease> {
        let plan = self.plan_acquire()?;

        match plan {
            AcquirePlan::Ready(lease) => Ok(lease),
            AcquirePlan::Launch => self.launch_for_caller().await,
            AcquirePlan::Wait(id, receiver) => self.wait_in_queue(id, receiver).await,
        }
    }

    /// Acquire wrapped in a guard that releases on drop
    pub async fn acquire_guarded(&self) -> Result<LeaseGuard> {
        let lease = self.acquire().await?;
        Ok(LeaseGuard::new(self.clone(), lease))
    }

    fn plan_acquire(&self) -> Result<AcquirePlan> {
        let config = &self.shared.config;
        let breaker = &self.shared.breaker;
        let mut state = self.shared.state.lock();

        if state.shut_down {
            return Err(SessionError::PoolShutdown);
        }

        if let Some(lease) = state.lease_idle(config.max_age()) {
            log_pool_event(
                "lease_idle",
                Some(&lease.resource_id.to_string()),
                state.resources.len(),
                state.idle_count(),
                state.queue.len(),
            );
            return Ok(AcquirePlan::Ready(lease));
        }

        if state.size() < config.max_size {
            match breaker.try_admit() {
                Admission::Allowed | Admission::Probe => {
                    state.creating += 1;
                    return Ok(AcquirePlan::Launch);
                }
                Admission::Rejected { retry_after, reason } => {
                    return Err(SessionError::PoolUnavailable {
                        reason,
                        retry_after: Some(retry_after),
                    });
                }
                // Probe running elsewhere; wait for its outcome like any other waiter
                Admission::ProbeInFlight => {}
            }
        } else if breaker.state() == CircuitState::Open {
            if let Some(retry_after) = breaker.remaining_cooldown().filter(|d| !d.is_zero()) {
                return Err(SessionError::PoolUnavailable {
                    reason: breaker
                        .last_failure_reason()
                        .unwrap_or_else(|| "circuit open".to_string()),
                    retry_after: Some(retry_after),
                });
            }
        }

        state.queue.prune_abandoned();
        if state.queue.len() >= config.max_queue_size {
            let retry_after = Some(Duration::from_millis(defaults::BACKPRESSURE_RETRY_AFTER_MS));
            warn!(
                queued = state.queue.len(),
                max_queue_size = config.max_queue_size,
                "🏊 Browser pool saturated, rejecting acquisition"
            );
            return Err(if config.max_queue_size == 0 {
                SessionError::PoolExhausted {
                    max_size: config.max_size,
                    retry_after,
                }
            } else {
                SessionError::QueueFull {
                    queue_size: state.queue.len(),
                    retry_after,
                }
            });
        }

        let (id, receiver) = state.queue.enqueue();
        debug!(waiter_id = id, queued = state.queue.len(), "Acquisition queued");
        Ok(AcquirePlan::Wait(id, receiver))
    }

    /// The launch runs on its own task so a caller that gives up cannot leave
    /// a reserved slot or a half-open trial launch behind.
    async fn launch_for_caller(&self) -> Result<Lease> {
        let (sender, receiver) = oneshot::channel();
        let pool = self.clone();
        tokio::spawn(async move { pool.complete_caller_launch(sender).await });

        match receiver.await {
            Ok(fulfilment) => fulfilment,
            Err(_) => Err(SessionError::Internal("browser launch task ended without a result".to_string())),
        }
    }

    /// Launch with a slot already reserved in `creating` and hand the lease to
    /// the caller. If the caller is gone the browser goes idle for the queue.
    async fn complete_caller_launch(&self, sender: oneshot::Sender<Fulfilment>) {
        let outcome = self.launch_resource().await;
        let max_age = self.shared.config.max_age();

        let mut state = self.shared.state.lock();
        state.creating -= 1;

        match outcome {
            Ok(mut resource) => {
                if state.shut_down {
                    drop(state);
                    close_detached(resource.browser);
                    let _ = sender.send(Err(SessionError::PoolShutdown));
                    return;
                }
                let lease = resource.lease();
                state.resources.push(resource);
                state.created_total += 1;
                log_pool_event(
                    "created_and_leased",
                    Some(&lease.resource_id.to_string()),
                    state.resources.len(),
                    state.idle_count(),
                    state.queue.len(),
                );

                if let Err(Ok(unclaimed)) = sender.send(Ok(lease)) {
                    debug!(resource_id = %unclaimed.resource_id, "Launch outlived its caller, browser kept idle");
                    if let Some(resource) = state.resources.iter_mut().find(|r| r.id == unclaimed.resource_id) {
                        resource.unlease();
                    }
                    state.offer_idle(max_age);
                }
            }
            Err(error) => {
                let _ = sender.send(Err(error));
            }
        }

        drop(state);
        // Capacity freed by a failure, or a breaker just closed by this launch
        self.serve_queue();
    }

    async fn wait_in_queue(&self, id: u64, mut receiver: oneshot::Receiver<Fulfilment>) -> Result<Lease> {
        let started = Instant::now();
        let timeout = self.shared.config.acquire_timeout();

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(fulfilment)) => fulfilment,
            // Sender dropped without an answer only happens when the queue is drained
            Ok(Err(_)) => Err(SessionError::PoolShutdown),
            Err(_) => {
                let removed = self.shared.state.lock().queue.remove(id);
                if !removed {
                    // Served between the deadline and our lock
                    match receiver.try_recv() {
                        Ok(fulfilment) => return fulfilment,
                        Err(oneshot::error::TryRecvError::Closed) => {
                            return Err(SessionError::PoolShutdown)
                        }
                        Err(oneshot::error::TryRecvError::Empty) => {}
                    }
                }
                warn!(
                    waiter_id = id,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "⏰ Queued acquisition timed out"
                );
                Err(SessionError::PoolTimeout {
                    waited: started.elapsed(),
                    retry_after: Some(Duration::from_millis(defaults::BACKPRESSURE_RETRY_AFTER_MS)),
                })
            }
        }
    }

    /// Memory check, launch, breaker bookkeeping and disconnect subscription.
    async fn launch_resource(&self) -> Result<PooledResource> {
        let breaker = &self.shared.breaker;
        let started = Instant::now();

        if let Err(reason) = self.check_memory_pressure().await {
            breaker.record_failure(started.elapsed(), &reason);
            return Err(self.launch_error(reason));
        }

        match self.shared.launcher.launch().await {
            Ok(browser) => {
                breaker.record_success(started.elapsed());
                let resource = PooledResource::new(browser);
                self.watch_disconnect(&resource);
                info!(
                    resource_id = %resource.id,
                    launch_ms = started.elapsed().as_millis() as u64,
                    "🚀 Browser launched"
                );
                Ok(resource)
            }
            Err(error) => {
                let reason = error.to_string();
                breaker.record_failure(started.elapsed(), &reason);
                Err(self.launch_error(reason))
            }
        }
    }

    fn launch_error(&self, reason: String) -> SessionError {
        match self.shared.breaker.remaining_cooldown() {
            Some(retry_after) => SessionError::PoolUnavailable {
                reason,
                retry_after: Some(retry_after),
            },
            None => SessionError::ResourceLaunchFailed(reason),
        }
    }

    async fn check_memory_pressure(&self) -> std::result::Result<(), String> {
        let threshold = self.shared.config.memory_pressure_threshold;
        let used = self.shared.memory.used_fraction();
        if used < threshold {
            return Ok(());
        }

        warn!(
            used_fraction = used,
            threshold = threshold,
            "Host memory pressure high, delaying browser launch"
        );
        tokio::time::sleep(self.shared.config.memory_recheck_delay()).await;

        let used = self.shared.memory.used_fraction();
        if used < threshold {
            Ok(())
        } else {
            Err(format!(
                "host memory pressure {:.0}% at or above {:.0}% threshold",
                used * 100.0,
                threshold * 100.0
            ))
        }
    }

    /// Flags the resource unhealthy once its process disconnects. Never evicts
    /// an active lease; destruction waits for release or the sweep.
    fn watch_disconnect(&self, resource: &PooledResource) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = Arc::downgrade(&self.shared);
        let browser = Arc::clone(&resource.browser);
        let resource_id = resource.id;

        handle.spawn(async move {
            browser.closed().await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut state = shared.state.lock();
            if let Some(resource) = state.resources.iter_mut().find(|r| r.id == resource_id) {
                if resource.healthy {
                    resource.healthy = false;
                    warn!(
                        resource_id = %resource_id,
                        leased = resource.is_leased(),
                        "🔌 Browser disconnected, flagged unhealthy"
                    );
                }
            }
        });
    }

    /// Return a lease.
    ///
    /// Refused unless `token` is the resource's current lease token. The one
    /// exception is the original holder of a lease the sweep reclaimed: that
    /// late release destroys the resource.
    pub fn release(&self, resource_id: ResourceId, token: LeaseToken) -> ReleaseOutcome {
        let max_age = self.shared.config.max_age();
        let mut state = self.shared.state.lock();

        let Some(index) = state.resources.iter().position(|r| r.id == resource_id) else {
            warn!(resource_id = %resource_id, "Release denied: unknown resource");
            return ReleaseOutcome::Denied;
        };

        let resource = &mut state.resources[index];
        let destroy = if resource.holds(&token) {
            resource.lease = None;
            resource.last_used_at = Instant::now();
            !resource.is_alive() || resource.marked_for_removal || resource.is_expired(max_age)
        } else if resource.reclaimed_token == Some(token) {
            debug!(resource_id = %resource_id, "Late release of reclaimed lease");
            true
        } else {
            warn!(
                resource_id = %resource_id,
                "Release denied: token does not match current lease"
            );
            return ReleaseOutcome::Denied;
        };

        if destroy {
            let removed = state.take(index);
            log_pool_event(
                "destroyed_on_release",
                Some(&resource_id.to_string()),
                state.resources.len(),
                state.idle_count(),
                state.queue.len(),
            );
            drop(state);
            close_detached(removed.browser);
            self.serve_queue();
            ReleaseOutcome::Destroyed
        } else {
            state.offer_idle(max_age);
            log_pool_event(
                "released",
                Some(&resource_id.to_string()),
                state.resources.len(),
                state.idle_count(),
                state.queue.len(),
            );
            ReleaseOutcome::Returned
        }
    }

    /// Serve queued waiters: idle resources first, then fresh launches for the
    /// live waiters no in-flight launch will cover, within capacity and what
    /// the breaker admits. Each launch result goes to whoever is at the head
    /// when it completes.
    fn serve_queue(&self) {
        let config = &self.shared.config;
        let launches = {
            let mut state = self.shared.state.lock();
            state.offer_idle(config.max_age());
            if state.shut_down {
                return;
            }

            let wanted = state
                .queue
                .live_count()
                .saturating_sub(state.creating)
                .min(config.max_size.saturating_sub(state.size()));
            let mut launches = 0;
            while launches < wanted {
                match self.shared.breaker.try_admit() {
                    Admission::Allowed => launches += 1,
                    Admission::Probe => {
                        launches += 1;
                        break;
                    }
                    Admission::ProbeInFlight | Admission::Rejected { .. } => break,
                }
            }
            state.creating += launches;
            launches
        };

        if launches == 0 {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.shared.state.lock().creating -= launches;
            return;
        };
        for _ in 0..launches {
            let pool = self.clone();
            handle.spawn(async move { pool.launch_for_queue().await });
        }
    }

    /// Launch with a slot already reserved in `creating`; the new browser goes
    /// idle and is offered to the queue.
    async fn launch_for_queue(&self) {
        let outcome = self.launch_resource().await;
        let max_age = self.shared.config.max_age();

        let mut state = self.shared.state.lock();
        state.creating -= 1;

        match outcome {
            Ok(resource) => {
                if state.shut_down {
                    drop(state);
                    close_detached(resource.browser);
                    return;
                }
                state.resources.push(resource);
                state.created_total += 1;
                state.offer_idle(max_age);
            }
            Err(error) => {
                state.queue.prune_abandoned();
                if let Some(waiter) = state.queue.pop_front() {
                    let _ = waiter.sender.send(Err(error));
                }
            }
        }

        drop(state);
        self.serve_queue();
    }

    /// Spawn the sweep and self-heal loops. Calling again is a no-op.
    pub fn start_maintenance(&self) {
        let mut handles = self.shared.maintenance.lock();
        if !handles.is_empty() || self.shared.state.lock().shut_down {
            return;
        }

        let sweep_pool = self.clone();
        let sweep_interval = self.shared.config.sweep_interval();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(sweep_interval) => {
                        sweep_pool.sweep();
                    }
                    _ = sweep_pool.shared.shutdown_notify.notified() => {
                        info!("Pool sweep loop shutting down");
                        break;
                    }
                }
            }
        }));

        let heal_pool = self.clone();
        let heal_interval = self.shared.config.self_heal_interval();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(heal_interval) => {
                        heal_pool.self_heal().await;
                    }
                    _ = heal_pool.shared.shutdown_notify.notified() => {
                        info!("Pool self-heal loop shutting down");
                        break;
                    }
                }
            }
        }));

        info!(
            sweep_interval_ms = sweep_interval.as_millis() as u64,
            self_heal_interval_ms = heal_interval.as_millis() as u64,
            "✅ Pool maintenance loops started"
        );
    }

    /// Stop timers, reject every queued waiter and destroy every resource,
    /// leased or not. Safe to call more than once.
    pub async fn shutdown(&self) {
        let (waiters, resources) = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            let waiters: Vec<_> = state.queue.drain().collect();
            let resources = std::mem::take(&mut state.resources);
            state.destroyed_total += resources.len() as u64;
            (waiters, resources)
        };

        info!(
            rejected_waiters = waiters.len(),
            destroyed_resources = resources.len(),
            "🛑 Browser pool shutting down"
        );

        for waiter in waiters {
            let _ = waiter.sender.send(Err(SessionError::PoolShutdown));
        }

        self.shared.shutdown_notify.notify_waiters();
        let handles: Vec<_> = self.shared.maintenance.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
        }

        futures::future::join_all(resources.iter().map(|r| r.browser.close())).await;
        info!("✅ Browser pool shutdown complete");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shut_down
    }

    pub fn stats(&self) -> PoolStats {
        let breaker = self.shared.breaker.metrics();
        let state = self.shared.state.lock();
        let leased = state.resources.iter().filter(|r| r.is_leased()).count();
        let reclaimed = state.resources.iter().filter(|r| r.reclaimed_at.is_some()).count();

        PoolStats {
            max_size: self.shared.config.max_size,
            total: state.resources.len(),
            idle: state.idle_count(),
            leased,
            reclaimed,
            creating: state.creating,
            queued: state.queue.len(),
            oldest_wait_ms: state.queue.oldest_wait().map(|d| d.as_millis() as u64),
            max_queue_size: self.shared.config.max_queue_size,
            created_total: state.created_total,
            destroyed_total: state.destroyed_total,
            reclaimed_total: state.reclaimed_total,
            shut_down: state.shut_down,
            breaker,
        }
    }
}

/// Close a browser without blocking the caller.
fn close_detached(browser: Arc<dyn BrowserProcess>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            browser.close().await;
        });
    }
}
