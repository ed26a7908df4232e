//! # Refresh Scheduler
//!
//! Drives refreshes without an inbound request:
//!
//! - **Daily sweep** of every principal at a fixed local time
//! - **Proactive sweep** every few hours for tokens expiring within the
//!   lookahead window
//! - **Startup catch-up** when the service starts inside operating hours
//!   and some principal has no valid token
//!
//! Principals are refreshed one at a time with a pause between them so a
//! sweep never floods the browser pool. Pool-pressure errors back off and
//! retry the same principal; other errors move on. Sweeps never overlap
//! within a process; across processes the per-principal lock decides.
//! Shutdown lets the refresh in flight finish, up to a grace period.

mod sweep;
pub mod window;

pub use sweep::{SweepKind, SweepOutcome, SweepReport};
pub use window::ScheduleWindow;

use crate::config::SchedulerConfig;
use crate::constants::components;
use crate::error::Result;
use crate::logging::log_error;
use crate::orchestration::SessionRefresher;
use crate::ports::SessionStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct SchedulerInner {
    config: SchedulerConfig,
    window: ScheduleWindow,
    refresher: Arc<dyn SessionRefresher>,
    store: Arc<dyn SessionStore>,
    running: AtomicBool,
    stopping: AtomicBool,
    shutdown_notify: Notify,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Clone)]
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl RefreshScheduler {
    pub fn new(
        config: SchedulerConfig,
        refresher: Arc<dyn SessionRefresher>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let window = ScheduleWindow::from_config(&config)?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                window,
                refresher,
                store,
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
                handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn window(&self) -> &ScheduleWindow {
        &self.inner.window
    }

    pub fn is_sweep_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    /// Sleep unless shutdown begins first. `false` when shutdown won.
    async fn pause(&self, duration: Duration) -> bool {
        // Registered before the flag check so a concurrent notify is not lost
        let notified = self.inner.shutdown_notify.notified();
        if self.is_stopping() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopping(),
            _ = notified => false,
        }
    }

    fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.inner.config.lookahead()).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Sweep now if inside operating hours and any principal lacks a valid
    /// or comfortably unexpired token. `None` when no catch-up was needed.
    pub async fn startup_catch_up(&self) -> Result<Option<SweepOutcome>> {
        if !self.inner.window.within_operating_hours(Utc::now()) {
            debug!("Outside operating hours, no startup catch-up");
            return Ok(None);
        }
        if self.eligible_targets(SweepKind::Startup).await?.is_empty() {
            debug!("Every session valid, no startup catch-up");
            return Ok(None);
        }

        info!("⏰ Startup catch-up sweep triggered");
        self.run_sweep(SweepKind::Startup).await.map(Some)
    }

    /// Spawn the startup check and the daily and proactive loops. No-op when
    /// the scheduler is disabled.
    pub fn start(&self) {
        if !self.inner.config.enabled {
            info!("Refresh scheduler disabled");
            return;
        }
        self.inner.stopping.store(false, Ordering::Release);

        let startup = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                if let Err(e) = scheduler.startup_catch_up().await {
                    log_error(components::SCHEDULER, "startup_catch_up", &e.to_string(), None);
                }
            })
        };
        let daily = {
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.daily_loop().await })
        };
        let proactive = {
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.proactive_loop().await })
        };

        self.inner.handles.lock().extend([startup, daily, proactive]);
        info!(
            daily_at = %self.inner.config.daily_sweep_time,
            proactive_interval_ms = self.inner.config.proactive_interval_ms,
            "⏰ Refresh scheduler started"
        );
    }

    /// Stop the loops. A refresh already in flight is allowed to finish, and
    /// its sweep ends before the next principal. Tasks still running once
    /// `shutdown_grace_ms` has passed are aborted.
    pub async fn shutdown(&self) {
        self.inner.stopping.store(true, Ordering::Release);
        self.inner.shutdown_notify.notify_waiters();

        let deadline = Instant::now() + self.inner.config.shutdown_grace();
        let handles: Vec<_> = self.inner.handles.lock().drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(
                    grace_ms = self.inner.config.shutdown_grace_ms,
                    "Scheduler task outlived the shutdown grace period, aborting"
                );
                handle.abort();
                let _ = handle.await;
            }
        }
        info!("⏰ Refresh scheduler stopped");
    }

    async fn daily_loop(&self) {
        loop {
            let wait = self.inner.window.until_next_daily_run(Utc::now());
            debug!(wait_secs = wait.as_secs(), "Next daily sweep scheduled");
            if !self.pause(wait).await {
                break;
            }
            self.sweep_logged(SweepKind::Daily).await;
        }
    }

    async fn proactive_loop(&self) {
        let interval = self.inner.config.proactive_interval();
        while self.pause(interval).await {
            self.sweep_logged(SweepKind::Proactive).await;
        }
    }

    async fn sweep_logged(&self, kind: SweepKind) {
        if let Err(e) = self.run_sweep(kind).await {
            log_error(components::SCHEDULER, &format!("{kind}_sweep"), &e.to_string(), None);
        }
    }
}
