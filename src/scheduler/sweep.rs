//! One pass over the eligible principals.

use super::RefreshScheduler;
use crate::constants::{components, defaults, truncate_reason};
use crate::error::{Result, SessionError};
use crate::logging::log_error;
use crate::orchestration::{BrokerType, RefreshContext};
use crate::ports::RefreshTarget;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// Bulk refresh of every principal at the configured local time
    Daily,
    /// Principals whose token expires within the lookahead window
    Proactive,
    /// Catch-up when the service starts inside operating hours
    Startup,
    /// Operator-triggered bulk refresh
    Manual,
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepKind::Daily => write!(f, "daily"),
            SweepKind::Proactive => write!(f, "proactive"),
            SweepKind::Startup => write!(f, "startup"),
            SweepKind::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub kind: SweepKind,
    pub attempted: usize,
    pub succeeded: usize,
    /// Terminal or unexpected errors
    pub failed: usize,
    /// Another instance held the principal's refresh lock
    pub skipped: usize,
    /// Still under pool pressure after every attempt
    pub deferred: usize,
    pub duration: Duration,
}

impl SweepReport {
    fn new(kind: SweepKind) -> Self {
        Self {
            kind,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            deferred: 0,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    AlreadyRunning,
}

impl SweepOutcome {
    pub fn report(&self) -> Option<&SweepReport> {
        match self {
            SweepOutcome::Completed(report) => Some(report),
            SweepOutcome::AlreadyRunning => None,
        }
    }
}

enum TargetResult {
    Succeeded,
    Failed,
    Skipped,
    Deferred,
}

/// Clears the running flag however the sweep ends, including task abort
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RefreshScheduler {
    /// Run one sweep now. Returns [`SweepOutcome::AlreadyRunning`] instead of
    /// overlapping a sweep already in progress.
    pub async fn run_sweep(&self, kind: SweepKind) -> Result<SweepOutcome> {
        let running = &self.inner.running;
        if running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(kind = %kind, "Sweep already running, skipping");
            return Ok(SweepOutcome::AlreadyRunning);
        }
        let _guard = RunningGuard(running);

        let started = Instant::now();
        let targets = self.eligible_targets(kind).await?;
        info!(kind = %kind, targets = targets.len(), "🧹 Refresh sweep started");

        let mut report = SweepReport::new(kind);
        for (index, target) in targets.iter().enumerate() {
            let proceed = if index > 0 {
                self.pause(self.inner.config.inter_request_delay()).await
            } else {
                !self.is_stopping()
            };
            if !proceed {
                warn!(kind = %kind, remaining = targets.len() - index, "Sweep interrupted by shutdown");
                break;
            }

            report.attempted += 1;
            match self.refresh_target(target).await {
                TargetResult::Succeeded => report.succeeded += 1,
                TargetResult::Failed => report.failed += 1,
                TargetResult::Skipped => report.skipped += 1,
                TargetResult::Deferred => report.deferred += 1,
            }
        }

        report.duration = started.elapsed();
        info!(
            kind = %kind,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            deferred = report.deferred,
            duration_ms = report.duration.as_millis() as u64,
            "🧹 Refresh sweep finished"
        );
        Ok(SweepOutcome::Completed(report))
    }

    pub(super) async fn eligible_targets(&self, kind: SweepKind) -> Result<Vec<RefreshTarget>> {
        let targets = self.inner.store.list_targets().await?;
        match kind {
            SweepKind::Daily | SweepKind::Manual => Ok(targets),
            SweepKind::Proactive | SweepKind::Startup => {
                let now = Utc::now();
                let lookahead = self.lookahead();
                Ok(targets
                    .into_iter()
                    .filter(|target| target.needs_refresh(now, lookahead))
                    .collect())
            }
        }
    }

    async fn refresh_target(&self, target: &RefreshTarget) -> TargetResult {
        let max_attempts = self.inner.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut context = RefreshContext::new(target.principal.clone(), target.broker.clone());
            context.account_id = target.account_id.clone();
            context.connection_id = target.connection_id.clone();
            let correlation_id = context.correlation_id.clone();

            let error = match self.inner.refresher.refresh(context).await {
                Ok(_) => {
                    debug!(principal = %target.principal, broker = %target.broker, "Sweep refresh succeeded");
                    return TargetResult::Succeeded;
                }
                Err(error) => error,
            };

            match error {
                e if e.is_pool_pressure() => {
                    if attempt >= max_attempts {
                        warn!(
                            principal = %target.principal,
                            attempts = attempt,
                            error = %e,
                            "Pool still saturated, deferring principal to the next sweep"
                        );
                        return TargetResult::Deferred;
                    }
                    let backoff = self
                        .inner
                        .config
                        .pool_backoff()
                        .max(e.retry_after().unwrap_or_default());
                    warn!(
                        principal = %target.principal,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Pool under pressure, backing off before retrying principal"
                    );
                    if !self.pause(backoff).await {
                        return TargetResult::Deferred;
                    }
                }
                SessionError::LockHeld { .. } => {
                    debug!(principal = %target.principal, "Refresh lock held elsewhere, skipping");
                    return TargetResult::Skipped;
                }
                e => {
                    log_error(
                        components::SCHEDULER,
                        "refresh_target",
                        &e.to_string(),
                        Some(&format!("{}:{}", target.broker, target.principal)),
                    );
                    // Terminal errors were already recorded by the orchestrator
                    if !e.is_terminal() && !matches!(e, SessionError::PoolShutdown) {
                        self.record_sweep_failure(&target.principal, &target.broker, &e, &correlation_id)
                            .await;
                    }
                    return TargetResult::Failed;
                }
            }
        }
    }

    async fn record_sweep_failure(
        &self,
        principal: &str,
        broker: &BrokerType,
        error: &SessionError,
        correlation_id: &str,
    ) {
        let reason = truncate_reason(&error.to_string(), defaults::FAILURE_REASON_MAX_LEN);
        if let Err(e) = self
            .inner
            .store
            .record_failure(principal, broker, &reason, correlation_id)
            .await
        {
            log_error(components::SCHEDULER, "record_failure", &e.to_string(), Some(correlation_id));
        }
    }
}
