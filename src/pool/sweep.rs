//! Periodic sweep and self-heal.

use super::resource::PooledResource;
use super::BrowserPool;
use crate::logging::log_pool_event;
use crate::resilience::Admission;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What one sweep pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    /// Idle past idle-timeout or max-age
    pub expired: usize,
    /// Disconnected or marked for removal
    pub unhealthy: usize,
    /// Leases older than the stale-lease threshold, cleared this pass
    pub reclaimed: usize,
    /// Reclaimed resources destroyed after their grace interval
    pub removed_reclaimed: usize,
}

impl SweepSummary {
    pub fn destroyed(&self) -> usize {
        self.expired + self.unhealthy + self.removed_reclaimed
    }
}

impl BrowserPool {
    /// One sweep pass.
    ///
    /// Stale leases are cleared and their resource flagged, never interrupted;
    /// the former holder keeps using the browser until it releases or the
    /// resource is destroyed one further stale-lease interval later.
    pub fn sweep(&self) -> SweepSummary {
        let config = &self.shared.config;
        let stale_after = config.stale_lease();
        let idle_timeout = config.idle_timeout();
        let max_age = config.max_age();
        let mut summary = SweepSummary::default();

        let doomed = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return summary;
            }
            let now = Instant::now();

            for resource in state.resources.iter_mut() {
                let Some(lease) = resource.lease else {
                    continue;
                };
                if now.duration_since(lease.acquired_at) >= stale_after {
                    resource.lease = None;
                    resource.reclaimed_token = Some(lease.token);
                    resource.reclaimed_at = Some(now);
                    resource.marked_for_removal = true;
                    summary.reclaimed += 1;
                    warn!(
                        resource_id = %resource.id,
                        lease_age_ms = now.duration_since(lease.acquired_at).as_millis() as u64,
                        "♻️ Stale lease reclaimed"
                    );
                }
            }

            let mut kept = Vec::with_capacity(state.resources.len());
            let mut doomed: Vec<PooledResource> = Vec::new();
            for resource in std::mem::take(&mut state.resources) {
                if resource.is_leased() {
                    kept.push(resource);
                } else if let Some(reclaimed_at) = resource.reclaimed_at {
                    if now.duration_since(reclaimed_at) >= stale_after {
                        summary.removed_reclaimed += 1;
                        doomed.push(resource);
                    } else {
                        kept.push(resource);
                    }
                } else if !resource.is_alive() || resource.marked_for_removal {
                    summary.unhealthy += 1;
                    doomed.push(resource);
                } else if resource.is_expired(max_age)
                    || now.duration_since(resource.last_used_at) >= idle_timeout
                {
                    summary.expired += 1;
                    doomed.push(resource);
                } else {
                    kept.push(resource);
                }
            }

            state.resources = kept;
            state.destroyed_total += doomed.len() as u64;
            state.reclaimed_total += summary.reclaimed as u64;

            if summary.destroyed() > 0 || summary.reclaimed > 0 {
                log_pool_event(
                    "sweep",
                    None,
                    state.resources.len(),
                    state.idle_count(),
                    state.queue.len(),
                );
            }
            doomed
        };

        for resource in doomed {
            debug!(resource_id = %resource.id, "Destroying swept browser");
            super::close_detached(resource.browser);
        }

        if summary.destroyed() > 0 {
            self.serve_queue();
        }
        summary
    }

    /// Sweep, then probe a tripped breaker whose cooldown has passed even if
    /// nobody is asking for a browser.
    pub async fn self_heal(&self) {
        self.sweep();

        let probe = {
            let mut state = self.shared.state.lock();
            let breaker = &self.shared.breaker;
            if state.shut_down
                || state.creating > 0
                || state.size() >= self.shared.config.max_size
                || !breaker.is_probe_due()
            {
                false
            } else {
                match breaker.try_admit() {
                    Admission::Probe | Admission::Allowed => {
                        state.creating += 1;
                        true
                    }
                    Admission::ProbeInFlight | Admission::Rejected { .. } => false,
                }
            }
        };

        if probe {
            info!("🩺 Self-heal probing browser launch");
            // Runs to completion even if this call is dropped
            let pool = self.clone();
            if let Err(e) = tokio::spawn(async move { pool.launch_for_queue().await }).await {
                warn!(error = %e, "Self-heal launch task failed");
            }
        }
    }
}
