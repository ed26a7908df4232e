//! Pooled browser resources and their leases.

use super::launcher::BrowserProcess;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Unique id of a pooled browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque ownership token handed out with each lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a successful `acquire` returns
#[derive(Debug, Clone)]
pub struct Lease {
    pub resource_id: ResourceId,
    pub token: LeaseToken,
    pub browser: Arc<dyn BrowserProcess>,
    pub acquired_at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LeaseRecord {
    pub token: LeaseToken,
    pub acquired_at: Instant,
}

/// Outcome of a `release` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Resource went back to idle (or straight to a queued waiter)
    Returned,
    /// Resource was unhealthy, expired, reclaimed or marked and has been destroyed
    Destroyed,
    /// Token did not match the current lease; nothing changed
    Denied,
}

#[derive(Debug)]
pub(crate) struct PooledResource {
    pub id: ResourceId,
    pub browser: Arc<dyn BrowserProcess>,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub use_count: u64,
    /// Cleared by the disconnect subscription; never set back
    pub healthy: bool,
    pub marked_for_removal: bool,
    pub lease: Option<LeaseRecord>,
    /// Token of a lease the sweep reclaimed, so its late release can be recognised
    pub reclaimed_token: Option<LeaseToken>,
    pub reclaimed_at: Option<Instant>,
}

impl PooledResource {
    pub fn new(browser: Arc<dyn BrowserProcess>) -> Self {
        let now = Instant::now();
        Self {
            id: ResourceId::new(),
            browser,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            healthy: true,
            marked_for_removal: false,
            lease: None,
            reclaimed_token: None,
            reclaimed_at: None,
        }
    }

    pub fn is_leased(&self) -> bool {
        self.lease.is_some()
    }

    pub fn is_alive(&self) -> bool {
        self.healthy && self.browser.is_connected()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.age() >= max_age
    }

    /// Idle, alive, unmarked and young enough to hand out
    pub fn is_leasable(&self, max_age: Duration) -> bool {
        !self.is_leased() && !self.marked_for_removal && self.is_alive() && !self.is_expired(max_age)
    }

    /// Mark leased with a fresh token. Callers hold the pool lock.
    pub fn lease(&mut self) -> Lease {
        let now = Instant::now();
        let token = LeaseToken::generate();
        self.lease = Some(LeaseRecord {
            token,
            acquired_at: now,
        });
        self.last_used_at = now;
        self.use_count += 1;

        Lease {
            resource_id: self.id,
            token,
            browser: Arc::clone(&self.browser),
            acquired_at: now,
        }
    }

    /// Undo a lease whose recipient vanished before receiving it
    pub fn unlease(&mut self) {
        self.lease = None;
        self.use_count = self.use_count.saturating_sub(1);
    }

    pub fn holds(&self, token: &LeaseToken) -> bool {
        self.lease.map(|l| l.token == *token).unwrap_or(false)
    }
}
