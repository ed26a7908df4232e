//! RAII lease that always goes back to the pool.

use super::launcher::BrowserProcess;
use super::resource::{Lease, ReleaseOutcome};
use super::BrowserPool;
use std::sync::Arc;

/// Releases its lease on drop unless [`LeaseGuard::release`] was called first.
#[derive(Debug)]
pub struct LeaseGuard {
    pool: BrowserPool,
    lease: Lease,
    released: bool,
}

impl LeaseGuard {
    pub(crate) fn new(pool: BrowserPool, lease: Lease) -> Self {
        Self {
            pool,
            lease,
            released: false,
        }
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn browser(&self) -> &Arc<dyn BrowserProcess> {
        &self.lease.browser
    }

    /// Release now and report what the pool did with the resource
    pub fn release(mut self) -> ReleaseOutcome {
        self.released = true;
        self.pool.release(self.lease.resource_id, self.lease.token)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.released {
            self.pool.release(self.lease.resource_id, self.lease.token);
        }
    }
}
