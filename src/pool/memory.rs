//! Host memory pressure checks performed before each browser launch.

use parking_lot::Mutex;
use std::fmt::Debug;
use sysinfo::System;
use tracing::debug;

/// Reports the fraction of host memory in use (0.0 - 1.0).
pub trait MemoryProbe: Send + Sync + Debug {
    fn used_fraction(&self) -> f64;
}

/// [`MemoryProbe`] backed by `sysinfo`.
#[derive(Debug)]
pub struct SysinfoMemoryProbe {
    system: Mutex<System>,
}

impl SysinfoMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoMemoryProbe {
    fn used_fraction(&self) -> f64 {
        let mut sys = self.system.lock();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            // Unknown totals (some containers) never block launches
            return 0.0;
        }

        // available_memory accounts for reclaimable cache, used_memory does not
        let available = sys.available_memory().min(total);
        let fraction = 1.0 - (available as f64 / total as f64);

        debug!(
            total_memory_mb = total / (1024 * 1024),
            available_memory_mb = available / (1024 * 1024),
            used_fraction = fraction,
            "Sampled host memory"
        );
        fraction
    }
}
