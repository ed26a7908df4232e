//! Point-in-time pool snapshot.

use crate::resilience::CircuitBreakerMetrics;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub max_size: usize,
    /// Resources in the pool, leased or not, excluding in-flight launches
    pub total: usize,
    pub idle: usize,
    pub leased: usize,
    /// Reclaimed by the sweep and awaiting destruction
    pub reclaimed: usize,
    pub creating: usize,
    pub queued: usize,
    /// Age of the head waiter, if any
    pub oldest_wait_ms: Option<u64>,
    pub max_queue_size: usize,
    pub created_total: u64,
    pub destroyed_total: u64,
    pub reclaimed_total: u64,
    pub shut_down: bool,
    pub breaker: CircuitBreakerMetrics,
}

impl PoolStats {
    /// Fraction of capacity in use, counting in-flight launches
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        (self.total - self.idle + self.creating) as f64 / self.max_size as f64
    }

    pub fn is_saturated(&self) -> bool {
        self.idle == 0 && self.total + self.creating >= self.max_size
    }
}
