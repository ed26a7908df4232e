//! Coordination store seam and the in-process fallback.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::Instant;

/// Result of an atomic set-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Acquired,
    /// Another owner holds the key; `remaining` is its TTL if known
    Held { remaining: Option<Duration> },
}

/// The two atomic primitives a lock transport must provide.
#[async_trait]
pub trait CoordinationStore: Send + Sync + Debug {
    /// Write `token` under `key` with `ttl` only if no live value exists.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<SetOutcome>;

    /// Delete `key` only if its current value equals `token`.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool>;

    async fn health_check(&self) -> Result<bool>;

    /// Whether state is shared across processes
    fn is_distributed(&self) -> bool;

    fn provider_name(&self) -> &'static str;
}

#[derive(Debug)]
struct LocalRecord {
    token: String,
    expires_at: Instant,
}

/// Process-local store with the same set-if-absent + TTL semantics.
/// Expired records are treated as absent and pruned lazily.
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    records: Mutex<HashMap<String, LocalRecord>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records.lock().values().filter(|r| r.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<SetOutcome> {
        let now = Instant::now();
        let mut records = self.records.lock();

        if let Some(existing) = records.get(key) {
            if existing.expires_at > now {
                return Ok(SetOutcome::Held {
                    remaining: Some(existing.expires_at - now),
                });
            }
        }

        records.insert(
            key.to_string(),
            LocalRecord {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(SetOutcome::Acquired)
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        let now = Instant::now();
        let mut records = self.records.lock();

        match records.get(key) {
            Some(record) if record.expires_at <= now => {
                records.remove(key);
                Ok(false)
            }
            Some(record) if record.token == token => {
                records.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn is_distributed(&self) -> bool {
        false
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
