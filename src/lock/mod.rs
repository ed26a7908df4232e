//! # Distributed Lock
//!
//! Named, TTL-bound exclusive claims shared across processes. Guarantees at
//! most one concurrent refresh per principal across every instance; the
//! orchestrator's single-flight map only dedups inside one process.
//!
//! The shared store is mutated only through its two atomic primitives,
//! set-if-absent and compare-and-delete, so no holder can overwrite or free
//! another holder's claim.
//!
//! Without a shared store the lock falls back to an in-process record with
//! identical semantics, unless strict mode is on, in which case acquisition
//! fails with [`SessionError::LockTransportUnavailable`].

pub mod redis_store;
pub mod store;

pub use redis_store::RedisCoordinationStore;
pub use store::{CoordinationStore, InMemoryCoordinationStore, SetOutcome};

use crate::config::LockConfig;
use crate::constants::components;
use crate::error::{Result, SessionError};
use crate::logging::log_error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which transport recorded a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTransport {
    Shared,
    Local,
}

/// Descriptor returned by a successful acquire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// Namespaced key as written to the store
    pub key: String,
    pub token: String,
    pub ttl: Duration,
    pub transport: LockTransport,
}

impl LockHandle {
    fn is_complete(&self) -> bool {
        !self.key.is_empty() && !self.token.is_empty()
    }
}

#[derive(Debug)]
pub struct DistributedLock {
    shared: Option<Arc<dyn CoordinationStore>>,
    local: InMemoryCoordinationStore,
    strict: bool,
    namespace: String,
}

impl DistributedLock {
    pub fn new(shared: Option<Arc<dyn CoordinationStore>>, strict: bool, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        match &shared {
            Some(store) => info!(
                provider = store.provider_name(),
                namespace = %namespace,
                "🔒 Distributed lock using shared coordination store"
            ),
            None if strict => warn!(
                namespace = %namespace,
                "🔒 Distributed lock in strict mode without a shared store: acquisitions will fail"
            ),
            None => warn!(
                namespace = %namespace,
                "🔒 Distributed lock falling back to process-local records"
            ),
        }

        Self {
            shared,
            local: InMemoryCoordinationStore::new(),
            strict,
            namespace,
        }
    }

    /// Local-only lock, for tests and single-process deployments
    pub fn local(namespace: impl Into<String>) -> Self {
        Self::new(None, false, namespace)
    }

    /// Build from configuration, connecting to Redis when `redis_url` is set
    pub async fn from_config(config: &LockConfig) -> Result<Self> {
        let shared: Option<Arc<dyn CoordinationStore>> = match &config.redis_url {
            Some(url) => Some(Arc::new(RedisCoordinationStore::connect(url).await?)),
            None => None,
        };
        Ok(Self::new(shared, config.strict, config.namespace.clone()))
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn has_shared_store(&self) -> bool {
        self.shared.is_some()
    }

    pub fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Claim `key` for `ttl`. Never retried internally; on contention the
    /// error carries the holder's remaining TTL as a retry hint.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockHandle> {
        if key.trim().is_empty() {
            return Err(SessionError::ValidationError("lock key must not be empty".to_string()));
        }
        if ttl.is_zero() {
            return Err(SessionError::ValidationError("lock ttl must be greater than 0".to_string()));
        }

        let namespaced = self.namespaced(key);
        let token = Uuid::new_v4().to_string();

        let (store, transport): (&dyn CoordinationStore, LockTransport) = match &self.shared {
            Some(store) => (store.as_ref(), LockTransport::Shared),
            None if self.strict => {
                log_error(
                    components::LOCK,
                    "acquire",
                    "no shared coordination store configured",
                    Some(&namespaced),
                );
                return Err(SessionError::LockTransportUnavailable(
                    "strict mode requires a shared coordination store".to_string(),
                ));
            }
            None => (&self.local as &dyn CoordinationStore, LockTransport::Local),
        };

        match store.set_if_absent(&namespaced, &token, ttl).await? {
            SetOutcome::Acquired => {
                debug!(key = %namespaced, ttl_ms = ttl.as_millis() as u64, ?transport, "Lock acquired");
                Ok(LockHandle {
                    key: namespaced,
                    token,
                    ttl,
                    transport,
                })
            }
            SetOutcome::Held { remaining } => {
                debug!(key = %namespaced, remaining_ms = ?remaining.map(|d| d.as_millis()), "Lock held");
                Err(SessionError::LockHeld {
                    key: key.to_string(),
                    retry_after: remaining,
                })
            }
        }
    }

    /// Compare-and-delete. Returns whether this handle still owned the key.
    /// Incomplete handles are ignored.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool> {
        if !handle.is_complete() {
            debug!("Ignoring release of incomplete lock handle");
            return Ok(false);
        }

        let released = match handle.transport {
            LockTransport::Shared => match &self.shared {
                Some(store) => store.compare_and_delete(&handle.key, &handle.token).await?,
                None => false,
            },
            LockTransport::Local => self.local.compare_and_delete(&handle.key, &handle.token).await?,
        };

        if released {
            debug!(key = %handle.key, "Lock released");
        } else {
            warn!(key = %handle.key, "Lock no longer owned at release (expired or taken over)");
        }
        Ok(released)
    }

    /// Run `work` while holding `key`; the lock is released whatever the outcome.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, ttl: Duration, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.acquire(key, ttl).await?;
        let outcome = work().await;
        if let Err(e) = self.release(&handle).await {
            log_error(components::LOCK, "release", &e.to_string(), Some(&handle.key));
        }
        outcome
    }

    pub async fn health_check(&self) -> Result<bool> {
        match &self.shared {
            Some(store) => store.health_check().await,
            None => Ok(!self.strict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_held_until_ttl_elapses() {
        let lock = DistributedLock::local("test");
        let ttl = Duration::from_millis(1000);

        let first = lock.acquire("refresh:u1", ttl).await.unwrap();
        assert_eq!(first.key, "test:refresh:u1");
        assert_eq!(first.transport, LockTransport::Local);

        match lock.acquire("refresh:u1", ttl).await {
            Err(SessionError::LockHeld { key, retry_after }) => {
                assert_eq!(key, "refresh:u1");
                assert_eq!(retry_after, Some(Duration::from_millis(1000)));
            }
            other => panic!("expected LockHeld, got {other:?}"),
        }

        tokio::time::advance(ttl).await;
        assert!(lock.acquire("refresh:u1", ttl).await.is_ok());
    }

    #[tokio::test]
    async fn test_strict_mode_without_store_fails() {
        let lock = DistributedLock::new(None, true, "test");
        let err = lock.acquire("refresh:u1", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::LockTransportUnavailable(_)));
        assert!(!lock.health_check().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_takeover_does_not_free_new_owner() {
        let lock = DistributedLock::local("test");
        let ttl = Duration::from_millis(100);

        let stale = lock.acquire("k", ttl).await.unwrap();
        tokio::time::advance(ttl).await;
        let current = lock.acquire("k", ttl).await.unwrap();

        assert!(!lock.release(&stale).await.unwrap());
        assert!(matches!(
            lock.acquire("k", ttl).await,
            Err(SessionError::LockHeld { .. })
        ));
        assert!(lock.release(&current).await.unwrap());
    }

    #[tokio::test]
    async fn test_incomplete_handle_release_is_noop() {
        let lock = DistributedLock::local("test");
        let handle = LockHandle {
            key: String::new(),
            token: "t".to_string(),
            ttl: Duration::from_secs(1),
            transport: LockTransport::Local,
        };
        assert!(!lock.release(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let lock = DistributedLock::local("test");
        let ttl = Duration::from_secs(10);

        let outcome: Result<()> = lock
            .with_lock("k", ttl, || async { Err(SessionError::Internal("boom".to_string())) })
            .await;
        assert!(outcome.is_err());

        let value = lock.with_lock("k", ttl, || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
