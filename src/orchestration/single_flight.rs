//! In-process single-flight deduplication.
//!
//! The first caller for a key spawns the work; later callers with the same key
//! attach to the same shared future. The entry is removed when the work
//! settles, win or lose, so the next call starts fresh. Work runs on its own
//! task and finishes even if every caller is dropped.

use crate::error::{Result, SessionError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type Flight<V> = Shared<BoxFuture<'static, Result<V>>>;

pub struct SingleFlight<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    flights: DashMap<K, (u64, Flight<V>)>,
    next_id: AtomicU64,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `work` for `key`, or join the flight already running for it.
    /// `work` is only called when a new flight starts.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: K, work: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let flight = match self.flights.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!(key = ?key, "Joining in-flight work");
                existing.get().1.clone()
            }
            Entry::Vacant(slot) => {
                let flight_id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let registry = Arc::clone(self);
                let cleanup_key = key.clone();
                let fut = work();

                let task = tokio::spawn(async move {
                    let result = fut.await;
                    registry
                        .flights
                        .remove_if(&cleanup_key, |_, (id, _)| *id == flight_id);
                    result
                });

                let flight: Flight<V> = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(join_error) => Err(SessionError::Internal(format!(
                            "single-flight task failed: {join_error}"
                        ))),
                    }
                }
                .boxed()
                .shared();

                slot.insert((flight_id, flight.clone()));
                flight
            }
        };

        flight.await
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.contains_key(key)
    }
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flights: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let make = |runs: Arc<AtomicUsize>| {
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(42)
            }
        };

        let (a, b) = tokio::join!(
            flights.run("k", make(Arc::clone(&runs))),
            flights.run("k", make(Arc::clone(&runs)))
        );
        assert_eq!(a.unwrap(), 42);
        assert_eq!(b.unwrap(), 42);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_shared_and_entry_cleared() {
        let flights: Arc<SingleFlight<String, u32>> = Arc::new(SingleFlight::new());

        let failing = || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(SessionError::Internal("boom".to_string()))
        };
        let (a, b) = tokio::join!(
            flights.run("k".to_string(), failing),
            flights.run("k".to_string(), failing)
        );
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert!(!flights.is_in_flight(&"k".to_string()));

        // Next request starts fresh
        let value = flights.run("k".to_string(), || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
