//! FIFO wait queue for acquisitions that cannot be satisfied immediately.
//!
//! Entries are addressed by id so a timed-out waiter removes itself with a
//! lookup instead of holding a reference into the queue.

use super::resource::Lease;
use crate::error::SessionError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::time::Instant;

pub(crate) type Fulfilment = Result<Lease, SessionError>;

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub(crate) struct PendingAcquisition {
    pub id: u64,
    pub enqueued_at: Instant,
    pub sender: oneshot::Sender<Fulfilment>,
}

#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    entries: VecDeque<PendingAcquisition>,
}

impl WaitQueue {
    /// Push a waiter to the back. Returns its id and the receiving half.
    pub fn enqueue(&mut self) -> (u64, oneshot::Receiver<Fulfilment>) {
        let (sender, receiver) = oneshot::channel();
        let id = NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed);
        self.entries.push_back(PendingAcquisition {
            id,
            enqueued_at: Instant::now(),
            sender,
        });
        (id, receiver)
    }

    /// Remove a waiter by id. `false` means it was already served.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop waiters whose acquire future was cancelled.
    pub fn prune_abandoned(&mut self) {
        self.entries.retain(|entry| !entry.sender.is_closed());
    }

    pub fn pop_front(&mut self) -> Option<PendingAcquisition> {
        self.entries.pop_front()
    }

    /// Waiters whose acquire future is still listening
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.sender.is_closed()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = PendingAcquisition> + '_ {
        self.entries.drain(..)
    }

    pub fn oldest_wait(&self) -> Option<std::time::Duration> {
        self.entries.front().map(|entry| entry.enqueued_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_by_id_preserves_order() {
        let mut queue = WaitQueue::default();
        let (first, _rx1) = queue.enqueue();
        let (second, _rx2) = queue.enqueue();
        let (third, _rx3) = queue.enqueue();

        assert!(queue.remove(second));
        assert!(!queue.remove(second));
        assert_eq!(queue.pop_front().map(|e| e.id), Some(first));
        assert_eq!(queue.pop_front().map(|e| e.id), Some(third));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_prune_drops_cancelled_waiters() {
        let mut queue = WaitQueue::default();
        let (_, rx1) = queue.enqueue();
        let (kept, _rx2) = queue.enqueue();
        drop(rx1);

        assert_eq!(queue.live_count(), 1);
        queue.prune_abandoned();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_front().map(|e| e.id), Some(kept));
    }
}
