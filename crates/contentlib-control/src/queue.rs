//! Per-identity work queue.
//!
//! Keys are handed to at most one worker at a time. A key enqueued while
//! already pending is deduplicated; a key enqueued while a worker holds it
//! is marked dirty and queued again when that worker calls
//! [`WorkQueue::done`].

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use contentlib_api::ObjectKey;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    pending: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    shut_down: bool,
}

/// Deduplicating work queue keyed by resource identity.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // No invariant spans a panic: every update completes under one lock.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` for processing.
    pub fn enqueue(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.pending.insert(key.clone()) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.pending.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shut_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release `key` after processing, re-queueing it if it went dirty.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) && !state.shut_down && state.pending.insert(key.clone()) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out new work. Pending keys are dropped.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        state.queue.clear();
        state.pending.clear();
        state.dirty.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    /// Number of keys waiting for a worker.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether no keys are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a worker currently holds `key`.
    #[must_use]
    pub fn is_processing(&self, key: &ObjectKey) -> bool {
        self.lock().processing.contains(key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::namespaced("ns", name)
    }

    #[tokio::test]
    async fn pending_keys_are_deduplicated() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));
        queue.enqueue(key("b"));
        queue.enqueue(key("a"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await, Some(key("a")));
        assert_eq!(queue.next().await, Some(key("b")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn in_flight_key_is_not_handed_out_twice() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));
        assert_eq!(queue.next().await, Some(key("a")));
        assert!(queue.is_processing(&key("a")));

        queue.enqueue(key("a"));
        assert!(queue.is_empty());

        queue.done(&key("a"));
        assert!(!queue.is_processing(&key("a")));
        assert_eq!(queue.next().await, Some(key("a")));
    }

    #[tokio::test]
    async fn clean_done_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));
        let k = queue.next().await.unwrap();
        queue.done(&k);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn waiting_worker_wakes_on_enqueue() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(key("a"));
        assert_eq!(waiter.await.unwrap(), Some(key("a")));
    }

    #[tokio::test]
    async fn shutdown_releases_waiters() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shutdown();
        assert_eq!(waiter.await.unwrap(), None);

        queue.enqueue(key("a"));
        assert!(queue.is_empty());
    }
}
