//! FIFO queue of agents waiting for a worker.

use evo_core::AgentId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Unbounded FIFO of agent ids shared by all workers.
///
/// `pop` parks the caller until an item arrives or the queue is closed.
#[derive(Debug, Default)]
pub struct ExperimentQueue {
    items: Mutex<VecDeque<AgentId>>,
    notify: Notify,
    closed: AtomicBool,
}

impl ExperimentQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: AgentId) {
        self.items.lock().push_back(id);
        self.notify.notify_one();
    }

    /// Next agent in submission order, or `None` once closed and drained
    /// of waiters.
    pub async fn pop(&self) -> Option<AgentId> {
        loop {
            // Registered before the checks so a push or close in between is
            // not missed.
            let notified = self.notify.notified();
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(id) = self.items.lock().pop_front() {
                return Some(id);
            }
            notified.await;
        }
    }

    /// Drop a waiting entry; true if it was present.
    pub fn remove(&self, id: AgentId) -> bool {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|queued| *queued != id);
        before != items.len()
    }

    /// Stop handing out items and wake every parked `pop`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Waiting ids, front first
    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentId> {
        self.items.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order() {
        let queue = ExperimentQueue::new();
        let ids: Vec<AgentId> = (0..3).map(|_| AgentId::new()).collect();
        for id in &ids {
            queue.push(*id);
        }
        assert_eq!(queue.snapshot(), ids);
        for id in &ids {
            assert_eq!(queue.pop().await, Some(*id));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_parks_until_push() {
        let queue = Arc::new(ExperimentQueue::new());
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!popper.is_finished());
        let id = AgentId::new();
        queue.push(id);
        assert_eq!(popper.await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn close_releases_parked_workers() {
        let queue = Arc::new(ExperimentQueue::new());
        let poppers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.pop().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        for popper in poppers {
            assert_eq!(popper.await.unwrap(), None);
        }
    }

    #[test]
    fn remove_only_touches_the_given_id() {
        let queue = ExperimentQueue::new();
        let (a, b) = (AgentId::new(), AgentId::new());
        queue.push(a);
        queue.push(b);
        assert!(queue.remove(a));
        assert!(!queue.remove(a));
        assert_eq!(queue.snapshot(), vec![b]);
    }
}
