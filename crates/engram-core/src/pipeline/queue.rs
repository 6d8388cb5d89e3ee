//! Bounded multi-priority queue.
//!
//! Strict priority dequeue, FIFO within a class, `queue_full` at exactly
//! the configured capacity. Producers never block; the single dispatcher
//! awaits on the notify handle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::{EngramError, Result};
use crate::memory::Priority;

struct Lanes<T> {
    queues: [VecDeque<T>; Priority::COUNT],
    len: usize,
}

impl<T> Lanes<T> {
    fn new() -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new(), VecDeque::new()],
            len: 0,
        }
    }

    fn pop_highest(&mut self) -> Option<T> {
        for queue in &mut self.queues {
            if let Some(item) = queue.pop_front() {
                self.len -= 1;
                return Some(item);
            }
        }
        None
    }
}

pub struct PriorityQueue<T> {
    lanes: Mutex<Lanes<T>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue; `queue_full` at capacity.
    pub fn try_push(&self, priority: Priority, item: T) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngramError::Internal("queue closed".to_string()));
        }
        {
            let mut lanes = self.lanes.lock().expect("priority queue poisoned");
            if lanes.len >= self.capacity {
                return Err(EngramError::QueueFull("pipeline"));
            }
            lanes.queues[priority.lane()].push_back(item);
            lanes.len += 1;
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeue the highest-priority item, FIFO within a class. Returns
    /// `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before the check so a push between the
            // check and the await still wakes us.
            notified.as_mut().enable();

            if let Some(item) = self.lanes.lock().expect("priority queue poisoned").pop_highest() {
                return Some(item);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue; pending items remain poppable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().expect("priority queue poisoned").len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_exact() {
        let queue = PriorityQueue::new(3);
        for i in 0..3 {
            queue.try_push(Priority::Low, i).unwrap();
        }
        let err = queue.try_push(Priority::Critical, 99).unwrap_err();
        assert_eq!(err.kind(), "queue_full");
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn strict_priority_then_fifo() {
        let queue = PriorityQueue::new(16);
        queue.try_push(Priority::Low, "low-1").unwrap();
        queue.try_push(Priority::Medium, "med-1").unwrap();
        queue.try_push(Priority::Low, "low-2").unwrap();
        queue.try_push(Priority::Critical, "crit").unwrap();
        queue.try_push(Priority::Medium, "med-2").unwrap();

        let mut order = Vec::new();
        for _ in 0..5 {
            order.push(queue.pop().await.unwrap());
        }
        assert_eq!(order, vec!["crit", "med-1", "med-2", "low-1", "low-2"]);
    }

    #[tokio::test]
    async fn critical_jumps_a_saturated_queue() {
        let queue = PriorityQueue::new(101);
        for i in 0..100 {
            queue.try_push(Priority::Low, format!("low-{i}")).unwrap();
        }
        queue.try_push(Priority::Critical, "critical".to_string()).unwrap();
        assert_eq!(queue.pop().await.unwrap(), "critical");
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = PriorityQueue::new(8);
        queue.try_push(Priority::Medium, 1).unwrap();
        queue.close();

        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
        assert!(queue.try_push(Priority::Medium, 2).is_err());
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = std::sync::Arc::new(PriorityQueue::new(4));
        let popper = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.try_push(Priority::High, 42).unwrap();
        assert_eq!(popper.await.unwrap(), Some(42));
    }
}
