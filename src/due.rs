//! Time-ordered due-queue.
//!
//! Min-heap keyed by the next eligible time. Scheduled retries wait here
//! instead of inside a sleeping future, so backoff never blocks a dispatch
//! loop and remains cancellable: removal is lazy, a popped key whose entry
//! was canceled is simply discarded by the caller.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

/// Min-heap of keys ordered by their scheduled time
#[derive(Debug)]
pub struct DueQueue<K> {
    heap: BinaryHeap<Reverse<DueSlot<K>>>,
}

#[derive(Debug, PartialEq, Eq)]
struct DueSlot<K> {
    due_at: DateTime<Utc>,
    key: K,
}

impl<K: Ord> Ord for DueSlot<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due_at
            .cmp(&other.due_at)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl<K: Ord> PartialOrd for DueSlot<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> DueQueue<K> {
    /// Create an empty due-queue
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Schedule a key to become due at the given time
    pub fn push(&mut self, key: K, due_at: DateTime<Utc>) {
        self.heap.push(Reverse(DueSlot { due_at, key }));
    }

    /// Pop the next key whose scheduled time has arrived
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<K> {
        match self.heap.peek() {
            Some(Reverse(slot)) if slot.due_at <= now => {
                self.heap.pop().map(|Reverse(slot)| slot.key)
            }
            _ => None,
        }
    }

    /// Drain every key whose scheduled time has arrived
    pub fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<K> {
        let mut due = Vec::new();
        while let Some(key) = self.pop_due(now) {
            due.push(key);
        }
        due
    }

    /// Number of scheduled keys (including stale entries awaiting lazy
    /// removal)
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<K: Ord> Default for DueQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn pops_in_time_order() {
        let now = Utc::now();
        let mut queue = DueQueue::new();
        queue.push("later", now + Duration::seconds(10));
        queue.push("sooner", now + Duration::seconds(5));
        queue.push("past", now - Duration::seconds(1));

        assert_eq!(queue.pop_due(now), Some("past"));
        assert_eq!(queue.pop_due(now), None);

        let future = now + Duration::seconds(30);
        assert_eq!(queue.pop_due(future), Some("sooner"));
        assert_eq!(queue.pop_due(future), Some("later"));
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_due_returns_all_eligible() {
        let now = Utc::now();
        let mut queue = DueQueue::new();
        queue.push("a", now - Duration::seconds(3));
        queue.push("b", now - Duration::seconds(2));
        queue.push("c", now + Duration::seconds(60));

        let due = queue.drain_due(now);
        assert_eq!(due, vec!["a", "b"]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn nothing_due_on_empty_queue() {
        let mut queue: DueQueue<&str> = DueQueue::new();
        assert_eq!(queue.pop_due(Utc::now()), None);
    }
}
