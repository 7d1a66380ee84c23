//! Four-bucket priority queue.
//!
//! One `VecDeque` per priority level. Enqueue is an O(1) append to the
//! matching bucket; dequeue scans Critical -> High -> Normal -> Low and pops
//! the head of the first non-empty bucket, so strict priority precedence and
//! FIFO-within-bucket both hold by construction.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{TaskId, TaskPriority};

/// Priority-ordered task queue
#[derive(Debug, Default)]
pub struct PriorityQueue {
    // Index 0 = Low .. 3 = Critical
    buckets: [VecDeque<TaskId>; 4],
}

impl PriorityQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task ID to the bucket matching its priority
    pub fn enqueue(&mut self, task_id: TaskId, priority: TaskPriority) {
        self.buckets[priority.bucket_index()].push_back(task_id);
    }

    /// Remove and return the highest-priority task, FIFO within a bucket
    pub fn dequeue_next(&mut self) -> Option<TaskId> {
        for priority in TaskPriority::dequeue_order() {
            if let Some(task_id) = self.buckets[priority.bucket_index()].pop_front() {
                return Some(task_id);
            }
        }
        None
    }

    /// Total number of queued tasks
    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }

    /// Queued task count per priority bucket
    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            low: self.buckets[TaskPriority::Low.bucket_index()].len(),
            normal: self.buckets[TaskPriority::Normal.bucket_index()].len(),
            high: self.buckets[TaskPriority::High.bucket_index()].len(),
            critical: self.buckets[TaskPriority::Critical.bucket_index()].len(),
        }
    }
}

/// Per-bucket queue depth snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    pub low: usize,
    pub normal: usize,
    pub high: usize,
    pub critical: usize,
}

impl QueueDepths {
    /// Total queued tasks across all buckets
    pub fn total(&self) -> usize {
        self.low + self.normal + self.high + self.critical
    }
}
