//! The pending-task priority queue.
//!
//! Highest priority first; within a priority tier, submission order (FIFO).
//! A monotonic sequence number breaks ties, so retried tasks re-enter the
//! queue behind earlier submissions of the same priority.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedTask {
    priority: i32,
    seq: u64,
    task_id: String,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the lower (earlier) sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task_id: &str, priority: i32) {
        self.heap.push(QueuedTask {
            priority,
            seq: self.next_seq,
            task_id: task_id.to_string(),
        });
        self.next_seq += 1;
    }

    /// Pop the highest-priority task id, earliest-submitted within a tier.
    pub fn pop(&mut self) -> Option<String> {
        self.heap.pop().map(|t| t.task_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop a task id from the queue without popping the rest.
    pub fn remove(&mut self, task_id: &str) {
        self.heap.retain(|t| t.task_id != task_id);
    }
}
