//! Priority queue of pending tasks.

use std::collections::BinaryHeap;

use crate::types::{Priority, TaskId};

/// Entry in the priority queue
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct QueuedTask {
    pub(crate) id: TaskId,
    pub(crate) priority: Priority,
    /// Submission order for tie-breaking
    pub(crate) seq: u64,
}

// Max-heap: highest priority first, then lowest sequence (FIFO)
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.priority.cmp(&other.priority) {
            // Reversed so the earlier submission ranks higher
            std::cmp::Ordering::Equal => other.seq.cmp(&self.seq),
            ordering => ordering,
        }
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending tasks ordered for dispatch
///
/// Only ever touched under the engine's state lock.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl TaskQueue {
    pub(crate) fn push(&mut self, entry: QueuedTask) {
        self.heap.push(entry);
    }

    /// Push a whole batch
    pub(crate) fn extend(&mut self, entries: impl IntoIterator<Item = QueuedTask>) {
        self.heap.extend(entries);
    }

    pub(crate) fn pop_highest(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    /// Remove a task from the queue without dispatching it
    ///
    /// Returns true if the task was queued.
    pub(crate) fn remove(&mut self, id: TaskId) -> bool {
        let original_len = self.heap.len();

        let items: Vec<_> = self.heap.drain().filter(|item| item.id != id).collect();
        let was_removed = items.len() < original_len;

        self.heap = items.into_iter().collect();
        was_removed
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
