//! Registry of tasks guarded by the engine's coordinating lock.

use std::collections::{HashMap, VecDeque};

use super::queue::{QueuedTask, TaskQueue};
use crate::task::Task;
use crate::types::{QueueStats, TaskId, TaskSnapshot, TaskState};

/// Everything the scheduler mutates, behind one `RwLock`
#[derive(Debug, Default)]
pub(crate) struct SchedulerState {
    pub(crate) queue: TaskQueue,
    /// Active registry: every task not yet retired
    pub(crate) tasks: HashMap<TaskId, Task>,
    /// In-flight target -> task, for coalescing resubmissions
    pub(crate) targets: HashMap<String, TaskId>,
    pub(crate) finished: FinishedTasks,
    pub(crate) next_seq: u64,
}

impl SchedulerState {
    pub(crate) fn new(finished_retention: usize) -> Self {
        Self {
            finished: FinishedTasks::new(finished_retention),
            ..Default::default()
        }
    }

    /// Task still working on `target`, if any
    pub(crate) fn in_flight(&self, target: &str) -> Option<TaskId> {
        let id = self.targets.get(target)?;
        self.tasks
            .get(id)
            .filter(|task| !task.is_terminal())
            .map(|task| task.id)
    }

    /// Put a pending task (back) into the queue
    pub(crate) fn enqueue(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.get(&id) {
            self.queue.push(QueuedTask {
                id,
                priority: task.priority,
                seq: task.seq,
            });
        }
    }

    /// Move a terminal task out of the active registry
    pub(crate) fn retire(&mut self, id: TaskId) {
        let Some(task) = self.tasks.remove(&id) else {
            return;
        };
        if self.targets.get(&task.target) == Some(&id) {
            self.targets.remove(&task.target);
        }
        self.finished.insert(task.snapshot());
    }

    pub(crate) fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.tasks
            .get(&id)
            .map(Task::snapshot)
            .or_else(|| self.finished.get(id).cloned())
    }

    pub(crate) fn stats(&self, workers: usize) -> QueueStats {
        let mut stats = QueueStats {
            pending: self.queue.len(),
            finished: self.finished.len(),
            workers,
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.state {
                TaskState::Running => stats.running += 1,
                TaskState::Paused => stats.paused += 1,
                TaskState::Failed if task.is_retry_waiting() => stats.retry_scheduled += 1,
                _ => {}
            }
        }
        stats
    }
}

/// Terminal snapshots kept for status queries, oldest evicted first
#[derive(Debug, Default)]
pub(crate) struct FinishedTasks {
    capacity: usize,
    order: VecDeque<TaskId>,
    entries: HashMap<TaskId, TaskSnapshot>,
}

impl FinishedTasks {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, snapshot: TaskSnapshot) {
        if self.capacity == 0 {
            return;
        }
        let id = snapshot.id;
        if self.entries.insert(id, snapshot).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<&TaskSnapshot> {
        self.entries.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
