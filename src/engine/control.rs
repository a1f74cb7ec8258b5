//! Task control (pause/resume/cancel/priority) and status queries.

use crate::error::{Error, Result, TaskError};
use crate::task::StopRequest;
use crate::types::{Event, Priority, QueueStats, TaskId, TaskSnapshot, TaskState};

use super::DownloadEngine;

impl DownloadEngine {
    /// Pause a task
    ///
    /// A pending task leaves the queue immediately. A running task is signalled
    /// and settles as Paused once its fetch returns. Pausing a paused task is a no-op.
    ///
    /// # Errors
    ///
    /// `TaskError::NotFound` for unknown ids; `TaskError::InvalidState` for tasks
    /// that are terminal or waiting on a retry timer.
    pub async fn pause(&self, id: TaskId) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or(Error::Task(TaskError::NotFound { id }))?;

        match task.state {
            TaskState::Paused => Ok(()),
            TaskState::Pending => {
                task.pause()?;
                state.queue.remove(id);
                tracing::info!(task_id = %id, "Task paused");
                self.emit_event(Event::Paused { id });
                Ok(())
            }
            TaskState::Running => {
                // A pending cancel wins over a later pause
                if task.stop_request != Some(StopRequest::Cancel) {
                    task.stop_request = Some(StopRequest::Pause);
                    task.resume_requested = false;
                    if let Some(token) = &task.cancel_token {
                        token.cancel();
                    }
                    tracing::debug!(task_id = %id, "Pause signalled to running task");
                }
                Ok(())
            }
            _ => Err(task.invalid("pause").into()),
        }
    }

    /// Resume a paused task
    ///
    /// The task re-enters the queue at its current priority with its attempt count
    /// unchanged. Resuming a pending or running task is a no-op; resuming a task whose
    /// pause is still settling re-queues it as soon as it settles.
    pub async fn resume(&self, id: TaskId) -> Result<()> {
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let task = state
                .tasks
                .get_mut(&id)
                .ok_or(Error::Task(TaskError::NotFound { id }))?;

            match task.state {
                TaskState::Pending => return Ok(()),
                TaskState::Running => {
                    if task.stop_request == Some(StopRequest::Pause) {
                        task.resume_requested = true;
                    }
                    return Ok(());
                }
                TaskState::Paused => {
                    task.resume()?;
                    tracing::info!(task_id = %id, "Task resumed");
                    self.emit_event(Event::Resumed { id });
                    state.enqueue(id);
                }
                _ => return Err(task.invalid("resume").into()),
            }
        }

        self.notify_workers();
        Ok(())
    }

    /// Cancel a task
    ///
    /// Pending, paused and retry-waiting tasks are cancelled atomically and never run
    /// again. A running task is signalled and settles as Cancelled when its fetch
    /// returns. Cancelling a cancelled task is a no-op.
    ///
    /// # Errors
    ///
    /// `TaskError::InvalidState` for tasks that already succeeded or failed terminally.
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let finished = {
            let mut guard = self.state.write();
            let state = &mut *guard;

            let Some(task) = state.tasks.get_mut(&id) else {
                return match state.finished.get(id) {
                    Some(snapshot) if snapshot.state == TaskState::Cancelled => Ok(()),
                    Some(snapshot) => Err(TaskError::InvalidState {
                        id,
                        operation: "cancel".to_string(),
                        current_state: snapshot.state,
                    }
                    .into()),
                    None => Err(TaskError::NotFound { id }.into()),
                };
            };

            match task.state {
                TaskState::Cancelled => return Ok(()),
                TaskState::Running => {
                    task.stop_request = Some(StopRequest::Cancel);
                    if let Some(token) = &task.cancel_token {
                        token.cancel();
                    }
                    tracing::debug!(task_id = %id, "Cancel signalled to running task");
                    None
                }
                TaskState::Pending | TaskState::Paused | TaskState::Failed => {
                    let was_pending = task.state == TaskState::Pending;
                    task.cancel()?;
                    if let Some(token) = task.retry_token.take() {
                        token.cancel();
                    }
                    let snapshot = task.snapshot();
                    if was_pending {
                        state.queue.remove(id);
                    }
                    tracing::info!(task_id = %id, "Task cancelled");
                    self.emit_event(Event::Cancelled { id });
                    Some(snapshot)
                }
                TaskState::Succeeded => return Err(task.invalid("cancel").into()),
            }
        };

        if let Some(snapshot) = finished {
            self.finalize(snapshot).await;
        }
        Ok(())
    }

    /// Change a task's priority
    ///
    /// A pending task is re-queued at the new priority (keeping its place among
    /// equal priorities). Paused and retry-waiting tasks keep the new priority for
    /// when they return to the queue; a running task is not preempted.
    pub async fn set_priority(&self, id: TaskId, priority: i32) -> Result<()> {
        let priority = Priority::new(priority)?;

        let mut guard = self.state.write();
        let state = &mut *guard;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or(Error::Task(TaskError::NotFound { id }))?;

        if task.is_terminal() {
            return Err(task.invalid("set_priority").into());
        }
        if task.priority == priority {
            return Ok(());
        }

        task.priority = priority;
        let requeue = task.state == TaskState::Pending;
        self.emit_event(Event::PriorityChanged { id, priority });

        if requeue && state.queue.remove(id) {
            state.enqueue(id);
        }
        Ok(())
    }

    /// Pause every pending and running task
    ///
    /// Individual failures are logged and do not stop the sweep.
    pub async fn pause_all(&self) -> Result<()> {
        let ids = self.ids_in(&[TaskState::Pending, TaskState::Running]);

        for id in ids {
            if let Err(e) = self.pause(id).await {
                tracing::warn!(task_id = %id, error = %e, "Failed to pause task");
            }
        }

        self.emit_event(Event::QueuePaused);
        Ok(())
    }

    /// Resume every paused task
    pub async fn resume_all(&self) -> Result<()> {
        let ids = self.ids_in(&[TaskState::Paused]);

        for id in ids {
            if let Err(e) = self.resume(id).await {
                tracing::warn!(task_id = %id, error = %e, "Failed to resume task");
            }
        }

        self.emit_event(Event::QueueResumed);
        Ok(())
    }

    /// Current status of a task
    ///
    /// Answers for active tasks and for terminal tasks still within the
    /// finished-retention window.
    pub fn get_status(&self, id: TaskId) -> Result<TaskSnapshot> {
        self.state
            .read()
            .snapshot(id)
            .ok_or(Error::Task(TaskError::NotFound { id }))
    }

    /// Snapshots of all non-terminal tasks in submission order
    pub fn list_active(&self) -> Vec<TaskSnapshot> {
        let state = self.state.read();
        let mut active: Vec<_> = state
            .tasks
            .values()
            .filter(|task| !task.is_terminal())
            .map(|task| (task.seq, task.snapshot()))
            .collect();
        active.sort_by_key(|(seq, _)| *seq);
        active.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Counts per state
    pub fn queue_stats(&self) -> QueueStats {
        self.state
            .read()
            .stats(self.config.scheduler.max_workers)
    }

    fn ids_in(&self, states: &[TaskState]) -> Vec<TaskId> {
        let state = self.state.read();
        let mut ids: Vec<_> = state
            .tasks
            .values()
            .filter(|task| states.contains(&task.state))
            .map(|task| (task.seq, task.id))
            .collect();
        ids.sort_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, id)| id).collect()
    }
}
