//! Claiming, running and settling one fetch attempt.

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::DownloadEngine;
use super::state::SchedulerState;
use crate::error::FetchError;
use crate::fetch::{FetchOutput, FetchRequest, ProgressSink};
use crate::retry::{backoff_delay, should_retry};
use crate::task::StopRequest;
use crate::types::{Event, TaskId, TaskOptions, TaskSnapshot, TaskState};

/// A task a worker has taken Running ownership of
#[derive(Debug)]
pub(crate) struct Claim {
    pub(crate) id: TaskId,
    pub(crate) target: String,
    pub(crate) options: Arc<TaskOptions>,
    pub(crate) attempt: u32,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
}

/// What has to happen after the lock is released
#[derive(Debug)]
enum Settled {
    /// Report to history, then retire
    Terminal(TaskSnapshot),
    /// Arm the retry timer
    Retry {
        id: TaskId,
        delay: Duration,
        token: CancellationToken,
    },
    /// Back in the queue (resume arrived during a pause)
    Requeued,
    Paused,
    /// Attempt no longer current; nothing to do
    Stale,
}

impl DownloadEngine {
    /// Pop the highest-priority pending task and move it to Running
    ///
    /// Pop and transition happen under one write lock, so a task can never be
    /// claimed twice or run after a cancel removed it from the queue.
    pub(crate) fn claim_next(&self) -> Option<Claim> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if self.pool.shutdown.is_cancelled() {
            return None;
        }

        while let Some(queued) = state.queue.pop_highest() {
            let Some(task) = state.tasks.get_mut(&queued.id) else {
                tracing::debug!(task_id = %queued.id, "Dropping queue entry for unknown task");
                continue;
            };
            if task.state != TaskState::Pending {
                tracing::debug!(task_id = %queued.id, state = %task.state, "Dropping stale queue entry");
                continue;
            }

            let cancel = self.pool.shutdown.child_token();
            match task.claim(cancel.clone()) {
                Ok(generation) => {
                    self.emit_event(Event::Started {
                        id: task.id,
                        attempt: task.attempt,
                    });
                    return Some(Claim {
                        id: task.id,
                        target: task.target.clone(),
                        options: Arc::clone(&task.options),
                        attempt: task.attempt,
                        generation,
                        cancel,
                    });
                }
                Err(e) => {
                    tracing::warn!(task_id = %queued.id, error = %e, "Could not claim task");
                }
            }
        }

        None
    }

    /// Run one claimed attempt to settlement
    ///
    /// A panicking fetch collaborator is contained here and settles as a
    /// permanent failure; the worker carries on.
    pub(crate) async fn execute(&self, worker: usize, claim: Claim) {
        let Claim {
            id,
            target,
            options,
            attempt,
            generation,
            cancel,
        } = claim;

        tracing::info!(task_id = %id, worker, attempt, url = %target, "Task started");

        let request = FetchRequest {
            task_id: id,
            target,
            options,
            attempt,
            cancel,
        };
        let progress = self.progress_sink(id, generation);
        let fetcher = Arc::clone(&self.collaborators.fetcher);

        let result = match std::panic::AssertUnwindSafe(fetcher.fetch(request, progress))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(task_id = %id, worker, panic = %message, "Fetch collaborator panicked");
                Err(FetchError::Permanent(format!(
                    "fetch collaborator panicked: {message}"
                )))
            }
        };

        self.settle(id, generation, result).await;
    }

    /// Progress callback bound to one attempt
    fn progress_sink(&self, id: TaskId, generation: u64) -> ProgressSink {
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();

        ProgressSink::new(move |update| {
            let mut state = state.write();
            let Some(task) = state.tasks.get_mut(&id) else {
                return;
            };
            if let Some(progress) = task.record_progress(generation, update) {
                event_tx
                    .send(Event::Progress {
                        id,
                        progress,
                        rate_bps: task.rate_bps,
                        eta_secs: task.eta_secs,
                    })
                    .ok();
            }
        })
    }

    async fn settle(&self, id: TaskId, generation: u64, result: Result<FetchOutput, FetchError>) {
        let settled = {
            let mut guard = self.state.write();
            self.apply_result(&mut guard, id, generation, result)
        };

        match settled {
            Settled::Terminal(snapshot) => self.finalize(snapshot).await,
            Settled::Retry { id, delay, token } => self.schedule_retry(id, delay, token),
            Settled::Requeued => self.notify_workers(),
            Settled::Paused | Settled::Stale => {}
        }
    }

    /// Decide the attempt's outcome under the lock
    ///
    /// Precedence: success, then a caller's stop request, then an unrequested
    /// cancellation (shutdown) which pauses, then the retry policy.
    fn apply_result(
        &self,
        state: &mut SchedulerState,
        id: TaskId,
        generation: u64,
        result: Result<FetchOutput, FetchError>,
    ) -> Settled {
        let Some(task) = state.tasks.get_mut(&id) else {
            return Settled::Stale;
        };
        if task.state != TaskState::Running || task.generation != generation {
            return Settled::Stale;
        }

        let stop = task.stop_request;
        let resume_requested = task.resume_requested;
        let signalled = task
            .cancel_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        task.end_attempt();

        let error = match result {
            Ok(output) => {
                let output_path = output.output_path;
                if let Err(e) = task.succeed(output_path.clone()) {
                    tracing::error!(task_id = %id, error = %e, "Invalid transition on success");
                    return Settled::Stale;
                }
                tracing::info!(task_id = %id, attempt = task.attempt, "Task succeeded");
                self.emit_event(Event::Succeeded { id, output_path });
                return Settled::Terminal(task.snapshot());
            }
            Err(error) => error,
        };

        match stop {
            Some(StopRequest::Cancel) => {
                if task.cancel().is_ok() {
                    tracing::info!(task_id = %id, "Task cancelled");
                    self.emit_event(Event::Cancelled { id });
                    return Settled::Terminal(task.snapshot());
                }
                Settled::Stale
            }
            Some(StopRequest::Pause) => {
                if task.pause().is_err() {
                    return Settled::Stale;
                }
                tracing::info!(task_id = %id, "Task paused");
                self.emit_event(Event::Paused { id });

                if resume_requested && !self.pool.shutdown.is_cancelled() && task.resume().is_ok() {
                    self.emit_event(Event::Resumed { id });
                    state.enqueue(id);
                    return Settled::Requeued;
                }
                Settled::Paused
            }
            None if signalled || error == FetchError::Cancelled => {
                // Cancelled without a caller request: engine shutdown
                if task.pause().is_err() {
                    return Settled::Stale;
                }
                tracing::info!(task_id = %id, "Task paused by shutdown");
                self.emit_event(Event::Paused { id });
                Settled::Paused
            }
            None => {
                let attempt = task.attempt;
                let message = error.to_string();

                if should_retry(&self.config.retry, &error, attempt) {
                    let delay = backoff_delay(&self.config.retry, attempt);
                    let now = chrono::Utc::now();
                    let retry_at = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|d| now.checked_add_signed(d))
                        .unwrap_or(now);
                    if task.fail(message.clone(), Some(retry_at)).is_err() {
                        return Settled::Stale;
                    }
                    let token = self.pool.shutdown.child_token();
                    task.retry_token = Some(token.clone());

                    tracing::warn!(
                        task_id = %id,
                        attempt,
                        max_retries = self.config.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Attempt failed, retry scheduled"
                    );
                    self.emit_event(Event::Failed {
                        id,
                        attempt,
                        error: message,
                        retry_in_ms: Some(delay.as_millis() as u64),
                    });
                    Settled::Retry { id, delay, token }
                } else {
                    if task.fail(message.clone(), None).is_err() {
                        return Settled::Stale;
                    }
                    tracing::error!(task_id = %id, attempt, error = %message, "Task failed");
                    self.emit_event(Event::Failed {
                        id,
                        attempt,
                        error: message,
                        retry_in_ms: None,
                    });
                    Settled::Terminal(task.snapshot())
                }
            }
        }
    }

    /// Report a terminal task to history, then retire it from the active registry
    ///
    /// History failures are logged and do not keep the task active.
    pub(crate) async fn finalize(&self, snapshot: TaskSnapshot) {
        if let Err(e) = self.collaborators.history.record_result(&snapshot).await {
            tracing::warn!(
                task_id = %snapshot.id,
                history = self.collaborators.history.name(),
                error = %e,
                "Failed to record task history"
            );
        }
        self.state.write().retire(snapshot.id);
    }

    /// Re-enqueue after `delay` unless the token fires first
    ///
    /// Runs on its own task so the worker that saw the failure is free immediately.
    fn schedule_retry(&self, id: TaskId, delay: Duration, token: CancellationToken) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(task_id = %id, "Retry timer cancelled");
                }
                _ = tokio::time::sleep(delay) => engine.requeue_for_retry(id),
            }
        });
    }

    /// Failed -> Pending with `attempt + 1`, back in the queue at its original priority
    pub(crate) fn requeue_for_retry(&self, id: TaskId) {
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let Some(task) = state.tasks.get_mut(&id) else {
                return;
            };
            if let Err(e) = task.requeue_after_retry() {
                tracing::debug!(task_id = %id, error = %e, "Retry no longer applicable");
                return;
            }
            let attempt = task.attempt;
            tracing::debug!(task_id = %id, attempt, "Task re-queued for retry");
            self.emit_event(Event::Retrying { id, attempt });
            state.enqueue(id);
        }
        self.notify_workers();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
