//! Task record held in the engine's registry
//!
//! Every state change goes through a method here so the transition table in
//! [`TaskState::can_transition_to`] is the single authority on legal moves.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::fetch::ProgressUpdate;
use crate::types::{Priority, TaskId, TaskOptions, TaskSnapshot, TaskState};

/// What a caller asked a running task to do when its fetch returns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StopRequest {
    Pause,
    Cancel,
}

#[derive(Debug)]
pub(crate) struct Task {
    pub id: TaskId,
    pub target: String,
    pub title: Option<String>,
    pub priority: Priority,
    pub options: Arc<TaskOptions>,
    pub state: TaskState,
    pub progress: f64,
    pub rate_bps: Option<u64>,
    pub eta_secs: Option<u64>,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub output_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Queue order among equal priorities
    pub seq: u64,
    /// Bumped on every claim; progress from an older attempt is ignored
    pub generation: u64,
    /// Signal for the attempt in flight
    pub cancel_token: Option<CancellationToken>,
    /// Signal for the pending retry timer
    pub retry_token: Option<CancellationToken>,
    pub stop_request: Option<StopRequest>,
    /// Resume arrived while a pause was still settling
    pub resume_requested: bool,
}

impl Task {
    pub fn new(
        id: TaskId,
        target: String,
        title: Option<String>,
        priority: Priority,
        options: Arc<TaskOptions>,
        seq: u64,
    ) -> Self {
        Self {
            id,
            target,
            title,
            priority,
            options,
            state: TaskState::Pending,
            progress: 0.0,
            rate_bps: None,
            eta_secs: None,
            attempt: 0,
            last_error: None,
            output_path: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            next_retry_at: None,
            seq,
            generation: 0,
            cancel_token: None,
            retry_token: None,
            stop_request: None,
            resume_requested: false,
        }
    }

    fn transition(&mut self, next: TaskState, operation: &str) -> Result<(), TaskError> {
        if !self.state.can_transition_to(next) {
            return Err(self.invalid(operation));
        }
        self.state = next;
        Ok(())
    }

    pub fn invalid(&self, operation: &str) -> TaskError {
        TaskError::InvalidState {
            id: self.id,
            operation: operation.to_string(),
            current_state: self.state,
        }
    }

    /// Failed with a retry timer armed
    pub fn is_retry_waiting(&self) -> bool {
        self.state == TaskState::Failed && self.next_retry_at.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        match self.state {
            TaskState::Succeeded | TaskState::Cancelled => true,
            TaskState::Failed => self.next_retry_at.is_none(),
            _ => false,
        }
    }

    /// Pending -> Running for a worker; returns the new attempt generation
    pub fn claim(&mut self, token: CancellationToken) -> Result<u64, TaskError> {
        self.transition(TaskState::Running, "start")?;
        self.progress = 0.0;
        self.rate_bps = None;
        self.eta_secs = None;
        self.last_error = None;
        self.next_retry_at = None;
        self.started_at.get_or_insert_with(Utc::now);
        self.generation += 1;
        self.cancel_token = Some(token);
        self.stop_request = None;
        self.resume_requested = false;
        Ok(self.generation)
    }

    /// Apply a progress report; `None` when the report is stale or ignored
    ///
    /// Progress never moves backwards within one attempt.
    pub fn record_progress(&mut self, generation: u64, update: ProgressUpdate) -> Option<f64> {
        if self.state != TaskState::Running || self.generation != generation {
            return None;
        }
        if update.fraction.is_nan() {
            return None;
        }
        self.progress = self.progress.max(update.fraction.clamp(0.0, 1.0));
        if update.rate_bps.is_some() {
            self.rate_bps = update.rate_bps;
        }
        if update.eta_secs.is_some() {
            self.eta_secs = update.eta_secs;
        }
        Some(self.progress)
    }

    /// Detach the attempt's signal once the fetch has returned
    pub fn end_attempt(&mut self) {
        self.cancel_token = None;
        self.stop_request = None;
        self.rate_bps = None;
        self.eta_secs = None;
    }

    pub fn succeed(&mut self, output_path: Option<PathBuf>) -> Result<(), TaskError> {
        self.transition(TaskState::Succeeded, "succeed")?;
        self.progress = 1.0;
        self.output_path = output_path;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed; a `retry_at` keeps the task alive for its retry timer
    pub fn fail(
        &mut self,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError> {
        self.transition(TaskState::Failed, "fail")?;
        self.last_error = Some(error);
        self.next_retry_at = retry_at;
        if retry_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), TaskError> {
        self.transition(TaskState::Paused, "pause")?;
        self.rate_bps = None;
        self.eta_secs = None;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), TaskError> {
        if self.state != TaskState::Paused {
            return Err(self.invalid("resume"));
        }
        self.transition(TaskState::Pending, "resume")
    }

    pub fn cancel(&mut self) -> Result<(), TaskError> {
        if self.state == TaskState::Failed && !self.is_retry_waiting() {
            return Err(self.invalid("cancel"));
        }
        self.transition(TaskState::Cancelled, "cancel")?;
        self.next_retry_at = None;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Failed -> Pending when the retry timer fires
    pub fn requeue_after_retry(&mut self) -> Result<(), TaskError> {
        if !self.is_retry_waiting() {
            return Err(self.invalid("retry"));
        }
        self.transition(TaskState::Pending, "retry")?;
        self.attempt += 1;
        self.next_retry_at = None;
        self.retry_token = None;
        Ok(())
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            target: self.target.clone(),
            title: self.title.clone(),
            priority: self.priority,
            options: (*self.options).clone(),
            state: self.state,
            progress: self.progress,
            rate_bps: self.rate_bps,
            eta_secs: self.eta_secs,
            attempt: self.attempt,
            last_error: self.last_error.clone(),
            output_path: self.output_path.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            next_retry_at: self.next_retry_at,
        }
    }
}
