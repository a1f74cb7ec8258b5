//! Core types for vidqueue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DownloadDefaults;
use crate::error::Error;

/// Unique identifier for a task
///
/// Generated once at submission and never reused, including across retries and resumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting in the priority queue
    Pending,
    /// Claimed by a worker and executing
    Running,
    /// Stopped by the caller; resumable
    Paused,
    /// Fetch completed successfully
    Succeeded,
    /// Fetch failed; terminal unless a retry is scheduled
    Failed,
    /// Stopped by the caller; never runs again
    Cancelled,
}

impl TaskState {
    /// Stable lowercase name, used for history rows and messages
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Paused => "paused",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Parse a name produced by [`TaskState::as_str`]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(TaskState::Pending),
            "running" => Some(TaskState::Running),
            "paused" => Some(TaskState::Paused),
            "succeeded" => Some(TaskState::Succeeded),
            "failed" => Some(TaskState::Failed),
            "cancelled" => Some(TaskState::Cancelled),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal edge of the state machine
    ///
    /// `Failed -> Pending` is the retry edge and `Failed -> Cancelled` stops a scheduled
    /// retry; both are only meaningful while a retry is pending, which the task record checks.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Paused)
                | (Running, Cancelled)
                | (Pending, Paused)
                | (Pending, Cancelled)
                | (Paused, Pending)
                | (Paused, Cancelled)
                | (Failed, Pending)
                | (Failed, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority (1 = lowest, 10 = highest, default 5)
///
/// Higher values are dequeued first. Construction validates the range, so every
/// `Priority` in the system is known to be in bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Priority(i32);

impl Priority {
    /// Lowest accepted priority
    pub const MIN: i32 = 1;
    /// Highest accepted priority
    pub const MAX: i32 = 10;
    /// Priority used when the caller does not choose one
    pub const DEFAULT: i32 = 5;

    /// Validate and wrap a raw priority
    pub fn new(value: i32) -> Result<Self, Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidPriority(value))
        }
    }

    /// Get the inner value
    pub fn get(&self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<i32> for Priority {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Format selection preset handed to the fetch tool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatSelector {
    /// Best video merged with best audio
    #[default]
    Best,
    /// Best video no taller than the given height, merged with best audio
    MaxHeight(u32),
    /// Best audio-only stream
    AudioOnly,
    /// Smallest available streams
    Worst,
    /// Raw format expression passed through untouched
    Custom(String),
}

impl FormatSelector {
    /// Format expression understood by yt-dlp's `-f` flag
    pub fn to_format_string(&self) -> String {
        match self {
            FormatSelector::Best => "bestvideo*+bestaudio/best".to_string(),
            FormatSelector::MaxHeight(height) => {
                format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
            }
            FormatSelector::AudioOnly => "bestaudio/best".to_string(),
            FormatSelector::Worst => "worstvideo+worstaudio/worst".to_string(),
            FormatSelector::Custom(expr) => expr.clone(),
        }
    }
}

/// Per-task download options
///
/// Captured at submission and frozen for the lifetime of the task. Fields left as
/// `None` are filled from [`DownloadDefaults`] when the task is created.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Directory the fetch tool writes into
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Format selection
    #[serde(default)]
    pub format: Option<FormatSelector>,

    /// yt-dlp output template (e.g. "%(title)s.%(ext)s")
    #[serde(default)]
    pub output_template: Option<String>,

    /// Container used when merging separate audio and video streams
    #[serde(default)]
    pub merge_output_format: Option<String>,

    /// Upper bound on a single fetch attempt
    #[serde(default, with = "crate::config::optional_duration_serde")]
    pub timeout: Option<Duration>,

    /// Proxy URL forwarded to the fetch tool
    #[serde(default)]
    pub proxy: Option<String>,

    /// Download rate limit in bytes per second
    #[serde(default)]
    pub rate_limit_bps: Option<u64>,
}

impl TaskOptions {
    /// Fill unset fields from the engine-wide defaults
    pub fn resolve(mut self, defaults: &DownloadDefaults) -> Self {
        if self.output_dir.is_none() {
            self.output_dir = Some(defaults.output_dir.clone());
        }
        if self.format.is_none() {
            self.format = Some(defaults.format.clone());
        }
        if self.merge_output_format.is_none() {
            self.merge_output_format = defaults.merge_output_format.clone();
        }
        if self.timeout.is_none() {
            self.timeout = defaults.timeout;
        }
        self
    }
}

/// Point-in-time copy of a task, returned by status queries and written to history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task ID
    pub id: TaskId,
    /// Target URL
    pub target: String,
    /// Title reported by the listing collaborator (playlist members only)
    pub title: Option<String>,
    /// Current priority
    pub priority: Priority,
    /// Options frozen at submission
    pub options: TaskOptions,
    /// Current state
    pub state: TaskState,
    /// Progress of the current attempt (0.0 to 1.0)
    pub progress: f64,
    /// Latest transfer rate hint in bytes per second
    pub rate_bps: Option<u64>,
    /// Latest remaining-time hint in seconds
    pub eta_secs: Option<u64>,
    /// Number of automatic retries performed so far
    pub attempt: u32,
    /// Human-readable reason of the most recent failure
    pub last_error: Option<String>,
    /// Output file reported by the fetch collaborator
    pub output_path: Option<PathBuf>,
    /// When the task was submitted
    pub created_at: DateTime<Utc>,
    /// When the task first entered Running
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// When the scheduled retry fires (Failed tasks awaiting retry only)
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Whether the task will never change state again
    pub fn is_terminal(&self) -> bool {
        match self.state {
            TaskState::Succeeded | TaskState::Cancelled => true,
            TaskState::Failed => self.next_retry_at.is_none(),
            _ => false,
        }
    }
}

/// A playlist/channel member that could not be turned into a task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationError {
    /// 1-based position in the container, when known
    pub index: Option<usize>,
    /// Member target, when known
    pub target: Option<String>,
    /// What went wrong
    pub message: String,
}

/// Aggregate result of a submission
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    /// Tasks created by this submission, in listing order
    pub created: Vec<TaskId>,
    /// Targets dropped because history already has them or they are in flight
    pub skipped: usize,
    /// Existing in-flight tasks a resubmitted target was merged into
    pub coalesced: Vec<TaskId>,
    /// Members that could not be enumerated
    pub enumeration_errors: Vec<EnumerationError>,
}

/// Queue statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks waiting in the priority queue
    pub pending: usize,
    /// Tasks currently held by a worker
    pub running: usize,
    /// Paused tasks
    pub paused: usize,
    /// Failed tasks waiting for their retry timer
    pub retry_scheduled: usize,
    /// Terminal tasks still answerable through status queries
    pub finished: usize,
    /// Configured number of workers
    pub workers: usize,
}

/// Event emitted during the task lifecycle
///
/// Events for a single task are delivered in transition order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task created and added to the queue
    Queued {
        /// Task ID
        id: TaskId,
        /// Target URL
        target: String,
        /// Priority the task was queued at
        priority: Priority,
    },

    /// A worker claimed the task
    Started {
        /// Task ID
        id: TaskId,
        /// Attempt number (0 for the first run)
        attempt: u32,
    },

    /// Progress report from the fetch collaborator
    Progress {
        /// Task ID
        id: TaskId,
        /// Progress of the current attempt (0.0 to 1.0)
        progress: f64,
        /// Transfer rate hint in bytes per second
        #[serde(skip_serializing_if = "Option::is_none")]
        rate_bps: Option<u64>,
        /// Remaining-time hint in seconds
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_secs: Option<u64>,
    },

    /// Task paused
    Paused {
        /// Task ID
        id: TaskId,
    },

    /// Paused task put back in the queue
    Resumed {
        /// Task ID
        id: TaskId,
    },

    /// Task finished successfully
    Succeeded {
        /// Task ID
        id: TaskId,
        /// Output file, when the collaborator reported one
        #[serde(skip_serializing_if = "Option::is_none")]
        output_path: Option<PathBuf>,
    },

    /// Attempt failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Attempt that failed
        attempt: u32,
        /// Error message
        error: String,
        /// Delay before the scheduled retry (None = terminal failure)
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_in_ms: Option<u64>,
    },

    /// Retry timer fired; task is pending again
    Retrying {
        /// Task ID
        id: TaskId,
        /// New attempt number
        attempt: u32,
    },

    /// Task cancelled
    Cancelled {
        /// Task ID
        id: TaskId,
    },

    /// Priority changed by the caller
    PriorityChanged {
        /// Task ID
        id: TaskId,
        /// New priority
        priority: Priority,
    },

    /// Submission dropped because history already has the target
    DuplicateSkipped {
        /// Target URL
        target: String,
    },

    /// A container member could not be enumerated
    EnumerationFailed {
        /// Container URL
        container: String,
        /// 1-based position in the container, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        /// Error message
        error: String,
    },

    /// Every pending and running task was paused
    QueuePaused,

    /// Every paused task was resumed
    QueueResumed,

    /// Engine is shutting down
    Shutdown,
}
