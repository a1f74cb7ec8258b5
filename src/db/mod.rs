//! Database layer for vidqueue
//!
//! SQLite persistence for task history, the store behind duplicate detection.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`history`] - History records and duplicate lookups

use crate::error::DatabaseError;
use crate::types::{TaskId, TaskState};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod history;
mod migrations;

/// History record as stored in SQLite
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    /// Task ID (UUID text)
    pub task_id: String,
    /// Target URL
    pub target: String,
    /// Title from the listing collaborator
    pub title: Option<String>,
    /// Terminal state name
    pub state: String,
    /// Priority at completion
    pub priority: i64,
    /// Retries performed
    pub attempt: i64,
    /// Failure reason
    pub last_error: Option<String>,
    /// File written by the fetcher
    pub output_path: Option<String>,
    /// Unix timestamp when the task was submitted
    pub created_at: i64,
    /// Unix timestamp when the task first ran
    pub started_at: Option<i64>,
    /// Unix timestamp of the terminal transition
    pub finished_at: i64,
}

/// One terminal task as read back from history
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Task ID
    pub task_id: TaskId,
    /// Target URL
    pub target: String,
    /// Title from the listing collaborator
    pub title: Option<String>,
    /// Terminal state
    pub state: TaskState,
    /// Priority at completion
    pub priority: i32,
    /// Retries performed
    pub attempt: u32,
    /// Failure reason
    pub last_error: Option<String>,
    /// File written by the fetcher
    pub output_path: Option<PathBuf>,
    /// When the task was submitted
    pub created_at: DateTime<Utc>,
    /// When the task first ran
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached its terminal state
    pub finished_at: DateTime<Utc>,
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        let task_id = row.task_id.parse::<TaskId>().map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "corrupt task id {:?} in history: {}",
                row.task_id, e
            )))
        })?;
        let state = TaskState::parse(&row.state).ok_or_else(|| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "unknown task state {:?} in history",
                row.state
            )))
        })?;

        Ok(HistoryEntry {
            task_id,
            target: row.target,
            title: row.title,
            state,
            priority: row.priority as i32,
            attempt: row.attempt.max(0) as u32,
            last_error: row.last_error,
            output_path: row.output_path.map(PathBuf::from),
            created_at: timestamp(row.created_at),
            started_at: row.started_at.map(timestamp),
            finished_at: timestamp(row.finished_at),
        })
    }
}

/// Database handle for vidqueue
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}
