//! Error types for vidqueue
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] is returned by every public operation of the engine
//! - [`TaskError`] covers control operations on unknown tasks or illegal transitions
//! - [`FetchError`] is the contract between the engine and its fetch/listing collaborators
//! - [`DatabaseError`] wraps failures of the SQLite history store

use crate::types::{TaskId, TaskState};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for vidqueue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vidqueue
///
/// Configuration problems (invalid priority, malformed target, bad config values) are
/// rejected before any task exists, so a caller never has to clean up after them.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "scheduler.max_workers")
        key: Option<String>,
    },

    /// Submitted target is not an absolute http(s) URL
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget {
        /// The rejected target as submitted
        target: String,
        /// Why it was rejected
        reason: String,
    },

    /// Submitted priority is outside the accepted range
    #[error("invalid priority {0}: must be between 1 and 10")]
    InvalidPriority(i32),

    /// Control operation on a task failed
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Fetch or listing collaborator failed for the whole request
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new submissions
    #[error("shutdown in progress: not accepting new submissions")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error that points at a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Errors raised by control operations (pause, resume, cancel, set priority)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Task is neither active nor in the finished-task retention window
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: TaskId,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID that is in an invalid state for the operation
        id: TaskId,
        /// The operation that was attempted (e.g., "pause", "resume")
        operation: String,
        /// The state that prevents the operation
        current_state: TaskState,
    },
}

/// Failure reported by a fetch or listing collaborator
///
/// The engine only needs to know whether a failure is worth retrying and whether it
/// was the expected outcome of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Failure expected to go away on its own (throttling, timeouts, resets)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Failure that will not change on retry (unavailable, private, unsupported)
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The fetch observed its cancellation token and stopped
    #[error("cancelled")]
    Cancelled,

    /// The per-task timeout elapsed
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}
