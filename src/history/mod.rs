//! History collaborator
//!
//! The engine asks a [`HistoryStore`] whether a target was already downloaded
//! and hands it one record per terminal task. [`crate::db::Database`] is the
//! SQLite-backed store; [`MemoryHistory`] keeps records in process.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::Result;
use crate::types::{TaskSnapshot, TaskState};

/// Duplicate lookups and terminal-result records
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Whether `target` has a recorded successful completion
    async fn is_duplicate(&self, target: &str) -> Result<bool>;

    /// Record the terminal state of a task
    ///
    /// Called exactly once per terminal transition. Recording the same task id
    /// again replaces the earlier record.
    async fn record_result(&self, task: &TaskSnapshot) -> Result<()>;

    /// Name of this implementation, for logging
    fn name(&self) -> &'static str;
}

/// In-process history, lost when dropped
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<TaskSnapshot>>,
    completed: Mutex<Vec<String>>,
}

impl MemoryHistory {
    /// Empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// History that already reports these targets as completed
    pub fn with_completed<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: Mutex::new(Vec::new()),
            completed: Mutex::new(targets.into_iter().map(Into::into).collect()),
        }
    }

    /// Every record written so far, in write order
    pub fn records(&self) -> Vec<TaskSnapshot> {
        self.records.lock().clone()
    }

    /// Number of records written so far
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn is_duplicate(&self, target: &str) -> Result<bool> {
        if self.completed.lock().iter().any(|t| t == target) {
            return Ok(true);
        }
        Ok(self
            .records
            .lock()
            .iter()
            .any(|r| r.target == target && r.state == TaskState::Succeeded))
    }

    async fn record_result(&self, task: &TaskSnapshot) -> Result<()> {
        let mut records = self.records.lock();
        records.retain(|r| r.id != task.id);
        records.push(task.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, TaskId, TaskOptions};

    fn snapshot(target: &str, state: TaskState) -> TaskSnapshot {
        TaskSnapshot {
            id: TaskId::new(),
            target: target.to_string(),
            title: None,
            priority: Priority::default(),
            options: TaskOptions::default(),
            state,
            progress: 0.0,
            rate_bps: None,
            eta_secs: None,
            attempt: 0,
            last_error: None,
            output_path: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: Some(chrono::Utc::now()),
            next_retry_at: None,
        }
    }

    #[tokio::test]
    async fn only_successes_count_as_duplicates() {
        let history = MemoryHistory::new();
        history
            .record_result(&snapshot("https://a", TaskState::Failed))
            .await
            .unwrap();
        history
            .record_result(&snapshot("https://b", TaskState::Cancelled))
            .await
            .unwrap();
        assert!(!history.is_duplicate("https://a").await.unwrap());
        assert!(!history.is_duplicate("https://b").await.unwrap());

        history
            .record_result(&snapshot("https://a", TaskState::Succeeded))
            .await
            .unwrap();
        assert!(history.is_duplicate("https://a").await.unwrap());
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn seeded_targets_are_duplicates() {
        let history = MemoryHistory::with_completed(["https://seen"]);
        assert!(history.is_duplicate("https://seen").await.unwrap());
        assert!(!history.is_duplicate("https://new").await.unwrap());
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn rerecording_replaces() {
        let history = MemoryHistory::new();
        let mut record = snapshot("https://a", TaskState::Failed);
        history.record_result(&record).await.unwrap();
        record.state = TaskState::Succeeded;
        history.record_result(&record).await.unwrap();

        let records = history.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, TaskState::Succeeded);
    }
}
