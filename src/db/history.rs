//! History records and duplicate lookups.

use async_trait::async_trait;

use crate::history::HistoryStore;
use crate::types::{TaskId, TaskSnapshot, TaskState};
use crate::{Error, Result};

use super::{Database, HistoryEntry, HistoryRow};

const HISTORY_COLUMNS: &str = "task_id, target, title, state, priority, attempt, last_error, \
                               output_path, created_at, started_at, finished_at";

impl Database {
    /// Write the terminal record of a task
    ///
    /// A second record for the same task id replaces the first.
    pub async fn insert_history(&self, task: &TaskSnapshot) -> Result<()> {
        let finished_at = task.finished_at.unwrap_or_else(chrono::Utc::now);

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO history (
                task_id, target, title, state, priority, attempt, last_error,
                output_path, created_at, started_at, finished_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.target)
        .bind(&task.title)
        .bind(task.state.as_str())
        .bind(task.priority.get())
        .bind(i64::from(task.attempt))
        .bind(&task.last_error)
        .bind(
            task.output_path
                .as_ref()
                .and_then(|p| p.to_str().map(String::from)),
        )
        .bind(task.created_at.timestamp())
        .bind(task.started_at.map(|t| t.timestamp()))
        .bind(finished_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    /// Query history with pagination and optional state filter
    ///
    /// Most recently finished first.
    pub async fn query_history(
        &self,
        state_filter: Option<TaskState>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = if let Some(state) = state_filter {
            sqlx::query_as::<_, HistoryRow>(&format!(
                "SELECT {HISTORY_COLUMNS} FROM history WHERE state = ? \
                 ORDER BY finished_at DESC, rowid DESC LIMIT ? OFFSET ?"
            ))
            .bind(state.as_str())
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, HistoryRow>(&format!(
                "SELECT {HISTORY_COLUMNS} FROM history \
                 ORDER BY finished_at DESC, rowid DESC LIMIT ? OFFSET ?"
            ))
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(Error::Sqlx)?;

        rows.into_iter().map(HistoryEntry::try_from).collect()
    }

    /// Count history entries, optionally filtered by state
    pub async fn count_history(&self, state_filter: Option<TaskState>) -> Result<i64> {
        let count = if let Some(state) = state_filter {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history WHERE state = ?")
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await
        } else {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history")
                .fetch_one(&self.pool)
                .await
        }
        .map_err(Error::Sqlx)?;

        Ok(count)
    }

    /// Get the record of one task
    pub async fn get_history_entry(&self, task_id: &TaskId) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history WHERE task_id = ?"
        ))
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        row.map(HistoryEntry::try_from).transpose()
    }

    /// Whether the target has a successful record
    pub async fn has_completed(&self, target: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM history WHERE target = ? AND state = 'succeeded' LIMIT 1",
        )
        .bind(target)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(found.is_some())
    }

    /// Delete entries finished before the given unix timestamp
    ///
    /// Returns the number of records deleted.
    pub async fn delete_history_before(&self, before_timestamp: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM history WHERE finished_at < ?")
            .bind(before_timestamp)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl HistoryStore for Database {
    async fn is_duplicate(&self, target: &str) -> Result<bool> {
        self.has_completed(target).await
    }

    async fn record_result(&self, task: &TaskSnapshot) -> Result<()> {
        self.insert_history(task).await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
