//! Opening the history database and bringing its schema up to date.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;

use super::Database;

/// A schema version and the statements that produce it from the one before
struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

/// Applied in order; never edit an entry once released, append a new one
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "history table",
    statements: &[
        "CREATE TABLE history (
            task_id TEXT PRIMARY KEY,
            target TEXT NOT NULL,
            title TEXT,
            state TEXT NOT NULL,
            priority INTEGER NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            output_path TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER NOT NULL
        )",
        "CREATE INDEX idx_history_target ON history(target, state)",
        "CREATE INDEX idx_history_finished ON history(finished_at DESC)",
    ],
}];

fn connection_failed(context: &'static str) -> impl Fn(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

fn migration_failed(version: i64) -> impl Fn(sqlx::Error) -> Error {
    move |e| {
        Error::Database(DatabaseError::MigrationFailed(format!(
            "migration v{version}: {e}"
        )))
    }
}

impl Database {
    /// Open (or create) the history database at `path`
    ///
    /// Missing parent directories are created, the connection runs in WAL mode,
    /// and any pending migrations are applied before the handle is returned.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "cannot create {}: {e}",
                    parent.display()
                )))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(connection_failed("cannot open history database"))?;

        let db = Self { pool };
        db.migrate().await?;

        tracing::debug!(path = %path.display(), "History database opened");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(migration_failed(0))?;

        let current: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::Database(DatabaseError::QueryFailed(e.to_string())))?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            self.apply(migration).await?;
        }
        Ok(())
    }

    /// Run one migration in its own transaction; dropping `tx` on error rolls back
    async fn apply(&self, migration: &Migration) -> Result<()> {
        let version = migration.version;
        tracing::info!(version, description = migration.description, "Applying history migration");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(migration_failed(version))?;

        for statement in migration.statements {
            sqlx::query(*statement)
                .execute(&mut *tx)
                .await
                .map_err(migration_failed(version))?;
        }
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(migration_failed(version))?;

        tx.commit().await.map_err(migration_failed(version))?;
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
