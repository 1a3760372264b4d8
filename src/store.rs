//! ProgressStore - durable attempt records backed by SQLite
//!
//! One database per course, located under the application data directory
//! with a filename derived from the sanitized course name. Holds three
//! tables: attempt records (primary key: exercise id), a course metadata
//! cache, and per-course counters. All writes are last-writer-wins per
//! exercise id.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

/// Counter tracking completed (non-cancelled) test runs
pub const TEST_RUN_COUNTER: &str = "test-runs";

/// Counter tracking AI hint requests
pub const HINT_COUNTER: &str = "hints";

/// Errors surfaced by the progress store
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store accessed before initialization or after close
    #[error("storage unavailable")]
    Unavailable,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => StorageError::Unavailable,
            other => StorageError::Connection(other.to_string()),
        }
    }
}

/// Persisted fact about an exercise's most recent test outcome
///
/// At most one record per exercise id; later writes replace earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub exercise_id: String,
    pub completed: bool,
    /// Timestamp of the most recent attempt
    pub last_attempt_at: DateTime<Utc>,
    /// Present only while the exercise is completed
    pub completed_at: Option<DateTime<Utc>>,
}

/// Derive an identifier-safe database filename component from a course name
pub fn sanitize_course_name(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if sanitized.is_empty() {
        "course".to_string()
    } else {
        sanitized
    }
}

/// SQLite-backed store for one course's progress
#[derive(Clone)]
pub struct ProgressStore {
    pool: SqlitePool,
}

impl ProgressStore {
    /// Open (or create) the database at the given path and run migrations
    pub async fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection(e.to_string()))?;
        }

        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL;").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        debug!(path = %db_path.display(), "progress store opened");
        Ok(store)
    }

    /// Open the store for a named course under the given data directory
    pub async fn for_course(data_dir: &Path, course_name: &str) -> Result<Self, StorageError> {
        let db_path = course_db_path(data_dir, course_name);
        Self::open(&db_path).await
    }

    /// Create the backing schema; safe to call on an already-initialized store
    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
        )
        .execute(&self.pool)
        .await?;

        let applied = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = 1")
            .fetch_optional(&self.pool)
            .await?
            .is_some();

        if !applied {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r"
                CREATE TABLE IF NOT EXISTS attempts (
                    exercise_id TEXT PRIMARY KEY,
                    completed INTEGER NOT NULL CHECK (completed IN (0, 1)),
                    last_attempt_at TEXT NOT NULL,
                    completed_at TEXT
                );
                ",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r"
                CREATE TABLE IF NOT EXISTS course_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                ",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r"
                CREATE TABLE IF NOT EXISTS counters (
                    name TEXT PRIMARY KEY,
                    value INTEGER NOT NULL CHECK (value >= 0)
                );
                ",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (1, ?1)
                ON CONFLICT(version) DO NOTHING
                ",
            )
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }

        Ok(())
    }

    /// Upsert the record as completed: both timestamps set to now
    ///
    /// Idempotent; a second call only refreshes the timestamps.
    pub async fn mark_completed(&self, exercise_id: &str) -> Result<(), StorageError> {
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO attempts (exercise_id, completed, last_attempt_at, completed_at)
            VALUES (?1, 1, ?2, ?2)
            ON CONFLICT(exercise_id) DO UPDATE SET
                completed = 1,
                last_attempt_at = excluded.last_attempt_at,
                completed_at = excluded.completed_at
            ",
        )
        .bind(exercise_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(exercise_id, "attempt recorded as completed");
        Ok(())
    }

    /// Upsert the record as attempted-but-not-completed
    ///
    /// Drops any prior completion timestamp: an attempt supersedes prior
    /// state, so a previously passing exercise that fails reverts to
    /// not-completed.
    pub async fn mark_attempted(&self, exercise_id: &str) -> Result<(), StorageError> {
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO attempts (exercise_id, completed, last_attempt_at, completed_at)
            VALUES (?1, 0, ?2, NULL)
            ON CONFLICT(exercise_id) DO UPDATE SET
                completed = 0,
                last_attempt_at = excluded.last_attempt_at,
                completed_at = NULL
            ",
        )
        .bind(exercise_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(exercise_id, "attempt recorded as not completed");
        Ok(())
    }

    /// Fetch the record for one exercise; absence is not an error
    pub async fn attempt(&self, exercise_id: &str) -> Result<Option<AttemptRecord>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT exercise_id, completed, last_attempt_at, completed_at
            FROM attempts
            WHERE exercise_id = ?1
            ",
        )
        .bind(exercise_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_attempt_row).transpose()
    }

    /// Fetch every record for the course
    pub async fn attempts(&self) -> Result<Vec<AttemptRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT exercise_id, completed, last_attempt_at, completed_at
            FROM attempts
            ORDER BY exercise_id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_attempt_row).collect()
    }

    /// Delete every attempt record and counter for the course
    pub async fn reset(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM attempts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM counters").execute(&mut *tx).await?;
        tx.commit().await?;

        info!("progress store reset");
        Ok(())
    }

    /// Atomically increment a named counter from its current value or zero
    pub async fn increment_counter(&self, name: &str) -> Result<i64, StorageError> {
        let row = sqlx::query(
            r"
            INSERT INTO counters (name, value)
            VALUES (?1, 1)
            ON CONFLICT(name) DO UPDATE SET value = value + 1
            RETURNING value
            ",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        let value: i64 = row.try_get("value").map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(value)
    }

    /// Current value of a named counter; zero when absent
    pub async fn counter(&self, name: &str) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT value FROM counters WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row
                .try_get("value")
                .map_err(|e| StorageError::Serialization(e.to_string())),
            None => Ok(0),
        }
    }

    /// Store a course metadata entry
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO course_meta (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a course metadata entry
    pub async fn meta(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM course_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            r.try_get("value")
                .map_err(|e| StorageError::Serialization(e.to_string()))
        })
        .transpose()
    }

    /// Close the store; every subsequent operation fails with `Unavailable`
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Database path for a named course under the data directory
pub fn course_db_path(data_dir: &Path, course_name: &str) -> PathBuf {
    data_dir.join(format!("{}.db", sanitize_course_name(course_name)))
}

fn map_attempt_row(row: &SqliteRow) -> Result<AttemptRecord, StorageError> {
    let ser = |e: sqlx::Error| StorageError::Serialization(e.to_string());

    Ok(AttemptRecord {
        exercise_id: row.try_get("exercise_id").map_err(ser)?,
        completed: row.try_get::<i64, _>("completed").map_err(ser)? != 0,
        last_attempt_at: row.try_get("last_attempt_at").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}
