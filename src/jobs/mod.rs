//! Job records for pipeline runs.
//!
//! The pipeline only ever touches its own row: status, progress and error.
//! The store is a trait so embedders can plug their own queue's records in;
//! the SQLite implementation backs the CLI and an in-memory one backs tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::error::{Result, ScanlateError};

/// Lifecycle of a translation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    fn parse(s: &str) -> JobStatus {
        match s {
            "PROCESSING" => JobStatus::Processing,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

/// One translation job as the pipeline sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub task_id: String,
    /// Owner to notify on completion, when known.
    pub user_id: Option<i64>,
    pub chapter_url: String,
    pub target_lang: String,
    pub mode: String,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Store contract: create a row, update its status/progress/error, read it.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(
        &self,
        task_id: &str,
        user_id: Option<i64>,
        chapter_url: &str,
        target_lang: &str,
        mode: &str,
    ) -> Result<()>;

    async fn update(
        &self,
        task_id: &str,
        status: JobStatus,
        progress: Option<u8>,
        error: Option<&str>,
    ) -> Result<()>;

    async fn get(&self, task_id: &str) -> Result<Option<JobRecord>>;
}

/// SQLite-backed job store.
pub struct SqliteJobStore {
    pool: DbPool,
}

impl SqliteJobStore {
    pub fn new(pool: DbPool) -> Result<Self> {
        let store = Self { pool };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                task_id     TEXT PRIMARY KEY,
                user_id     INTEGER,
                chapter_url TEXT NOT NULL,
                target_lang TEXT NOT NULL,
                mode        TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'PENDING',
                progress    INTEGER NOT NULL DEFAULT 0,
                error       TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(
        &self,
        task_id: &str,
        user_id: Option<i64>,
        chapter_url: &str,
        target_lang: &str,
        mode: &str,
    ) -> Result<()> {
        let pool = self.pool.clone();
        let (task_id, chapter_url, target_lang, mode) = (
            task_id.to_string(),
            chapter_url.to_string(),
            target_lang.to_string(),
            mode.to_string(),
        );
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO jobs (task_id, user_id, chapter_url, target_lang, mode,
                                   status, progress, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', 0, ?6, ?6)",
                params![task_id, user_id, chapter_url, target_lang, mode, now],
            )?;
            Ok(())
        })
        .await?
    }

    async fn update(
        &self,
        task_id: &str,
        status: JobStatus,
        progress: Option<u8>,
        error: Option<&str>,
    ) -> Result<()> {
        let pool = self.pool.clone();
        let task_id = task_id.to_string();
        let error = error.map(|e| e.to_string());
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE jobs
                 SET status = ?2,
                     progress = COALESCE(?3, progress),
                     error = COALESCE(?4, error),
                     updated_at = ?5
                 WHERE task_id = ?1",
                params![task_id, status.as_str(), progress, error, now],
            )?;
            if changed == 0 {
                return Err(ScanlateError::NotFound(format!("job {task_id}")));
            }
            Ok(())
        })
        .await?
    }

    async fn get(&self, task_id: &str) -> Result<Option<JobRecord>> {
        let pool = self.pool.clone();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<JobRecord>> {
            let conn = pool.get()?;
            let record = conn
                .query_row(
                    "SELECT task_id, user_id, chapter_url, target_lang, mode,
                            status, progress, error, created_at, updated_at
                     FROM jobs WHERE task_id = ?1",
                    params![task_id],
                    |row| {
                        Ok(JobRecord {
                            task_id: row.get(0)?,
                            user_id: row.get(1)?,
                            chapter_url: row.get(2)?,
                            target_lang: row.get(3)?,
                            mode: row.get(4)?,
                            status: JobStatus::parse(&row.get::<_, String>(5)?),
                            progress: row.get::<_, i64>(6)? as u8,
                            error: row.get(7)?,
                            created_at: parse_timestamp(&row.get::<_, String>(8)?),
                            updated_at: parse_timestamp(&row.get::<_, String>(9)?),
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
        .await?
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// In-memory job store for tests and embedders without persistence.
#[derive(Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        task_id: &str,
        user_id: Option<i64>,
        chapter_url: &str,
        target_lang: &str,
        mode: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let record = JobRecord {
            task_id: task_id.to_string(),
            user_id,
            chapter_url: chapter_url.to_string(),
            target_lang: target_lang.to_string(),
            mode: mode.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.records
            .lock()
            .expect("job store poisoned")
            .insert(task_id.to_string(), record);
        Ok(())
    }

    async fn update(
        &self,
        task_id: &str,
        status: JobStatus,
        progress: Option<u8>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.lock().expect("job store poisoned");
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| ScanlateError::NotFound(format!("job {task_id}")))?;
        record.status = status;
        if let Some(p) = progress {
            record.progress = p;
        }
        if let Some(e) = error {
            record.error = Some(e.to_string());
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<JobRecord>> {
        Ok(self
            .records
            .lock()
            .expect("job store poisoned")
            .get(task_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_sqlite_job_lifecycle() {
        let pool = db::open_in_memory().unwrap();
        let store = SqliteJobStore::new(pool).unwrap();

        store
            .create("t1", Some(7), "https://example.com/chapter-1", "tr", "clean")
            .await
            .unwrap();

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.progress, 0);
        assert_eq!(record.user_id, Some(7));

        store
            .update("t1", JobStatus::Processing, Some(30), None)
            .await
            .unwrap();
        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress, 30);

        store
            .update("t1", JobStatus::Failed, None, Some("no images"))
            .await
            .unwrap();
        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        // Progress is retained when the update omits it
        assert_eq!(record.progress, 30);
        assert_eq!(record.error.as_deref(), Some("no images"));
    }

    #[tokio::test]
    async fn test_update_missing_job_errors() {
        let store = MemoryJobStore::new();
        let err = store
            .update("nope", JobStatus::Completed, Some(100), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanlateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryJobStore::new();
        store
            .create("t2", None, "https://example.com/chapter-2", "es", "overlay")
            .await
            .unwrap();
        store
            .update("t2", JobStatus::Completed, Some(100), None)
            .await
            .unwrap();
        let record = store.get("t2").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert!(record.error.is_none());
    }
}
