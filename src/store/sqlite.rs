//! SQLite-backed job store.
//!
//! One row per job: the full record lives in `document` as JSON, `status`
//! and `version` are duplicated into columns for filtering and
//! compare-and-set updates.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::{Error, Result, StoreError};
use crate::job::{Job, JobId, JobStatus};
use crate::store::{ensure_valid, JobStore};

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (and create if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| StoreError::Backend(format!("Failed to parse database path: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                document TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn encode(job: &Job) -> Result<String> {
    ensure_valid(job)?;
    Ok(serde_json::to_string(job)?)
}

fn decode(id: &str, document: &str, version: i64) -> Result<Job> {
    let mut job: Job = serde_json::from_str(document).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })?;
    job.version = version as u64;
    ensure_valid(&job)?;
    Ok(job)
}

/// Decode listed rows, skipping the ones that no longer decode so a single
/// bad document cannot hide every other job.
fn decode_rows(rows: &[(String, String, i64)]) -> Result<Vec<Job>> {
    let mut jobs = Vec::with_capacity(rows.len());
    for (id, document, version) in rows {
        match decode(id, document, *version) {
            Ok(job) => jobs.push(job),
            Err(Error::Store(StoreError::Corrupt { id, reason })) => {
                tracing::warn!(job = %id, reason = %reason, "Skipping corrupt job record");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(jobs)
}

fn status_name(status: JobStatus) -> String {
    status.to_string()
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let document = encode(job)?;
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, status, version, document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(job.id.to_string())
        .bind(status_name(job.status))
        .bind(job.version as i64)
        .bind(document)
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(job.id.to_string()).into());
        }
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let id = id.to_string();
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT document, version FROM jobs WHERE id = ?")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(document, version)| decode(&id, &document, version))
            .transpose()
    }

    async fn update(&self, job: &mut Job) -> Result<()> {
        let expected = job.version;
        let mut next = job.clone();
        next.version = expected + 1;
        let document = encode(&next)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, version = ?, document = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(status_name(next.status))
        .bind(next.version as i64)
        .bind(document)
        .bind(next.updated_at.timestamp_millis())
        .bind(next.id.to_string())
        .bind(expected as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(Error::Store(StoreError::Conflict {
                id: job.id.to_string(),
                expected,
            }));
        }

        job.version = next.version;
        Ok(())
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT id, document, version FROM jobs WHERE status IN ({}) ORDER BY created_at ASC",
            placeholders
        );

        let mut query = sqlx::query_as::<_, (String, String, i64)>(&sql);
        for status in statuses {
            query = query.bind(status_name(*status));
        }

        let rows = query.fetch_all(&self.pool).await?;
        decode_rows(&rows)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT id, document, version FROM jobs ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        decode_rows(&rows)
    }
}
