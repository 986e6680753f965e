//! Job ledger operations.

use crate::error::DatabaseError;
use crate::types::{Job, JobCounts, JobId, JobOutcome, JobStatus};
use crate::{Error, Result};

use super::{Database, JobRow};

const JOB_COLUMNS: &str = "id, url, status, attempts, http_status_meta, http_status_content, \
                           path, size_bytes, last_error, updated_at";

/// Current time as Unix milliseconds (ledger timestamp resolution)
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn rows_to_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter()
        .map(|row| Job::try_from(row).map_err(Error::Database))
        .collect()
}

impl Database {
    /// Insert a job in `pending` state with zero attempts
    ///
    /// Does nothing if the id is already present. Returns whether a row was inserted.
    pub async fn enqueue_if_absent(&self, id: &JobId, url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO jobs (id, url, status, attempts, updated_at)
            VALUES (?, ?, 'pending', 0, ?)
            "#,
        )
        .bind(id)
        .bind(url)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to enqueue job: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Select up to `limit` jobs that are ready to run
    ///
    /// Ready means `pending` or `failed` with fewer than `max_attempts` attempts.
    /// The least recently updated jobs come first, so starved jobs are not
    /// overtaken by newer ones. Rows are not leased.
    pub async fn claim_batch(&self, limit: usize, max_attempts: u32) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status IN ('pending', 'failed') AND attempts < ?
            ORDER BY updated_at ASC, rowid ASC
            LIMIT ?
            "#
        ))
        .bind(i64::from(max_attempts))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim jobs: {}",
                e
            )))
        })?;

        rows_to_jobs(rows)
    }

    /// Increment a job's attempt count and touch its timestamp
    ///
    /// Returns the new attempt count.
    pub async fn record_attempt_start(&self, id: &JobId) -> Result<u32> {
        let attempts: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE jobs SET attempts = attempts + 1, updated_at = ?
            WHERE id = ?
            RETURNING attempts
            "#,
        )
        .bind(now_millis())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record attempt start: {}",
                e
            )))
        })?;

        match attempts {
            Some(n) => Ok(n.max(0) as u32),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    /// Store the outcome of an attempt
    ///
    /// A failure only overwrites the stage statuses it observed; the other
    /// stage keeps the status from its last run.
    pub async fn record_result(&self, id: &JobId, outcome: &JobOutcome) -> Result<()> {
        let query = match outcome {
            JobOutcome::Done {
                metadata_status,
                content_status,
                artifact_path,
                size_bytes,
            } => sqlx::query(
                r#"
                UPDATE jobs SET
                    status = ?, http_status_meta = ?, http_status_content = ?,
                    path = ?, size_bytes = ?, last_error = NULL, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(JobStatus::Done.as_str())
            .bind(i64::from(*metadata_status))
            .bind(i64::from(*content_status))
            .bind(artifact_path.to_string_lossy().into_owned())
            .bind(*size_bytes as i64),
            JobOutcome::Failed {
                metadata_status,
                content_status,
                error,
                ..
            } => sqlx::query(
                r#"
                UPDATE jobs SET
                    status = ?,
                    http_status_meta = COALESCE(?, http_status_meta),
                    http_status_content = COALESCE(?, http_status_content),
                    last_error = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(JobStatus::Failed.as_str())
            .bind(metadata_status.map(i64::from))
            .bind(content_status.map(i64::from))
            .bind(error.clone()),
        };

        let result = query
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to record job result: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    /// Aggregate done/pending/failed counts
    pub async fn counts(&self) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count jobs: {}",
                        e
                    )))
                })?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match JobStatus::from_db(&status) {
                Some(JobStatus::Done) => counts.done = count,
                Some(JobStatus::Pending) => counts.pending = count,
                Some(JobStatus::Failed) => counts.failed = count,
                None => {
                    tracing::warn!(status = %status, count, "Ignoring jobs with unknown status");
                }
            }
        }

        Ok(counts)
    }

    /// Get a job by id
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get job: {}",
                e
            )))
        })?;

        row.map(|r| Job::try_from(r).map_err(Error::Database))
            .transpose()
    }

    /// List jobs with the given status, oldest first
    pub async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY updated_at ASC, rowid ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list jobs: {}",
                e
            )))
        })?;

        rows_to_jobs(rows)
    }
}
