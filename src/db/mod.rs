//! Database layer for report-fetcher
//!
//! Handles SQLite persistence of the job ledger.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`jobs`] - Job ledger: enqueue, claim, attempt/result recording, counts
//!
//! The ledger has a single writer. Every mutation is one SQL statement, so each
//! is atomic on its own and no multi-row transaction is needed. Claims do not
//! lease rows: running two schedulers against one ledger can double-claim.

use crate::error::DatabaseError;
use crate::types::{Job, JobId, JobStatus};
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod jobs;
mod migrations;

/// Job record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Job identifier
    pub id: JobId,
    /// Source URL
    pub url: String,
    /// Status text ("pending", "failed", "done")
    pub status: String,
    /// Attempts started
    pub attempts: i64,
    /// Last metadata stage HTTP status
    pub http_status_meta: Option<i64>,
    /// Last content stage HTTP status
    pub http_status_content: Option<i64>,
    /// Artifact path once done
    pub path: Option<String>,
    /// Artifact size once done
    pub size_bytes: Option<i64>,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// Unix timestamp (milliseconds) of the last mutation
    pub updated_at: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_db(&row.status).ok_or_else(|| {
            DatabaseError::CorruptRow(format!(
                "job {} has unknown status '{}'",
                row.id, row.status
            ))
        })?;

        Ok(Job {
            id: row.id,
            url: row.url,
            status,
            attempts: row.attempts.max(0) as u32,
            metadata_status: row.http_status_meta.map(|s| s as u16),
            content_status: row.http_status_content.map(|s| s as u16),
            artifact_path: row.path.map(PathBuf::from),
            size_bytes: row.size_bytes.map(|s| s.max(0) as u64),
            last_error: row.last_error,
            updated_at: Utc
                .timestamp_millis_opt(row.updated_at)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Database handle for report-fetcher
pub struct Database {
    pool: SqlitePool,
}
