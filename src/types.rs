//! Core types for report-fetcher

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a job (the final path segment of its source URL)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new JobId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for JobId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for JobId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Job status as stored in the ledger
///
/// `Failed` covers both "retry on the next claim" and "attempt cap reached";
/// use [`Job::is_exhausted`] to tell them apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Never attempted, or attempted and interrupted before a result was recorded
    Pending,
    /// Last attempt failed
    Failed,
    /// Both stages succeeded and the artifact is on disk
    Done,
}

impl JobStatus {
    /// Ledger representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Failed => "failed",
            JobStatus::Done => "done",
        }
    }

    /// Parse the ledger representation
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "failed" => Some(JobStatus::Failed),
            "done" => Some(JobStatus::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetch stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStage {
    /// Stage A: metadata lookup keyed by job id
    Metadata,
    /// Stage B: download of the content location named by the metadata
    Content,
}

impl FetchStage {
    /// Name used in logs and failure records
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStage::Metadata => "metadata",
            FetchStage::Content => "content",
        }
    }
}

impl std::fmt::Display for FetchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked job, as read from the ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Primary key
    pub id: JobId,
    /// Source URL the id was derived from
    pub url: String,
    /// Current status
    pub status: JobStatus,
    /// Number of attempts started (never decreases)
    pub attempts: u32,
    /// Last HTTP status from the metadata stage
    pub metadata_status: Option<u16>,
    /// Last HTTP status from the content stage
    pub content_status: Option<u16>,
    /// Artifact location once done
    pub artifact_path: Option<PathBuf>,
    /// Artifact size in bytes once done
    pub size_bytes: Option<u64>,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job has used up its attempts and will no longer be claimed
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.status != JobStatus::Done && self.attempts >= max_attempts
    }
}

/// Result of one attempt, as recorded in the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Both stages succeeded and the payload was persisted
    Done {
        /// Metadata stage status (200)
        metadata_status: u16,
        /// Content stage status (200)
        content_status: u16,
        /// Where the payload was written
        artifact_path: PathBuf,
        /// Exact number of bytes written
        size_bytes: u64,
    },
    /// The attempt failed in one of the stages
    Failed {
        /// Stage that failed
        stage: FetchStage,
        /// Metadata stage status, if a response was received
        metadata_status: Option<u16>,
        /// Content stage status, if the stage ran and a response was received
        content_status: Option<u16>,
        /// Failure message
        error: String,
    },
}

/// Aggregate ledger counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Jobs with status `done`
    pub done: u64,
    /// Jobs with status `pending`
    pub pending: u64,
    /// Jobs with status `failed` (retryable and exhausted)
    pub failed: u64,
}

impl JobCounts {
    /// Total number of jobs in the ledger
    pub fn total(&self) -> u64 {
        self.done + self.pending + self.failed
    }
}

impl std::fmt::Display for JobCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "done={}, pending={}, failed={}",
            self.done, self.pending, self.failed
        )
    }
}

/// Events emitted while the fetcher runs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// New ids were added to the ledger by the ingest feed
    JobsIngested {
        /// Number of rows that produced an enqueue call
        count: usize,
    },
    /// An attempt started
    JobStarted {
        /// Job id
        id: JobId,
        /// Attempt number (1-based)
        attempt: u32,
    },
    /// A job finished successfully
    JobCompleted {
        /// Job id
        id: JobId,
        /// Artifact location
        path: PathBuf,
        /// Artifact size in bytes
        size_bytes: u64,
    },
    /// An attempt failed
    JobFailed {
        /// Job id
        id: JobId,
        /// Stage that failed
        stage: FetchStage,
        /// Last HTTP status, if any
        status: Option<u16>,
        /// Failure message
        error: String,
    },
    /// A batch drained
    BatchFinished {
        /// Jobs processed in this batch
        size: usize,
        /// Ledger counts after the batch
        counts: JobCounts,
    },
    /// A new credential was observed after a rejection
    CredentialRotated,
}
