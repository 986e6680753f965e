//! Error types for report-fetcher
//!
//! This module provides the error handling for the library:
//! - [`Error`] - the crate-wide error returned by ledger, storage and setup operations
//! - [`DatabaseError`] - SQLite connection, migration and query failures
//! - [`FetchError`] - the failure taxonomy of a single metadata or content fetch
//!
//! Fetch failures never escape as [`Error`]: the worker pool turns them into
//! ledger updates and failure records so one job cannot abort its batch.

use crate::types::FetchStage;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for report-fetcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for report-fetcher
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "worker.concurrency")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Job not present in the ledger
    #[error("job not found: {0}")]
    NotFound(String),

    /// Artifact or failure record could not be written
    #[error("failed to write {path}: {source}")]
    Artifact {
        /// Destination path of the write
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// URL list watching error
    #[error("ingest error: {0}")]
    Ingest(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress
    #[error("shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
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

    /// Stored value could not be mapped back to a typed field
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Failure of one fetch stage (metadata lookup or content download)
///
/// Variants mirror how the stage loop reacts:
/// - `TransientServer` and `Transport` are retried with backoff
/// - `AuthExpired` suspends until the credential rotates, then retries
/// - `UnexpectedStatus` is retried until the attempt cap, then reported
/// - `MalformedResponse` is terminal immediately
/// - `RetriesExhausted` wraps the last failure once the cap is reached
#[derive(Debug, Error)]
pub enum FetchError {
    /// 429 or 5xx response
    #[error("{stage} stage: server returned {status}")]
    TransientServer {
        /// Stage that failed
        stage: FetchStage,
        /// HTTP status code
        status: u16,
        /// Response body, if one was read
        body: Option<String>,
    },

    /// 401 or 403 response
    #[error("{stage} stage: credential rejected with {status}")]
    AuthExpired {
        /// Stage that failed
        stage: FetchStage,
        /// HTTP status code
        status: u16,
    },

    /// Any other non-200 response
    #[error("{stage} stage: unexpected status {status}")]
    UnexpectedStatus {
        /// Stage that failed
        stage: FetchStage,
        /// HTTP status code
        status: u16,
        /// Response body, if one was read
        body: Option<String>,
    },

    /// 200 response whose body is unusable
    #[error("{stage} stage: malformed response: {reason}")]
    MalformedResponse {
        /// Stage that failed
        stage: FetchStage,
        /// What was wrong with the body
        reason: String,
        /// Response body, if one was read
        body: Option<String>,
    },

    /// Connection, timeout or body-read failure
    #[error("{stage} stage: transport error: {message}")]
    Transport {
        /// Stage that failed
        stage: FetchStage,
        /// Description of the transport failure
        message: String,
    },

    /// Every attempt failed with a retryable error
    #[error("{stage} stage: gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Stage that failed
        stage: FetchStage,
        /// Number of requests made
        attempts: u32,
        /// The final failure
        last: Box<FetchError>,
    },

    /// Shutdown was requested while waiting for a credential
    #[error("{stage} stage: cancelled while waiting for a fresh credential")]
    Cancelled {
        /// Stage that was interrupted
        stage: FetchStage,
    },
}

impl FetchError {
    /// Stage in which the failure happened
    pub fn stage(&self) -> FetchStage {
        match self {
            FetchError::TransientServer { stage, .. }
            | FetchError::AuthExpired { stage, .. }
            | FetchError::UnexpectedStatus { stage, .. }
            | FetchError::MalformedResponse { stage, .. }
            | FetchError::Transport { stage, .. }
            | FetchError::RetriesExhausted { stage, .. }
            | FetchError::Cancelled { stage } => *stage,
        }
    }

    /// Last HTTP status observed, if any response was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::TransientServer { status, .. }
            | FetchError::AuthExpired { status, .. }
            | FetchError::UnexpectedStatus { status, .. } => Some(*status),
            FetchError::MalformedResponse { .. } => Some(200),
            FetchError::RetriesExhausted { last, .. } => last.status_code(),
            FetchError::Transport { .. } | FetchError::Cancelled { .. } => None,
        }
    }

    /// Response body captured with the failure, if any
    pub fn response_body(&self) -> Option<&str> {
        match self {
            FetchError::TransientServer { body, .. }
            | FetchError::UnexpectedStatus { body, .. }
            | FetchError::MalformedResponse { body, .. } => body.as_deref(),
            FetchError::RetriesExhausted { last, .. } => last.response_body(),
            _ => None,
        }
    }
}
