//! # report-fetcher
//!
//! Durable, concurrent downloader for report metadata and payloads.
//!
//! Report URLs appended to a list file become jobs in a SQLite ledger. A
//! bounded worker pool claims ready jobs in batches and fetches each in two
//! stages: a metadata document naming the content location, then the content
//! itself. Transient failures back off and retry, rejected credentials wait for
//! an external process to rotate the token, and every job's state survives
//! restarts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use report_fetcher::{Config, ReportFetcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.fetch.metadata_base_url = "https://api.example.com/reports/".to_string();
//!     config.worker.concurrency = 8;
//!
//!     let fetcher = ReportFetcher::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = fetcher.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let counts = fetcher.run().await?;
//!     println!("{counts}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Report payload and failure record output
pub mod artifacts;
/// Configuration types
pub mod config;
/// Bearer credential cache and sources
pub mod credentials;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Two-stage metadata and content retrieval
pub mod fetch;
/// Top-level fetcher (decomposed into focused submodules)
pub mod fetcher;
/// URL list ingestion
pub mod ingest;
/// Bounded-concurrency worker pool
pub mod pool;
/// Retry classification and exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use artifacts::{ArtifactStore, FailureRecord};
pub use config::Config;
pub use credentials::{
    CredentialProvider, CredentialSource, FileCredentialSource, MemoryCredentialSource,
};
pub use db::Database;
pub use error::{DatabaseError, Error, FetchError, Result};
pub use fetch::{FetchClient, FetchedReport};
pub use fetcher::ReportFetcher;
pub use ingest::IngestFeed;
pub use pool::{JobFetcher, WorkerPool};
pub use types::{Event, FetchStage, Job, JobCounts, JobId, JobOutcome, JobStatus};

/// Helper function to run the fetcher with graceful signal handling.
///
/// Runs the fetcher and, when a termination signal arrives, calls its
/// `shutdown()` method. The current batch drains before this returns.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use report_fetcher::{Config, ReportFetcher, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let fetcher = ReportFetcher::new(config).await?;
///
///     // Run with automatic signal handling
///     let counts = run_with_shutdown(fetcher).await?;
///     println!("{counts}");
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(fetcher: ReportFetcher) -> Result<JobCounts> {
    let run = fetcher.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        _ = wait_for_signal() => fetcher.shutdown(),
    }

    run.await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
