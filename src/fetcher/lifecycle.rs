//! Startup and shutdown coordination.

use crate::error::Result;
use crate::ingest::IngestFeed;
use crate::types::JobCounts;

use super::ReportFetcher;

impl ReportFetcher {
    /// Ingest and fetch until shutdown or the configured cycle limit
    ///
    /// Scans the URL list once before the first batch, keeps the ingest feed
    /// running alongside the worker pool, and returns the final ledger counts.
    pub async fn run(&self) -> Result<JobCounts> {
        let mut feed = IngestFeed::new(self.db.clone(), self.config.ingest.clone())
            .with_events(self.event_tx.clone());
        if let Err(e) = feed.scan().await {
            tracing::error!(error = %e, "Initial URL list scan failed");
        }

        let feed_cancel = self.cancel.child_token();
        let feed_handle = tokio::spawn(feed.run(feed_cancel.clone()));

        let result = self.pool.run().await;

        feed_cancel.cancel();
        if let Err(e) = feed_handle.await {
            tracing::error!(error = %e, "Ingest feed task panicked");
        }

        let counts = result?;
        tracing::info!(
            done = counts.done,
            pending = counts.pending,
            failed = counts.failed,
            "SUMMARY"
        );
        Ok(counts)
    }

    /// Request a graceful stop
    ///
    /// The worker pool finishes its current batch before [`run`](Self::run)
    /// returns. Credential-rotation waits end immediately and their jobs are
    /// recorded as failed attempts.
    pub fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");
        self.cancel.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
