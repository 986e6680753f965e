//! Bounded-concurrency worker pool
//!
//! The pool repeatedly:
//! 1. Claims up to `concurrency * batch_multiplier` ready jobs from the ledger
//! 2. Sleeps the idle interval if there are none
//! 3. Spawns one task per job, gated by a semaphore of `concurrency` permits
//! 4. Waits for the whole batch before claiming again (batch barrier)
//! 5. Logs done/pending/failed counts
//!
//! Cancellation is checked between batches only; a running batch always drains.

use crate::Result;
use crate::artifacts::ArtifactStore;
use crate::config::WorkerConfig;
use crate::db::Database;
use crate::error::FetchError;
use crate::fetch::{FetchClient, FetchedReport};
use crate::types::{Event, Job, JobCounts};
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

mod job;


/// What the pool runs for each claimed job
#[async_trait::async_trait]
pub trait JobFetcher: Send + Sync {
    /// Retrieve the job's payload through both fetch stages
    async fn fetch_job(&self, job: &Job) -> std::result::Result<FetchedReport, FetchError>;
}

#[async_trait::async_trait]
impl JobFetcher for FetchClient {
    async fn fetch_job(&self, job: &Job) -> std::result::Result<FetchedReport, FetchError> {
        self.fetch(&job.id).await
    }
}

/// Scheduler driving a [`JobFetcher`] over the ledger
#[derive(Clone)]
pub struct WorkerPool {
    db: Arc<Database>,
    fetcher: Arc<dyn JobFetcher>,
    artifacts: Arc<ArtifactStore>,
    config: Arc<WorkerConfig>,
    error_body_limit: usize,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool; nothing runs until [`run`](Self::run) or [`run_batch`](Self::run_batch)
    pub fn new(
        db: Arc<Database>,
        fetcher: Arc<dyn JobFetcher>,
        artifacts: Arc<ArtifactStore>,
        config: WorkerConfig,
        error_body_limit: usize,
        event_tx: broadcast::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            fetcher,
            artifacts,
            config: Arc::new(config),
            error_body_limit,
            event_tx,
            cancel,
        }
    }

    /// Run batches until cancelled or `max_cycles` claims have been made
    ///
    /// Returns the ledger counts at exit.
    pub async fn run(&self) -> Result<JobCounts> {
        tracing::info!(
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size(),
            max_job_attempts = self.config.max_job_attempts,
            "Worker pool started"
        );

        let mut cycle: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Worker pool stopping on shutdown request");
                break;
            }
            if let Some(max) = self.config.max_cycles
                && cycle >= max
            {
                tracing::info!(cycles = cycle, "Worker pool reached its cycle limit");
                break;
            }
            cycle += 1;

            let processed = self.run_batch().await?;
            let last_cycle = self.config.max_cycles.is_some_and(|max| cycle >= max);

            if processed == 0 && !last_cycle {
                tracing::debug!(
                    idle_ms = self.config.idle_interval.as_millis() as u64,
                    "No ready jobs, idling"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.idle_interval) => {}
                }
            }
        }

        self.db.counts().await
    }

    /// Claim one batch and process it to completion
    ///
    /// Returns the number of jobs in the batch (0 if none were ready).
    pub async fn run_batch(&self) -> Result<usize> {
        let jobs = self
            .db
            .claim_batch(self.config.batch_size(), self.config.max_job_attempts)
            .await?;
        if jobs.is_empty() {
            return Ok(0);
        }

        let size = jobs.len();
        tracing::info!(batch_size = size, "Processing batch");

        let gate = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let pool = self.clone();
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    // The semaphore is never closed while the batch runs
                    let Ok(_permit) = gate.acquire_owned().await else {
                        return;
                    };
                    pool.process_job(job).await;
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Job task panicked");
            }
        }

        let counts = self.db.counts().await?;
        tracing::info!(
            done = counts.done,
            pending = counts.pending,
            failed = counts.failed,
            "Progress"
        );
        self.event_tx
            .send(Event::BatchFinished { size, counts })
            .ok();

        Ok(size)
    }
}
