//! Processing of a single claimed job

use crate::artifacts::FailureRecord;
use crate::error::FetchError;
use crate::types::{Event, FetchStage, Job, JobOutcome};

use super::WorkerPool;

impl WorkerPool {
    /// Count the attempt, fetch, persist the outcome
    ///
    /// Failures are recorded in the ledger and as a failure record; nothing
    /// here propagates, so one job cannot abort its batch.
    pub(super) async fn process_job(&self, job: Job) {
        let id = job.id.clone();

        let attempt = match self.db.record_attempt_start(&id).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to record attempt start");
                return;
            }
        };
        tracing::debug!(job_id = %id, attempt, "Job attempt started");
        self.event_tx
            .send(Event::JobStarted {
                id: id.clone(),
                attempt,
            })
            .ok();

        let report = match self.fetcher.fetch_job(&job).await {
            Ok(report) => report,
            Err(err) => {
                self.record_fetch_failure(&job, attempt, &err).await;
                return;
            }
        };

        match self
            .artifacts
            .write_report(&id, &report.content_url, &report.bytes)
            .await
        {
            Ok((path, size_bytes)) => {
                let outcome = JobOutcome::Done {
                    metadata_status: report.metadata_status,
                    content_status: report.content_status,
                    artifact_path: path.clone(),
                    size_bytes,
                };
                if let Err(e) = self.db.record_result(&id, &outcome).await {
                    tracing::error!(job_id = %id, error = %e, "Failed to record job result");
                    return;
                }

                tracing::info!(job_id = %id, path = %path.display(), size_bytes, "Report saved");
                self.event_tx
                    .send(Event::JobCompleted {
                        id,
                        path,
                        size_bytes,
                    })
                    .ok();
            }
            Err(e) => {
                let error = e.to_string();
                let outcome = JobOutcome::Failed {
                    stage: FetchStage::Content,
                    metadata_status: Some(report.metadata_status),
                    content_status: Some(report.content_status),
                    error: error.clone(),
                };
                let record = FailureRecord {
                    error,
                    stage: FetchStage::Content,
                    status_code: Some(report.content_status),
                    body: None,
                    time: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
                };
                self.record_failure(&job, attempt, outcome, &record).await;
            }
        }
    }

    async fn record_fetch_failure(&self, job: &Job, attempt: u32, err: &FetchError) {
        let stage = err.stage();
        // A content-stage failure means the metadata stage returned 200
        let (metadata_status, content_status) = match stage {
            FetchStage::Metadata => (err.status_code(), None),
            FetchStage::Content => (Some(200), err.status_code()),
        };
        let outcome = JobOutcome::Failed {
            stage,
            metadata_status,
            content_status,
            error: err.to_string(),
        };
        let record = FailureRecord::from_fetch_error(err, self.error_body_limit);

        self.record_failure(job, attempt, outcome, &record).await;
    }

    async fn record_failure(
        &self,
        job: &Job,
        attempt: u32,
        outcome: JobOutcome,
        record: &FailureRecord,
    ) {
        let id = &job.id;

        if let Err(e) = self.db.record_result(id, &outcome).await {
            tracing::error!(job_id = %id, error = %e, "Failed to record job result");
        }
        if let Err(e) = self.artifacts.write_failure(id, record).await {
            tracing::error!(job_id = %id, error = %e, "Failed to write failure record");
        }

        let exhausted = attempt >= self.config.max_job_attempts;
        tracing::warn!(
            job_id = %id,
            stage = %record.stage,
            status = ?record.status_code,
            attempt,
            exhausted,
            error = %record.error,
            "Job attempt failed"
        );

        self.event_tx
            .send(Event::JobFailed {
                id: id.clone(),
                stage: record.stage,
                status: record.status_code,
                error: record.error.clone(),
            })
            .ok();
    }
}
