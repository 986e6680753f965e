//! Custom test assertions for integration tests

use report_fetcher::{Event, JobStatus, ReportFetcher};
use std::time::Duration;
use tokio::sync::broadcast;

/// Wait for an event matching the predicate
///
/// Returns the matching event, or `None` on timeout or channel close.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: F,
) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Assert a job's ledger status
pub async fn assert_job_status(fetcher: &ReportFetcher, id: &str, expected: JobStatus) {
    let job = fetcher
        .db
        .get_job(&id.into())
        .await
        .expect("ledger query")
        .unwrap_or_else(|| panic!("job {id} not in ledger"));
    assert_eq!(
        job.status, expected,
        "job {id} should be {expected}, last error: {:?}",
        job.last_error
    );
}
