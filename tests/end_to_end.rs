//! End-to-end tests: URL list in, reports and failure records out
//!
//! Every test runs the full fetcher against a local wiremock server, with the
//! URL list, token file and output root in a temporary directory.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use report_fetcher::{Event, FailureRecord, FetchStage, JobStatus, ReportFetcher};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_url_list_row_becomes_report_on_disk() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = fast_config(&dir, &server);
    config.worker.max_cycles = Some(2);
    write_token(&dir.path().join("token.txt"), "secret\n");
    write_url_list(&dir, &["https://host/reports/abc123"]);

    let payload = vec![0x25u8; 4096];
    Mock::given(method("GET"))
        .and(path("/reports/abc123"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({ "reportUrl": format!("{}/cdn/x.pdf", server.uri()) }),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/x.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = ReportFetcher::new(config).await.unwrap();
    let counts = tokio::time::timeout(Duration::from_secs(10), fetcher.run())
        .await
        .expect("run should stop after two cycles")
        .unwrap();

    assert_eq!(counts.done, 1);
    assert_eq!(counts.total(), 1);
    assert_job_status(&fetcher, "abc123", JobStatus::Done).await;

    let job = fetcher.db.get_job(&"abc123".into()).await.unwrap().unwrap();
    let artifact = job.artifact_path.unwrap();
    assert!(artifact.ends_with("reports/abc123.pdf"));
    assert_eq!(job.size_bytes, Some(payload.len() as u64));
    assert_eq!(std::fs::read(&artifact).unwrap(), payload);
    assert_eq!(job.metadata_status, Some(200));
    assert_eq!(job.content_status, Some(200));
}

#[tokio::test]
async fn test_rejected_token_waits_for_rotation() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = fast_config(&dir, &server);
    let token_path = dir.path().join("token.txt");
    write_token(&token_path, "old");
    write_url_list(&dir, &["https://host/reports/r9"]);

    Mock::given(method("GET"))
        .and(path("/reports/r9"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reports/r9"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({ "url": format!("{}/files/r9.json", server.uri()) }),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/r9.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let fetcher = ReportFetcher::new(config).await.unwrap();
    let mut events = fetcher.subscribe();
    let runner = {
        let fetcher = fetcher.clone();
        tokio::spawn(async move { fetcher.run().await })
    };

    // The job starts and stalls on the rejected token
    wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, Event::JobStarted { .. })
    })
    .await
    .expect("job should start");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_job_status(&fetcher, "r9", JobStatus::Pending).await;

    write_token(&token_path, "new");

    let completed = wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, Event::JobCompleted { .. })
    })
    .await
    .expect("job should complete after rotation");
    match completed {
        Event::JobCompleted { id, size_bytes, .. } => {
            assert_eq!(id, "r9");
            assert_eq!(size_bytes, 2);
        }
        other => panic!("unexpected event {other:?}"),
    }

    fetcher.shutdown();
    let counts = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(counts.done, 1);

    let job = fetcher.db.get_job(&"r9".into()).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
    assert_eq!(
        fetcher.current_credential().await.as_deref(),
        Some("new")
    );
}

#[tokio::test]
async fn test_failing_job_writes_failure_record_and_stops_at_cap() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = fast_config(&dir, &server);
    config.retry.max_attempts = 2;
    config.worker.max_job_attempts = 2;
    config.worker.max_cycles = Some(4);
    write_token(&dir.path().join("token.txt"), "secret");
    write_url_list(&dir, &["https://host/reports/bad", "https://host/reports/good"]);

    Mock::given(method("GET"))
        .and(path("/reports/bad"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reports/good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({ "reportUrl": format!("{}/files/good", server.uri()) }),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/good"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let fetcher = ReportFetcher::new(config).await.unwrap();
    let counts = tokio::time::timeout(Duration::from_secs(10), fetcher.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(counts.done, 1);
    assert_eq!(counts.failed, 1);
    assert_job_status(&fetcher, "good", JobStatus::Done).await;
    assert_job_status(&fetcher, "bad", JobStatus::Failed).await;

    let bad = fetcher.db.get_job(&"bad".into()).await.unwrap().unwrap();
    assert_eq!(bad.attempts, 2);
    assert_eq!(bad.metadata_status, Some(503));

    // Defaults to json when the content URL has no extension
    let good = fetcher.db.get_job(&"good".into()).await.unwrap().unwrap();
    assert!(good.artifact_path.unwrap().ends_with("reports/good.json"));

    let raw = std::fs::read_to_string(fetcher.artifacts().errors_dir().join("bad.json")).unwrap();
    let record: FailureRecord = serde_json::from_str(&raw).unwrap();
    assert_eq!(record.stage, FetchStage::Metadata);
    assert_eq!(record.status_code, Some(503));
    assert_eq!(record.body.as_deref(), Some("maintenance"));
}
