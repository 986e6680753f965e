use super::*;
use crate::Error;
use crate::credentials::MemoryCredentialSource;
use crate::types::JobStatus;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(dir: &TempDir, base_url: &str) -> Config {
    let mut config = Config::default();
    config.fetch.metadata_base_url = base_url.to_string();
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.jitter = Duration::ZERO;
    config.worker.idle_interval = Duration::from_millis(10);
    config.worker.concurrency = 4;
    config.credentials.poll_interval = Duration::from_millis(10);
    config.ingest.url_list = dir.path().join("urls.csv");
    config.ingest.scan_interval = Duration::from_millis(20);
    config.ingest.watch = false;
    config.storage.output_root = dir.path().join("out");
    config
}

fn memory_source(token: &str) -> Arc<MemoryCredentialSource> {
    Arc::new(MemoryCredentialSource::new(Some(token.to_string())))
}

#[tokio::test]
async fn test_new_creates_output_layout() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "http://127.0.0.1:1/reports/");

    let fetcher = ReportFetcher::with_credential_source(config, memory_source("t"))
        .await
        .unwrap();

    let out = dir.path().join("out");
    assert!(out.join("reports").is_dir());
    assert!(out.join("errors").is_dir());
    assert!(out.join("jobs.db").is_file());
    assert_eq!(fetcher.artifacts().root(), out.as_path());
    assert_eq!(fetcher.current_credential().await.as_deref(), Some("t"));
}

#[tokio::test]
async fn test_new_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "http://127.0.0.1:1/reports/");
    config.worker.concurrency = 0;

    let result = ReportFetcher::with_credential_source(config, memory_source("t")).await;
    match result {
        Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("worker.concurrency")),
        Err(other) => panic!("expected config error, got {other:?}"),
        Ok(_) => panic!("expected config error"),
    }
}

#[tokio::test]
async fn test_new_reads_token_file() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "http://127.0.0.1:1/reports/");
    config.credentials.token_file = dir.path().join("token.txt");
    std::fs::write(dir.path().join("token.txt"), "from-file\n").unwrap();

    let fetcher = ReportFetcher::new(config).await.unwrap();
    assert_eq!(
        fetcher.current_credential().await.as_deref(),
        Some("from-file")
    );
}

#[tokio::test]
async fn test_run_ingests_and_fetches() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, &format!("{}/reports/", server.uri()));
    config.worker.max_cycles = Some(2);

    Mock::given(method("GET"))
        .and(path("/reports/r1"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({ "reportUrl": format!("{}/files/r1.csv", server.uri()) }),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/r1.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
        .expect(1)
        .mount(&server)
        .await;

    std::fs::write(
        dir.path().join("urls.csv"),
        "https://host/reports/r1\nhttps://host/reports/r1\n",
    )
    .unwrap();

    let fetcher = ReportFetcher::with_credential_source(config, memory_source("secret"))
        .await
        .unwrap();
    let mut events = fetcher.subscribe();

    let counts = tokio::time::timeout(Duration::from_secs(10), fetcher.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(counts.done, 1);
    assert_eq!(counts.total(), 1);

    let job = fetcher.db.get_job(&"r1".into()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.size_bytes, Some(8));
    assert!(job.artifact_path.unwrap().ends_with("reports/r1.csv"));

    assert_eq!(events.recv().await.unwrap(), Event::JobsIngested { count: 1 });
}

#[tokio::test]
async fn test_shutdown_stops_idle_run() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "http://127.0.0.1:1/reports/");
    config.worker.idle_interval = Duration::from_secs(3600);

    let fetcher = ReportFetcher::with_credential_source(config, memory_source("t"))
        .await
        .unwrap();

    let runner = {
        let fetcher = fetcher.clone();
        tokio::spawn(async move { fetcher.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!fetcher.is_shutting_down());

    fetcher.shutdown();
    assert!(fetcher.is_shutting_down());

    let counts = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run should return after shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(counts.total(), 0);
}
