//! Test fixtures: configuration, URL lists and token files

use report_fetcher::Config;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

/// Configuration pointed at `server`, with fast retries and all paths under `dir`
pub fn fast_config(dir: &TempDir, server: &MockServer) -> Config {
    let mut config = Config::default();
    config.fetch.metadata_base_url = format!("{}/reports/", server.uri());
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = Duration::ZERO;
    config.worker.concurrency = 4;
    config.worker.idle_interval = Duration::from_millis(10);
    config.credentials.token_file = dir.path().join("token.txt");
    config.credentials.poll_interval = Duration::from_millis(10);
    config.ingest.url_list = dir.path().join("urls.csv");
    config.ingest.scan_interval = Duration::from_millis(20);
    config.ingest.watch = false;
    config.storage.output_root = dir.path().join("all_downloads");
    config
}

/// Write the URL list, one URL per row
pub fn write_url_list(dir: &TempDir, urls: &[&str]) {
    let mut contents = urls.join("\n");
    contents.push('\n');
    std::fs::write(dir.path().join("urls.csv"), contents).expect("write URL list");
}

/// Replace the token file, bumping its modification time so the change is observed
pub fn write_token(path: &Path, token: &str) {
    std::fs::write(path, token).expect("write token");
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .expect("open token");
    let modified = std::time::SystemTime::now() + Duration::from_secs(1);
    file.set_modified(modified).expect("set token mtime");
}
