//! Configuration types for report-fetcher

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Metadata and content endpoint settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Per-stage retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker pool sizing and job attempt cap
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Bearer credential source
    #[serde(default)]
    pub credentials: CredentialConfig,

    /// URL list ingestion
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Ledger and artifact locations
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Metadata and content endpoint configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Metadata endpoint base; the job id is appended as the final path segment
    #[serde(default = "default_metadata_base_url")]
    pub metadata_base_url: String,

    /// Field names checked, in order, for the content location in the metadata body
    #[serde(default = "default_content_location_fields")]
    pub content_location_fields: Vec<String>,

    /// Attach the bearer credential to content requests too (default: false)
    #[serde(default)]
    pub auth_content_requests: bool,

    /// Timeout for a single HTTP request (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_ms_serde")]
    pub request_timeout: Duration,

    /// Maximum number of response body characters kept in failure records (default: 1000)
    #[serde(default = "default_error_body_limit")]
    pub error_body_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            metadata_base_url: default_metadata_base_url(),
            content_location_fields: default_content_location_fields(),
            auth_content_requests: false,
            request_timeout: default_request_timeout(),
            error_body_limit: default_error_body_limit(),
        }
    }
}

/// Retry behavior for transient failures within one fetch stage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of requests per stage (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed request (default: 1.5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Maximum delay between requests (default: 120 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Upper bound of the random delay added to each backoff (default: 250ms, zero disables)
    #[serde(default = "default_jitter", with = "duration_ms_serde")]
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of jobs fetched concurrently (default: 24)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Batch size as a multiple of `concurrency` (default: 4)
    #[serde(default = "default_batch_multiplier")]
    pub batch_multiplier: usize,

    /// Sleep between claims when no job is ready (default: 5 seconds)
    #[serde(default = "default_idle_interval", with = "duration_ms_serde")]
    pub idle_interval: Duration,

    /// Attempts after which a job is no longer claimed (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_job_attempts: u32,

    /// Stop after this many claim cycles (None = run until cancelled)
    #[serde(default)]
    pub max_cycles: Option<u64>,
}

impl WorkerConfig {
    /// Number of jobs claimed per batch
    pub fn batch_size(&self) -> usize {
        self.concurrency.saturating_mul(self.batch_multiplier).max(1)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_multiplier: default_batch_multiplier(),
            idle_interval: default_idle_interval(),
            max_job_attempts: default_max_attempts(),
            max_cycles: None,
        }
    }
}

/// Bearer credential configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// File holding the current token, rewritten by an external process
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    /// How often to re-check the token while waiting for rotation (default: 3 seconds)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub poll_interval: Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// URL list ingestion configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Append-only list of source URLs, one row per URL
    #[serde(default = "default_url_list")]
    pub url_list: PathBuf,

    /// Zero-based column holding the URL
    #[serde(default)]
    pub url_column: usize,

    /// Interval between rescans (default: 10 seconds)
    #[serde(default = "default_scan_interval", with = "duration_ms_serde")]
    pub scan_interval: Duration,

    /// Also rescan when the file changes on disk (default: true)
    #[serde(default = "default_true")]
    pub watch: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url_list: default_url_list(),
            url_column: 0,
            scan_interval: default_scan_interval(),
            watch: true,
        }
    }
}

/// Ledger and artifact storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for `reports/` and `errors/` (default: "all_downloads")
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Ledger path (default: `<output_root>/jobs.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Extension used when the content URL has none (default: "json")
    #[serde(default = "default_fallback_extension")]
    pub fallback_extension: String,
}

impl StorageConfig {
    /// Resolved ledger path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.output_root.join("jobs.db"))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            database_path: None,
            fallback_extension: default_fallback_extension(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Reject settings the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(Error::config(
                "worker.concurrency",
                "concurrency must be at least 1",
            ));
        }
        if self.worker.max_job_attempts == 0 {
            return Err(Error::config(
                "worker.max_job_attempts",
                "job attempt cap must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "stage attempt cap must be at least 1",
            ));
        }
        if self.fetch.content_location_fields.is_empty() {
            return Err(Error::config(
                "fetch.content_location_fields",
                "at least one content location field name is required",
            ));
        }
        url::Url::parse(&self.fetch.metadata_base_url).map_err(|e| {
            Error::config(
                "fetch.metadata_base_url",
                format!("invalid URL '{}': {}", self.fetch.metadata_base_url, e),
            )
        })?;
        Ok(())
    }
}

// Default value functions
fn default_metadata_base_url() -> String {
    "http://localhost:8080/reports/".to_string()
}

fn default_content_location_fields() -> Vec<String> {
    ["reportUrl", "ReportUrl", "report_url", "url"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_error_body_limit() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(1500)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_jitter() -> Duration {
    Duration::from_millis(250)
}

fn default_concurrency() -> usize {
    24
}

fn default_batch_multiplier() -> usize {
    4
}

fn default_idle_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.txt")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_url_list() -> PathBuf {
    PathBuf::from("updating_urls.csv")
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_output_root() -> PathBuf {
    PathBuf::from("all_downloads")
}

fn default_fallback_extension() -> String {
    "json".to_string()
}

// Duration serialization helper (integer milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");

        assert_eq!(config.worker.concurrency, 24);
        assert_eq!(config.worker.batch_size(), 96);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(1500));
        assert_eq!(config.worker.max_job_attempts, 5);
        assert_eq!(config.storage.fallback_extension, "json");
        assert!(!config.fetch.auth_content_requests);
        assert_eq!(
            config.fetch.content_location_fields[0], "reportUrl",
            "reportUrl is checked first"
        );
    }

    #[test]
    fn durations_round_trip_as_milliseconds() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(250),
            ..RetryConfig::default()
        };

        let json = serde_json::to_value(&config).expect("serialize failed");
        assert_eq!(json["initial_delay"], 250);

        let parsed: RetryConfig =
            serde_json::from_value(serde_json::json!({"initial_delay": 40, "jitter": 0}))
                .expect("deserialize failed");
        assert_eq!(parsed.initial_delay, Duration::from_millis(40));
        assert_eq!(parsed.jitter, Duration::ZERO);
        assert_eq!(parsed.max_attempts, 5);
    }

    #[test]
    fn database_path_defaults_under_output_root() {
        let storage = StorageConfig {
            output_root: PathBuf::from("/data/out"),
            ..StorageConfig::default()
        };
        assert_eq!(storage.database_path(), PathBuf::from("/data/out/jobs.db"));

        let explicit = StorageConfig {
            database_path: Some(PathBuf::from("/var/ledger.db")),
            ..StorageConfig::default()
        };
        assert_eq!(explicit.database_path(), PathBuf::from("/var/ledger.db"));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.worker.concurrency = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("worker.concurrency"));
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn validate_rejects_bad_base_url_and_empty_fields() {
        let mut config = Config::default();
        config.fetch.metadata_base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetch.content_location_fields.clear();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn from_json_file_reads_nested_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"worker": {"concurrency": 3, "max_cycles": 2}, "fetch": {"metadata_base_url": "https://api.example.com/reports/"}}"#,
        )
        .unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.worker.concurrency, 3);
        assert_eq!(config.worker.max_cycles, Some(2));
        assert_eq!(config.worker.batch_size(), 12);
        assert_eq!(
            config.fetch.metadata_base_url,
            "https://api.example.com/reports/"
        );
    }
}
