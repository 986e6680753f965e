//! On-disk output: fetched reports and failure records
//!
//! Layout under the output root:
//! - `reports/<id>.<ext>` holds one payload per finished job
//! - `errors/<id>.json` holds the most recent terminal failure of a job

use crate::error::FetchError;
use crate::types::{FetchStage, JobId};
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

#[allow(clippy::expect_used)]
static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.([A-Za-z0-9]{1,5})$").expect("extension regex is valid"));

/// Structured record written for each failed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Failure message
    pub error: String,
    /// Stage that failed
    pub stage: FetchStage,
    /// Last HTTP status, if a response was received
    pub status_code: Option<u16>,
    /// Response body, truncated
    pub body: Option<String>,
    /// Unix time in seconds
    pub time: f64,
}

impl FailureRecord {
    /// Build a record from a fetch failure, keeping at most `body_limit` characters of body
    pub fn from_fetch_error(err: &FetchError, body_limit: usize) -> Self {
        Self {
            error: err.to_string(),
            stage: err.stage(),
            status_code: err.status_code(),
            body: err
                .response_body()
                .filter(|b| !b.is_empty())
                .map(|b| truncate_chars(b, body_limit)),
            time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default(),
        }
    }
}

/// Writer for report payloads and failure records
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    fallback_extension: String,
}

impl ArtifactStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>, fallback_extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            fallback_extension: fallback_extension.into(),
        }
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding report payloads
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    /// Directory holding failure records
    pub fn errors_dir(&self) -> PathBuf {
        self.root.join("errors")
    }

    /// Create `reports/` and `errors/`
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.reports_dir(), self.errors_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| Error::Artifact { path: dir, source })?;
        }
        Ok(())
    }

    /// Final path of the payload for `id` fetched from `content_url`
    pub fn report_path(&self, id: &JobId, content_url: &str) -> PathBuf {
        let ext = infer_extension(content_url, &self.fallback_extension);
        self.reports_dir().join(format!("{}.{}", file_stem(id), ext))
    }

    /// Persist a payload and return its path and exact size
    ///
    /// The bytes go to a `.part` file first and are renamed into place, so an
    /// interrupted write never leaves a truncated file under the final name.
    pub async fn write_report(
        &self,
        id: &JobId,
        content_url: &str,
        bytes: &[u8],
    ) -> Result<(PathBuf, u64)> {
        let path = self.report_path(id, content_url);
        let mut part = path.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        tokio::fs::write(&part, bytes)
            .await
            .map_err(|source| Error::Artifact {
                path: part.clone(),
                source,
            })?;
        tokio::fs::rename(&part, &path)
            .await
            .map_err(|source| Error::Artifact {
                path: path.clone(),
                source,
            })?;

        Ok((path, bytes.len() as u64))
    }

    /// Write `errors/<id>.json`, replacing any earlier record for the job
    pub async fn write_failure(&self, id: &JobId, record: &FailureRecord) -> Result<PathBuf> {
        let path = self.errors_dir().join(format!("{}.json", file_stem(id)));
        let json = serde_json::to_vec_pretty(record)?;

        tokio::fs::write(&path, json)
            .await
            .map_err(|source| Error::Artifact {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }
}

/// Extension for a payload fetched from `content_url`
///
/// Uses the last path segment's suffix of 1-5 ASCII alphanumerics, lower-cased.
/// Query strings and fragments are ignored. Falls back to `fallback` otherwise.
pub fn infer_extension(content_url: &str, fallback: &str) -> String {
    let path = match url::Url::parse(content_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => content_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let last_segment = path.rsplit('/').next().unwrap_or_default();

    EXTENSION_RE
        .captures(last_segment)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| fallback.trim_start_matches('.').to_string())
}

/// Job ids come from URLs; keep them from escaping the output directory
fn file_stem(id: &JobId) -> String {
    id.as_str()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect()
}

fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
