//! URL list ingestion
//!
//! An external process appends report URLs to a CSV list file.
//! [`IngestFeed`] rescans that file on an interval (and on file-change events
//! when watching is enabled), derives a job id from each URL's final path
//! segment and enqueues it. Enqueueing is idempotent, so rescans are safe.

use crate::config::IngestConfig;
use crate::db::Database;
use crate::types::{Event, JobId};
use crate::{Error, Result};
use csv::StringRecord;
use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Derive a job id from the final non-empty path segment of `url`
///
/// Query strings and fragments are ignored and the segment is percent-decoded.
/// Strings that are not absolute URLs are treated as bare paths.
pub fn derive_job_id(url: &str) -> Option<JobId> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    let segment = path.split('/').rfind(|s| !s.trim().is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let id = decoded.trim();

    (!id.is_empty()).then(|| JobId::new(id))
}

/// URL cell of a parsed row, trimmed; `None` if the column is missing or blank
fn url_cell(record: &StringRecord, column: usize) -> Option<String> {
    let cell = record.get(column)?.trim();
    (!cell.is_empty()).then(|| cell.to_string())
}

/// Rows read from the unconsumed part of the URL list
#[derive(Debug, Default)]
struct ParsedRows {
    /// URL cells of terminated rows, in file order
    urls: Vec<String>,
    /// Bytes covered by terminated rows
    consumed: usize,
    /// Raw text and URL cell of a last row still missing its line terminator
    tail: Option<(String, Option<String>)>,
}

/// Parse CSV rows (quoted fields, doubled quotes, CRLF or LF terminators)
fn parse_rows(unread: &[u8], column: usize) -> ParsedRows {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(unread);
    let mut record = StringRecord::new();
    let mut parsed = ParsedRows::default();

    loop {
        let start = reader.position().byte() as usize;
        let url = match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => url_cell(&record, column),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable URL list row");
                None
            }
        };
        let end = (reader.position().byte() as usize).min(unread.len());
        if end <= start {
            break;
        }

        let terminated = end < unread.len() || matches!(unread.last(), Some(b'\n' | b'\r'));
        if terminated {
            parsed.consumed = end;
            parsed.urls.extend(url);
        } else {
            let raw = String::from_utf8_lossy(&unread[start..end]).trim().to_string();
            parsed.tail = Some((raw, url));
        }
    }

    parsed
}

/// Incremental reader of the URL list
pub struct IngestFeed {
    db: Arc<Database>,
    config: IngestConfig,
    /// Bytes of terminated rows already processed
    consumed_bytes: usize,
    /// Unterminated last row seen by the previous scan
    unterminated: Option<String>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl IngestFeed {
    /// Create a feed reading `config.url_list` into `db`
    pub fn new(db: Arc<Database>, config: IngestConfig) -> Self {
        Self {
            db,
            config,
            consumed_bytes: 0,
            unterminated: None,
            event_tx: None,
        }
    }

    /// Emit [`Event::JobsIngested`] on `event_tx` after scans that added jobs
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Read rows appended since the last scan and enqueue their ids
    ///
    /// A missing list file is not an error. If the file shrank since the last
    /// scan it is read again from the top.
    ///
    /// A last row without a line terminator may still be mid-write. It is
    /// enqueued only once two consecutive scans see it unchanged, and it is
    /// never counted as consumed, so the completed row is read again. A writer
    /// that stalls mid-row for a whole scan interval can still leave a job
    /// for the truncated URL.
    ///
    /// Returns the number of jobs newly added to the ledger.
    pub async fn scan(&mut self) -> Result<usize> {
        let bytes = match tokio::fs::read(&self.config.url_list).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.config.url_list.display(), "URL list not found yet");
                return Ok(0);
            }
            Err(e) => {
                return Err(Error::Ingest(format!(
                    "failed to read {}: {}",
                    self.config.url_list.display(),
                    e
                )));
            }
        };

        if bytes.len() < self.consumed_bytes {
            info!(
                previous = self.consumed_bytes,
                now = bytes.len(),
                "URL list shrank, rescanning from the top"
            );
            self.consumed_bytes = 0;
            self.unterminated = None;
        }

        let parsed = parse_rows(&bytes[self.consumed_bytes..], self.config.url_column);
        self.consumed_bytes += parsed.consumed;

        let mut urls = parsed.urls;
        match parsed.tail {
            Some((raw, url)) => {
                if self.unterminated.as_deref() == Some(raw.as_str()) {
                    urls.extend(url);
                } else {
                    debug!(row = %raw, "Waiting for the last URL list row to settle");
                }
                self.unterminated = Some(raw);
            }
            None => self.unterminated = None,
        }

        let mut seen = HashSet::new();
        let mut added = 0;
        for url in urls {
            if !seen.insert(url.clone()) {
                continue;
            }
            let Some(id) = derive_job_id(&url) else {
                debug!(url = %url, "Skipping row without an id segment");
                continue;
            };
            if self.db.enqueue_if_absent(&id, &url).await? {
                added += 1;
            }
        }

        if added > 0 {
            info!(added, "Added new jobs from URL list");
            if let Some(tx) = &self.event_tx {
                tx.send(Event::JobsIngested { count: added }).ok();
            }
        }

        Ok(added)
    }

    /// Scan on an interval, and on file-change events when watching is enabled,
    /// until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Keeps the channel open when no watcher holds a sender
        let _tx_keepalive = tx.clone();
        let _watcher = if self.config.watch {
            match self.start_watcher(tx) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "File watching unavailable, falling back to interval scans");
                    None
                }
            }
        } else {
            None
        };

        let list_name = self.config.url_list.file_name().map(|n| n.to_os_string());
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(path = %self.config.url_list.display(), "Ingest feed started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
                Some(event) = rx.recv() => {
                    match event {
                        Ok(event) => {
                            let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                                && event
                                    .paths
                                    .iter()
                                    .any(|p| p.file_name().map(|n| n.to_os_string()) == list_name);
                            if !relevant {
                                continue;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "File watcher error");
                            continue;
                        }
                    }
                }
            }

            if let Err(e) = self.scan().await {
                error!(error = %e, "URL list scan failed");
            }
        }

        info!("Ingest feed stopped");
    }

    /// Watch the list's directory; the file itself may not exist yet or may be replaced
    fn start_watcher(
        &self,
        tx: mpsc::UnboundedSender<notify::Result<notify::Event>>,
    ) -> Result<RecommendedWatcher> {
        let dir = match self.config.url_list.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if let Err(e) = tx.send(res) {
                    error!("Failed to send filesystem event: {}", e);
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::Ingest(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Ingest(format!("failed to watch {}: {}", dir.display(), e)))?;

        Ok(watcher)
    }
}
