//! Bearer credential cache with rotation support
//!
//! The token is owned by an external process that rewrites it when it expires.
//! [`CredentialProvider`] keeps a read-only cache of the last token seen and
//! re-reads the source only when its modification marker changes.

use crate::types::Event;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Where the bearer token comes from
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    /// Cheap change marker for the token, `None` if the source does not exist
    async fn marker(&self) -> Result<Option<String>>;

    /// Read the current token, `None` if the source is missing or empty
    async fn read(&self) -> Result<Option<String>>;
}

/// Token stored in a text file and rewritten in place by an external process
///
/// The marker combines modification time and length.
pub struct FileCredentialSource {
    path: PathBuf,
}

impl FileCredentialSource {
    /// Create a source reading from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the token file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl CredentialSource for FileCredentialSource {
    async fn marker(&self) -> Result<Option<String>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        Ok(Some(format!("{}:{}", modified, metadata.len())))
    }

    async fn read(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// In-memory token for embedding applications and tests
///
/// Every [`rotate`](Self::rotate) bumps a counter used as the marker.
#[derive(Default)]
pub struct MemoryCredentialSource {
    state: Mutex<(Option<String>, u64)>,
}

impl MemoryCredentialSource {
    /// Create a source holding `token`
    pub fn new(token: Option<String>) -> Self {
        Self {
            state: Mutex::new((token, 0)),
        }
    }

    /// Replace the token
    pub fn rotate(&self, token: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.0 = Some(token.into());
        state.1 += 1;
    }
}

#[async_trait::async_trait]
impl CredentialSource for MemoryCredentialSource {
    async fn marker(&self) -> Result<Option<String>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Some(state.1.to_string()))
    }

    async fn read(&self) -> Result<Option<String>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.0.clone())
    }
}

#[derive(Default)]
struct CachedCredential {
    marker: Option<String>,
    token: Option<String>,
}

/// Lazily refreshed, read-only view of the current bearer token
pub struct CredentialProvider {
    source: Arc<dyn CredentialSource>,
    cache: Mutex<CachedCredential>,
    cancel: CancellationToken,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl CredentialProvider {
    /// Create a provider over `source`
    ///
    /// Rotation waits end early when `cancel` fires.
    pub fn new(source: Arc<dyn CredentialSource>, cancel: CancellationToken) -> Self {
        Self {
            source,
            cache: Mutex::new(CachedCredential::default()),
            cancel,
            event_tx: None,
        }
    }

    /// Emit [`Event::CredentialRotated`] on `event_tx` after each observed rotation
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Most recently observed token, or `None` if none was ever seen
    ///
    /// Checks the source's marker first and re-reads the token only when it
    /// changed. Source errors are logged and the cached token is returned.
    pub async fn get(&self) -> Option<String> {
        let marker = match self.source.marker().await {
            Ok(marker) => marker,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to check credential source");
                return self.cached_token();
            }
        };

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if marker.is_none() || cache.marker == marker {
                return cache.token.clone();
            }
        }

        match self.source.read().await {
            Ok(token) => {
                let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.marker = marker;
                if token.is_some() {
                    cache.token = token;
                }
                cache.token.clone()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read credential");
                self.cached_token()
            }
        }
    }

    /// Suspend until a token different from `previous` is observed
    ///
    /// Polls [`get`](Self::get) every `poll_interval`. There is no timeout:
    /// if the source never rotates this waits until shutdown, and then
    /// returns [`Error::ShuttingDown`].
    pub async fn wait_for_rotation(
        &self,
        previous: Option<&str>,
        poll_interval: Duration,
    ) -> Result<String> {
        tracing::info!("Credential rejected, waiting for rotation");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::ShuttingDown),
                _ = tokio::time::sleep(poll_interval) => {}
            }

            if let Some(token) = self.get().await
                && previous != Some(token.as_str())
            {
                tracing::info!("Observed rotated credential");
                if let Some(tx) = &self.event_tx {
                    tx.send(Event::CredentialRotated).ok();
                }
                return Ok(token);
            }
        }
    }

    fn cached_token(&self) -> Option<String> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .token
            .clone()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::SystemTime;
    use tempfile::TempDir;

    /// Wraps a source and counts full reads
    struct CountingSource {
        inner: MemoryCredentialSource,
        reads: AtomicU32,
    }

    #[async_trait::async_trait]
    impl CredentialSource for CountingSource {
        async fn marker(&self) -> Result<Option<String>> {
            self.inner.marker().await
        }

        async fn read(&self) -> Result<Option<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read().await
        }
    }

    fn write_token(path: &Path, token: &str, mtime_offset_secs: u64) {
        std::fs::write(path, token).unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(mtime_offset_secs))
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_rereads_only_when_marker_changes() {
        let source = Arc::new(CountingSource {
            inner: MemoryCredentialSource::new(Some("tok-1".to_string())),
            reads: AtomicU32::new(0),
        });
        let provider = CredentialProvider::new(source.clone(), CancellationToken::new());

        assert_eq!(provider.get().await.as_deref(), Some("tok-1"));
        assert_eq!(provider.get().await.as_deref(), Some("tok-1"));
        assert_eq!(provider.get().await.as_deref(), Some("tok-1"));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);

        source.inner.rotate("tok-2");
        assert_eq!(provider.get().await.as_deref(), Some("tok-2"));
        assert_eq!(provider.get().await.as_deref(), Some("tok-2"));
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_without_credential_returns_none() {
        let provider = CredentialProvider::new(
            Arc::new(MemoryCredentialSource::new(None)),
            CancellationToken::new(),
        );
        assert_eq!(provider.get().await, None);
    }

    #[tokio::test]
    async fn test_file_source_trims_and_tracks_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.txt");
        let provider = CredentialProvider::new(
            Arc::new(FileCredentialSource::new(&path)),
            CancellationToken::new(),
        );

        // Missing file: nothing observed yet
        assert_eq!(provider.get().await, None);

        write_token(&path, "  first-token\n", 0);
        assert_eq!(provider.get().await.as_deref(), Some("first-token"));

        write_token(&path, "second-token-longer\n", 5);
        assert_eq!(provider.get().await.as_deref(), Some("second-token-longer"));
    }

    #[tokio::test]
    async fn test_file_source_keeps_last_token_when_file_disappears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.txt");
        let provider = CredentialProvider::new(
            Arc::new(FileCredentialSource::new(&path)),
            CancellationToken::new(),
        );

        write_token(&path, "kept", 0);
        assert_eq!(provider.get().await.as_deref(), Some("kept"));

        std::fs::remove_file(&path).unwrap();
        assert_eq!(provider.get().await.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_file_source_empty_file_is_no_credential() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.txt");
        std::fs::write(&path, "   \n").unwrap();

        let source = FileCredentialSource::new(&path);
        assert_eq!(source.read().await.unwrap(), None);
        assert!(source.marker().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_wait_for_rotation_returns_new_token() {
        let source = Arc::new(MemoryCredentialSource::new(Some("old".to_string())));
        let (tx, mut rx) = broadcast::channel(8);
        let provider = CredentialProvider::new(source.clone(), CancellationToken::new())
            .with_events(tx);
        assert_eq!(provider.get().await.as_deref(), Some("old"));

        let rotator = {
            let source = source.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                source.rotate("new");
            })
        };

        let token = tokio::time::timeout(
            Duration::from_secs(5),
            provider.wait_for_rotation(Some("old"), Duration::from_millis(10)),
        )
        .await
        .expect("rotation wait should finish")
        .unwrap();

        assert_eq!(token, "new");
        assert_eq!(rx.recv().await.unwrap(), Event::CredentialRotated);
        rotator.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_rotation_ignores_rewrite_of_same_token() {
        let source = Arc::new(MemoryCredentialSource::new(Some("same".to_string())));
        let provider = CredentialProvider::new(source.clone(), CancellationToken::new());

        // Marker changes but the value does not
        source.rotate("same");

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            provider.wait_for_rotation(Some("same"), Duration::from_millis(10)),
        )
        .await;
        assert!(result.is_err(), "should still be waiting");
    }

    #[tokio::test]
    async fn test_wait_for_rotation_from_nothing() {
        let source = Arc::new(MemoryCredentialSource::new(None));
        let provider = CredentialProvider::new(source.clone(), CancellationToken::new());
        source.rotate("first");

        let token = provider
            .wait_for_rotation(None, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(token, "first");
    }

    #[tokio::test]
    async fn test_wait_for_rotation_is_cancellable() {
        let cancel = CancellationToken::new();
        let provider = CredentialProvider::new(
            Arc::new(MemoryCredentialSource::new(Some("stuck".to_string()))),
            cancel.clone(),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            provider.wait_for_rotation(Some("stuck"), Duration::from_millis(10)),
        )
        .await
        .expect("cancellation should end the wait");

        assert!(matches!(result, Err(Error::ShuttingDown)));
        canceller.await.unwrap();
    }
}
