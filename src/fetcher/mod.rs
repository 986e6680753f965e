//! Top-level fetcher wiring the ledger, credential cache, HTTP client, worker
//! pool and ingest feed together.
//!
//! - [`lifecycle`] - Running until completion or shutdown

mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::credentials::{CredentialProvider, CredentialSource, FileCredentialSource};
use crate::db::Database;
use crate::error::Result;
use crate::fetch::FetchClient;
use crate::pool::WorkerPool;
use crate::types::Event;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Report fetcher instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ReportFetcher {
    /// Job ledger (public for inspection by embedding applications and tests)
    pub db: Arc<Database>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Cached bearer credential
    pub(crate) credentials: Arc<CredentialProvider>,
    /// Report and failure record output
    pub(crate) artifacts: Arc<ArtifactStore>,
    /// Scheduler over the ledger
    pub(crate) pool: WorkerPool,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Shutdown signal shared by the pool, the ingest feed and credential waits
    pub(crate) cancel: CancellationToken,
}

impl ReportFetcher {
    /// Create a fetcher reading its token from `config.credentials.token_file`
    pub async fn new(config: Config) -> Result<Self> {
        let source = Arc::new(FileCredentialSource::new(
            config.credentials.token_file.clone(),
        ));
        Self::with_credential_source(config, source).await
    }

    /// Create a fetcher with a custom credential source
    ///
    /// Validates the configuration, creates the output directories and opens
    /// (or creates) the ledger.
    pub async fn with_credential_source(
        config: Config,
        source: Arc<dyn CredentialSource>,
    ) -> Result<Self> {
        config.validate()?;

        let artifacts = Arc::new(ArtifactStore::new(
            config.storage.output_root.clone(),
            config.storage.fallback_extension.clone(),
        ));
        artifacts.ensure_dirs().await?;

        let db_path = config.storage.database_path();
        let db = Arc::new(Database::new(&db_path).await?);
        tracing::info!(path = %db_path.display(), "Opened job ledger");

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let credentials = Arc::new(
            CredentialProvider::new(source, cancel.clone()).with_events(event_tx.clone()),
        );

        let client = FetchClient::new(
            config.fetch.clone(),
            config.retry.clone(),
            Arc::clone(&credentials),
            config.credentials.poll_interval,
        )?;

        let pool = WorkerPool::new(
            Arc::clone(&db),
            Arc::new(client),
            Arc::clone(&artifacts),
            config.worker.clone(),
            config.fetch.error_body_limit,
            event_tx.clone(),
            cancel.clone(),
        );

        Ok(Self {
            db,
            config: Arc::new(config),
            credentials,
            artifacts,
            pool,
            event_tx,
            cancel,
        })
    }

    /// Subscribe to fetcher events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Output locations for reports and failure records
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Current bearer credential, if one has been observed
    pub async fn current_credential(&self) -> Option<String> {
        self.credentials.get().await
    }
}
