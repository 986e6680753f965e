//! Two-stage report retrieval
//!
//! Stage A (metadata) GETs `{metadata_base_url}{id}` with the bearer
//! credential and expects a JSON object naming the content location in one of
//! the configured fields. Stage B (content) GETs that location and returns the
//! raw bytes. A Stage A failure short-circuits the job.
//!
//! Both stages share the retry loop in [`stage`](self::stage).

use crate::config::{FetchConfig, RetryConfig};
use crate::credentials::CredentialProvider;
use crate::error::FetchError;
use crate::retry::{StatusClass, classify_status};
use crate::types::{FetchStage, JobId};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

mod stage;


/// Payload and statuses of a successful two-stage fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedReport {
    /// Content location named by the metadata document
    pub content_url: String,
    /// Raw content bytes
    pub bytes: Vec<u8>,
    /// Final metadata stage status (200)
    pub metadata_status: u16,
    /// Final content stage status (200)
    pub content_status: u16,
}

/// HTTP client for the metadata and content endpoints
pub struct FetchClient {
    http: reqwest::Client,
    config: FetchConfig,
    retry: RetryConfig,
    credentials: Arc<CredentialProvider>,
    rotation_poll: Duration,
}

impl FetchClient {
    /// Build a client with the configured request timeout
    pub fn new(
        config: FetchConfig,
        retry: RetryConfig,
        credentials: Arc<CredentialProvider>,
        rotation_poll: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("report-fetcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            http,
            config,
            retry,
            credentials,
            rotation_poll,
        })
    }

    /// Run both stages for `id`
    ///
    /// The returned error's [`stage`](FetchError::stage) tells which stage
    /// failed; a content-stage failure implies the metadata stage returned 200.
    pub async fn fetch(&self, id: &JobId) -> std::result::Result<FetchedReport, FetchError> {
        let metadata_url = self.metadata_url(id);
        tracing::debug!(job_id = %id, url = %metadata_url, "Fetching metadata");

        let content_url = self
            .run_stage(FetchStage::Metadata, true, |token| {
                self.request_metadata(&metadata_url, token)
            })
            .await?;

        tracing::debug!(job_id = %id, url = %content_url, "Fetching content");

        let auth = self.config.auth_content_requests;
        let bytes = self
            .run_stage(FetchStage::Content, auth, |token| {
                self.request_content(&content_url, token)
            })
            .await?;

        Ok(FetchedReport {
            content_url,
            bytes,
            metadata_status: 200,
            content_status: 200,
        })
    }

    /// Metadata endpoint for `id`
    pub fn metadata_url(&self, id: &JobId) -> String {
        let base = &self.config.metadata_base_url;
        let id = urlencoding::encode(id.as_str());
        if base.ends_with('/') {
            format!("{base}{id}")
        } else {
            format!("{base}/{id}")
        }
    }

    /// One Stage A request
    async fn request_metadata(
        &self,
        url: &str,
        token: Option<String>,
    ) -> std::result::Result<String, FetchError> {
        let stage = FetchStage::Metadata;
        let response = self.send(stage, url, token.as_deref()).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| FetchError::Transport {
            stage,
            message: format!("failed to read body: {e}"),
        })?;

        if status != 200 {
            return Err(status_error(stage, status, Some(body), true));
        }

        self.extract_content_url(&body)
            .map_err(|reason| FetchError::MalformedResponse {
                stage,
                reason,
                body: Some(body),
            })
    }

    /// One Stage B request
    async fn request_content(
        &self,
        url: &str,
        token: Option<String>,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        let stage = FetchStage::Content;
        let response = self.send(stage, url, token.as_deref()).await?;
        let status = response.status().as_u16();

        if status != 200 {
            let body = response.text().await.ok();
            return Err(status_error(
                stage,
                status,
                body,
                self.config.auth_content_requests,
            ));
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
            stage,
            message: format!("failed to read body: {e}"),
        })?;
        Ok(bytes.to_vec())
    }

    async fn send(
        &self,
        stage: FetchStage,
        url: &str,
        token: Option<&str>,
    ) -> std::result::Result<reqwest::Response, FetchError> {
        let mut request = self.http.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        request.send().await.map_err(|e| FetchError::Transport {
            stage,
            message: e.to_string(),
        })
    }

    /// First configured field holding a usable absolute URL
    fn extract_content_url(&self, body: &str) -> std::result::Result<String, String> {
        let document: serde_json::Value =
            serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
        let object = document
            .as_object()
            .ok_or_else(|| "metadata is not a JSON object".to_string())?;

        let location = self
            .config
            .content_location_fields
            .iter()
            .find_map(|field| {
                object
                    .get(field)
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            })
            .ok_or_else(|| {
                format!(
                    "no content location in fields {:?}",
                    self.config.content_location_fields
                )
            })?;

        url::Url::parse(location)
            .map(|_| location.to_string())
            .map_err(|e| format!("content location {location:?} is not a URL: {e}"))
    }
}

/// Map a non-200 status to the failure the stage loop reacts to
///
/// A 401/403 only means an expired credential when one was sent.
fn status_error(
    stage: FetchStage,
    status: u16,
    body: Option<String>,
    authenticated: bool,
) -> FetchError {
    match classify_status(status) {
        StatusClass::Transient => FetchError::TransientServer {
            stage,
            status,
            body,
        },
        StatusClass::AuthExpired if authenticated => FetchError::AuthExpired { stage, status },
        StatusClass::AuthExpired | StatusClass::Other | StatusClass::Success => {
            FetchError::UnexpectedStatus {
                stage,
                status,
                body,
            }
        }
    }
}
