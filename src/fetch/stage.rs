//! Per-stage retry loop

use crate::Error;
use crate::error::FetchError;
use crate::retry::{IsRetryable, backoff_delay};
use crate::types::FetchStage;
use std::future::Future;

use super::FetchClient;

impl FetchClient {
    /// Run one stage's request until it succeeds, fails terminally or the
    /// attempt cap is reached
    ///
    /// `attempt` receives the credential to send (if `authenticated`). After an
    /// `AuthExpired` failure the loop waits for a token different from the one
    /// just rejected, then still backs off before the next request. No sleep
    /// or wait follows the final request.
    pub(super) async fn run_stage<T, F, Fut>(
        &self,
        stage: FetchStage,
        authenticated: bool,
        mut attempt: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut n = 0;

        loop {
            let token = if authenticated {
                self.credentials.get().await
            } else {
                None
            };

            let err = match attempt(token.clone()).await {
                Ok(value) => {
                    if n > 0 {
                        tracing::info!(stage = %stage, attempts = n + 1, "Stage succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };
            n += 1;

            if !err.is_retryable() {
                tracing::warn!(stage = %stage, error = %err, "Stage failed with non-retryable error");
                return Err(err);
            }

            if n >= max_attempts {
                tracing::warn!(
                    stage = %stage,
                    attempts = n,
                    error = %err,
                    "Stage failed after all attempts exhausted"
                );
                return Err(FetchError::RetriesExhausted {
                    stage,
                    attempts: n,
                    last: Box::new(err),
                });
            }

            if matches!(err, FetchError::AuthExpired { .. }) {
                match self
                    .credentials
                    .wait_for_rotation(token.as_deref(), self.rotation_poll)
                    .await
                {
                    Ok(_) => {}
                    Err(Error::ShuttingDown) => return Err(FetchError::Cancelled { stage }),
                    Err(e) => {
                        tracing::warn!(stage = %stage, error = %e, "Credential wait failed");
                    }
                }
            }

            let delay = backoff_delay(&self.retry, n - 1);
            tracing::warn!(
                stage = %stage,
                error = %err,
                attempt = n,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
