//! Retry classification and exponential backoff
//!
//! The fetch stages share one policy:
//! - 429 and 5xx gateway statuses are transient and retried after a backoff
//! - 401 and 403 mean the credential expired
//! - any other non-200 is retried until the attempt cap, then reported
//!
//! [`backoff_delay`] computes the sleep before the next request as
//! `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`, plus an
//! additive random jitter.

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (server busy, connection reset, timeouts) return `true`.
/// Failures that another request cannot fix (malformed body, cancellation) return `false`.
pub trait IsRetryable {
    /// Returns true if the operation should be attempted again
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::TransientServer { .. } | FetchError::Transport { .. } => true,
            // Retried once a fresh credential is observed
            FetchError::AuthExpired { .. } => true,
            // Other statuses use up the remaining attempts before giving up
            FetchError::UnexpectedStatus { .. } => true,
            FetchError::MalformedResponse { .. } => false,
            FetchError::RetriesExhausted { .. } => false,
            FetchError::Cancelled { .. } => false,
        }
    }
}

/// How a stage reacts to an HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 200
    Success,
    /// 429, 500, 502, 503, 504
    Transient,
    /// 401, 403
    AuthExpired,
    /// Anything else
    Other,
}

/// Classify an HTTP status code
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200 => StatusClass::Success,
        429 | 500 | 502 | 503 | 504 => StatusClass::Transient,
        401 | 403 => StatusClass::AuthExpired,
        _ => StatusClass::Other,
    }
}

/// Delay to sleep after the request numbered `attempt` (0-based) failed
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let scaled = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let base = if scaled.is_finite() && scaled < config.max_delay.as_secs_f64() {
        Duration::from_secs_f64(scaled.max(0.0))
    } else {
        config.max_delay
    };

    add_jitter(base, config.jitter)
}

/// Add a uniformly random delay in `[0, max_jitter]`
///
/// A zero `max_jitter` returns `delay` unchanged.
fn add_jitter(delay: Duration, max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return delay;
    }
    let mut rng = rand::thread_rng();
    let extra: f64 = rng.gen_range(0.0..=max_jitter.as_secs_f64());
    delay + Duration::from_secs_f64(extra)
}
