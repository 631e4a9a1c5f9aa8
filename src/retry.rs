//! Transient-failure retry for idempotent protocol sub-steps.
//!
//! Non-retryable statuses are returned to the caller as ordinary
//! responses; only transport failures become `Err` here.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::{transport_error, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(8);

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn is_retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Exponential backoff with full jitter on the upper half, capped.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let base = config
        .base_backoff
        .saturating_mul(1u32 << exponent)
        .min(MAX_BACKOFF);
    base.mul_f64(0.5 + rand::random::<f64>() * 0.5)
}

/// `Retry-After` in integer-seconds form; the HTTP-date form is rare on
/// registries and treated as absent.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a request up to `config.max_attempts` times, sleeping between
/// attempts on retryable statuses (5xx, 408, 429) and on connect/timeout
/// errors. The final response, whatever its status, is handed back for the
/// caller to interpret.
pub(crate) async fn send_with_retry<F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut send: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match send().await {
            Ok(response) => {
                let status = response.status();
                if is_retryable_status(status) && attempt < config.max_attempts {
                    let delay = retry_after(response.headers())
                        .unwrap_or_else(|| backoff_delay(config, attempt));
                    log::debug!(
                        "{operation} returned {status}, retrying in {delay:?} (attempt {attempt}/{})",
                        config.max_attempts
                    );
                    sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if is_retryable_transport(&err) && attempt < config.max_attempts {
                    let delay = backoff_delay(config, attempt);
                    log::debug!(
                        "{operation} failed ({err}), retrying in {delay:?} (attempt {attempt}/{})",
                        config.max_attempts
                    );
                    sleep(delay).await;
                    continue;
                }
                return Err(transport_error(operation, err));
            }
        }
    }
}
