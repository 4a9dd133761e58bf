use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::LlmError;

const BASE_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 60;

/// Wait before the next attempt: the server's `Retry-After` seconds when given, otherwise
/// exponential backoff. Both are capped at one minute.
fn retry_delay(headers: &HeaderMap, attempt: u32) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map_or_else(
            || backoff(attempt),
            |secs| Duration::from_secs(secs.min(MAX_BACKOFF_SECS)),
        )
}

fn backoff(attempt: u32) -> Duration {
    let secs = 1u64
        .checked_shl(attempt)
        .map_or(MAX_BACKOFF_SECS, |factor| BASE_BACKOFF_SECS.saturating_mul(factor))
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// Send a request built by `send`, repeating it while the server answers 429.
///
/// At most `max_retries` repeats happen. Any other status, success or not, is returned
/// to the caller on the attempt that produced it.
///
/// # Errors
///
/// Returns `LlmError::RateLimited` once the repeats are used up and `LlmError::Http` for
/// transport failures.
pub(crate) async fn send_with_retry<F, Fut>(
    provider_name: &str,
    max_retries: u32,
    mut send: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = send().await.map_err(LlmError::Http)?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if attempt >= max_retries {
            return Err(LlmError::RateLimited);
        }

        let delay = retry_delay(response.headers(), attempt);
        attempt += 1;
        tracing::warn!(
            provider = provider_name,
            attempt,
            max_retries,
            delay_secs = delay.as_secs(),
            "rate limited, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
