//! Exponential-backoff retry helper for transient upstream failures:
//! initial 1s, factor 2, jitter ±25%, max 5 attempts. Any 4xx other than
//! 429 is non-retryable and surfaces immediately.

use std::time::Duration;

use rand::Rng;

use crate::error::{PipelineError, Result};

/// Default cap, used when a caller has no configured override.
pub const MAX_ATTEMPTS: u32 = 5;
const INITIAL_DELAY_MS: u64 = 1000;
const FACTOR: f64 = 2.0;
const JITTER: f64 = 0.25;

/// Whether an HTTP status should be retried by the backoff loop.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn delay_for_attempt(attempt: u32) -> Duration {
    let base = INITIAL_DELAY_MS as f64 * FACTOR.powi(attempt as i32 - 1);
    let jitter_span = base * JITTER;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    Duration::from_millis((base + jitter).max(0.0) as u64)
}

/// Run `op` up to `max_attempts` times (`downloader.retry_attempts` in
/// configuration). `op` returns `Err((status, message))` for a retryable
/// status, `Ok` on success. A `retry_after` hint (from a `Retry-After`
/// header) overrides the computed backoff for that attempt.
pub async fn retry_with_backoff<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, RetryableError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(RetryableError::NonRetryable(msg)) => {
                return Err(PipelineError::PermanentUpstream(msg));
            }
            Err(RetryableError::Retryable { message, retry_after }) => {
                if attempt >= max_attempts {
                    return Err(PipelineError::PermanentUpstream(format!(
                        "giving up after {attempt} attempts: {message}"
                    )));
                }
                let delay = retry_after.unwrap_or_else(|| delay_for_attempt(attempt));
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[derive(Debug)]
pub enum RetryableError {
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },
    NonRetryable(String),
}

impl RetryableError {
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        if is_retryable_status(status) {
            Self::Retryable {
                message: message.into(),
                retry_after,
            }
        } else {
            Self::NonRetryable(message.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(MAX_ATTEMPTS, |_attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RetryableError::from_status(503, "unavailable", None))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_status_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(MAX_ATTEMPTS, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(RetryableError::from_status(404, "not found", None)) }
        })
        .await;
        assert!(matches!(result, Err(PipelineError::PermanentUpstream(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_after_overrides_computed_delay() {
        let start = std::time::Instant::now();
        let calls = AtomicU32::new(0);
        let _ = retry_with_backoff(MAX_ATTEMPTS, |_attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(RetryableError::from_status(
                        429,
                        "rate limited",
                        Some(Duration::from_millis(300)),
                    ))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(start.elapsed() >= Duration::from_millis(280));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(MAX_ATTEMPTS, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(RetryableError::from_status(503, "unavailable", None)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
