//! Provider retry with exponential backoff
//!
//! Wraps a single outbound provider call with bounded retry on rate-limit
//! signals. Runs as the body of a dispatch queue task, so backoff time also
//! counts against the queue's spacing discipline.

use chartscribe_common::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Default retry attempt budget per call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Initial inter-attempt delay; doubles after every rate-limited attempt
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Whether a failure is rate-limit related and worth retrying.
///
/// Classified by provider status code 429, the provider's machine-readable
/// error code, or a rate-limit message substring.
pub fn is_rate_limited(err: &Error) -> bool {
    match err {
        Error::Provider {
            message,
            status,
            code,
        } => {
            *status == Some(429)
                || code.as_deref() == Some("rate_limit_exceeded")
                || message.to_ascii_lowercase().contains("rate limit")
        }
        _ => false,
    }
}

/// Retry an operation with exponential backoff on rate-limit failures.
///
/// **Algorithm:**
/// 1. Attempt the operation
/// 2. If successful, return the result
/// 3. If rate-limited with attempts remaining: backoff (2s, 4s, 8s, ...), retry
/// 4. Any other failure, or a rate limit on the final attempt, propagates
///    immediately
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "chart transcription")
/// * `max_attempts` - Total attempt budget, including the first attempt
/// * `operation` - Async closure performing the provider call
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_rate_limited(&err) || attempt >= max_attempts {
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "Rate limited, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn rate_limit_error() -> Error {
        Error::Provider {
            message: "Rate limit reached for requests".to_string(),
            status: Some(429),
            code: Some("rate_limit_exceeded".to_string()),
        }
    }

    #[test]
    fn classifies_429_status_as_rate_limited() {
        let err = Error::Provider {
            message: "too many requests".to_string(),
            status: Some(429),
            code: None,
        };
        assert!(is_rate_limited(&err));
    }

    #[test]
    fn classifies_message_substring_as_rate_limited() {
        let err = Error::Provider {
            message: "Rate limit exceeded, retry later".to_string(),
            status: None,
            code: None,
        };
        assert!(is_rate_limited(&err));
    }

    #[test]
    fn other_provider_failures_are_not_rate_limited() {
        let err = Error::Provider {
            message: "invalid request".to_string(),
            status: Some(400),
            code: Some("invalid_request_error".to_string()),
        };
        assert!(!is_rate_limited(&err));
        assert!(!is_rate_limited(&Error::Internal("boom".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_operation_uses_full_attempt_budget() {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result = with_retry("test op", 3, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), Error>(rate_limit_error()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two backoffs: 2000ms then 4000ms
        assert!(start.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_failure_propagates_immediately() {
        let attempts = AtomicU32::new(0);

        let result = with_retry("test op", 3, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), Error>(Error::Provider {
                    message: "model not found".to_string(),
                    status: Some(404),
                    code: None,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_rate_limit_clears() {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result = with_retry("test op", 3, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    Err(rate_limit_error())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn first_attempt_success_does_not_sleep() {
        let result = with_retry("test op", 3, || async { Ok::<u32, Error>(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }
}
