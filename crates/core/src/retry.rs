//! Retry of transient remote failures with exponential backoff and jitter
//!
//! Every object store call made by the engine goes through
//! [`retry_with_backoff`]. Only errors for which [`crate::Error::is_retryable`]
//! holds are retried; everything else is returned on the first failure.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::Result;

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts
///
/// `what` names the operation in log output.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_attempts && e.is_retryable() => {
                let backoff = backoff_for(config, attempt);
                tracing::debug!(
                    operation = what,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                if attempt > 1 {
                    tracing::warn!(operation = what, attempts = attempt, error = %e, "Giving up");
                }
                return Err(e);
            }
        }
    }
}

/// Backoff before retry number `attempt`: `initial * 2^(attempt-1)`, capped, plus jitter
fn backoff_for(config: &RetryConfig, attempt: u32) -> Duration {
    let base_ms = config
        .initial_backoff_ms
        .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(10));
    let capped_ms = base_ms.min(config.max_backoff_ms);
    Duration::from_millis(capped_ms + jitter(capped_ms))
}

// Sub-second clock noise is enough to spread retries of a single process.
fn jitter(max: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
        };
        let b1 = backoff_for(&config, 1).as_millis();
        let b3 = backoff_for(&config, 3).as_millis();
        assert!((100..200).contains(&b1));
        assert!((400..800).contains(&b3));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_attempts: 20,
            initial_backoff_ms: 1000,
            max_backoff_ms: 3000,
        };
        assert!(backoff_for(&config, 15).as_millis() < 6000);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&fast(), "head", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Network("Request timeout".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(&fast(), "put", || {
            calls += 1;
            async { Err(Error::Network("503 Service Unavailable".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(&fast(), "delete", || {
            calls += 1;
            async { Err(Error::Auth("InvalidAccessKeyId".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Auth(_))));
        assert_eq!(calls, 1);
    }
}
