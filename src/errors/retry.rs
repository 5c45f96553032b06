use std::time::Duration;
use std::future::Future;

use super::classification::ErrorClassification;
use super::types::PocScanError;
use tracing::warn;

impl ErrorClassification {
    /// Calculate the retry delay for the given attempt (0-indexed).
    ///
    /// Exponential backoff `base * 2^attempt` plus up to one `base` of random
    /// jitter, capped at `max`.
    pub fn retry_delay(&self, attempt: u32, base: Duration, max: Duration) -> Duration {
        let factor: f64 = 2.0_f64.powi(attempt.min(16) as i32);
        let jitter: f64 = rand::random::<f64>();
        let secs = base.as_secs_f64() * (factor + jitter);
        Duration::from_secs_f64(secs.min(max.as_secs_f64()))
    }
}

/// Retry configuration for outbound probe requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(3),
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Retries only if the error is classified as retryable and we haven't
/// exceeded max_retries.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut factory: F,
) -> Result<T, PocScanError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PocScanError>>,
{
    let max_attempts = config.max_retries + 1;
    let mut last_error = None;

    for attempt in 0..max_attempts {
        match factory().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let classification = e.classify();

                if !classification.retryable || attempt + 1 >= max_attempts {
                    if classification.retryable {
                        warn!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            max = max_attempts,
                            error = %e,
                            "Max retries exhausted"
                        );
                    }
                    return Err(e);
                }

                let delay = classification.retry_delay(attempt, config.base_delay, config.max_delay);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = max_attempts,
                    error_type = classification.error_type,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PocScanError::Internal("Retry loop exited unexpectedly".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_retry_delay_exponential_with_cap() {
        let class = ErrorClassification { error_type: "NetworkError", retryable: true };
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        let d0 = class.retry_delay(0, base, max);
        let d2 = class.retry_delay(2, base, max);
        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(200));
        assert!(d2 >= Duration::from_millis(400) && d2 <= Duration::from_millis(500));
        assert_eq!(class.retry_delay(10, base, max), max);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let result = with_retry("test", &fast_config(3), || async {
            Ok::<_, PocScanError>(42)
        }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry("test", &fast_config(3), || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PocScanError::Http("bad header".into()))
            }
        }).await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_transient_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry("test", &fast_config(2), || {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(PocScanError::Network("reset by peer".into()))
                } else {
                    Ok(n)
                }
            }
        }).await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_bounded_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry("test", &fast_config(2), || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PocScanError::Timeout("slow".into()))
            }
        }).await;

        assert!(matches!(result, Err(PocScanError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
