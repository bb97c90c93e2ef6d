//! Retry logic with exponential backoff
//!
//! Used for the transient failures the control plane absorbs internally:
//! - Executor submit/status/stop failures and timeouts
//! - Optimistic-concurrency conflicts on registry commits
//!
//! Data-integrity and validation errors are never retried; retrying a corrupt
//! record cannot succeed.
//!
//! # Example
//!
//! ```rust,ignore
//! use featurelane_core::retry::{retry_async_if, is_retryable, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let handle = retry_async_if(&policy, || executor.submit(&spec), is_retryable).await?;
//! ```

use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,

    /// Initial backoff delay
    pub initial_delay: Duration,

    /// Maximum backoff delay (caps exponential growth)
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,

    /// Add random jitter to prevent thundering herd (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Aggressive retry policy for critical operations
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Conservative retry policy for non-critical operations
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    /// No waiting between attempts; for tests
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Look up a named preset (`default`, `aggressive`, `conservative`)
    pub fn from_preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "default" => Some(Self::default()),
            "aggressive" => Some(Self::aggressive()),
            "conservative" => Some(Self::conservative()),
            _ => None,
        }
    }

    /// Calculate backoff delay for a given attempt
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        // Add jitter: random value between (1 - jitter) and (1 + jitter)
        let jitter = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * self.jitter_factor;
        let final_delay = (capped_delay * jitter) as u64;

        Duration::from_millis(final_delay)
    }
}

/// Retry error - wraps the original error with retry metadata
#[derive(Debug)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: usize,
    pub total_delay: Duration,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Operation failed after {} attempts (total delay: {:?}): {}",
            self.attempts, self.total_delay, self.error
        )
    }
}

impl<E: std::error::Error> std::error::Error for RetryError<E> {}

/// Determine if an error is worth retrying
///
/// Conflicts and executor failures are transient; everything else is not.
pub fn is_retryable(error: &crate::Error) -> bool {
    matches!(
        error.kind(),
        crate::ErrorKind::Conflict | crate::ErrorKind::Executor
    )
}

/// Retry an async operation with exponential backoff while `should_retry`
/// accepts the error.
///
/// Returns `Err(RetryError)` as soon as a non-retryable error is seen or
/// after `max_retries + 1` attempts.
pub async fn retry_async_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;
    let mut total_delay = Duration::from_secs(0);

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        "Operation succeeded after {} attempts (total delay: {:?})",
                        attempts, total_delay
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !should_retry(&error) {
                    debug!("Operation failed with non-retryable error: {}", error);
                    return Err(RetryError {
                        error,
                        attempts,
                        total_delay,
                    });
                }

                if attempts > policy.max_retries {
                    warn!(
                        "Operation failed after {} attempts (total delay: {:?}): {}",
                        attempts, total_delay, error
                    );
                    return Err(RetryError {
                        error,
                        attempts,
                        total_delay,
                    });
                }

                let delay = policy.backoff_delay(attempts - 1);
                total_delay += delay;

                debug!(
                    "Operation failed (attempt {}/{}), retrying after {:?}: {}",
                    attempts,
                    policy.max_retries + 1,
                    delay,
                    error
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_retry_policy_presets() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));

        assert_eq!(RetryPolicy::from_preset("aggressive").unwrap().max_retries, 5);
        assert_eq!(
            RetryPolicy::from_preset("Conservative").unwrap().max_retries,
            2
        );
        assert!(RetryPolicy::from_preset("yolo").is_none());
    }

    #[test]
    fn test_backoff_delay_exponential() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0, // No jitter for predictable testing
        };

        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_delay_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };

        assert_eq!(policy.backoff_delay(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };

        let counter = Arc::new(Mutex::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_async_if(
            &policy,
            || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    let mut count = counter.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err("Temporary failure".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(*counter.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let policy = RetryPolicy::immediate(2);
        let counter = Arc::new(Mutex::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_async_if(
            &policy,
            || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    *counter.lock().unwrap() += 1;
                    Err::<i32, String>("Permanent failure".to_string())
                }
            },
            |_| true,
        )
        .await;

        let error = result.unwrap_err();
        assert_eq!(error.attempts, 3); // max_retries + 1
        assert_eq!(*counter.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::immediate(5);
        let counter = Arc::new(Mutex::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_async_if(
            &policy,
            || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    *counter.lock().unwrap() += 1;
                    Err::<(), Error>(Error::corrupt_config("REDIS", "garbage"))
                }
            },
            is_retryable,
        )
        .await;

        let error = result.unwrap_err();
        assert_eq!(error.attempts, 1);
        assert!(matches!(error.error, Error::CorruptConfig { .. }));
        assert_eq!(*counter.lock().unwrap(), 1);
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&Error::executor("connection reset")));
        assert!(is_retryable(&Error::ExecutorTimeout {
            operation: "status".into(),
            timeout_ms: 500
        }));
        assert!(is_retryable(&Error::Conflict {
            target: "store/online".into(),
            expected: 1,
            actual: 2
        }));

        assert!(!is_retryable(&Error::validation("empty pattern")));
        assert!(!is_retryable(&Error::UnsupportedStoreType("X".into())));
        assert!(!is_retryable(&Error::StoreNotFound("gone".into())));
    }
}
