//! Retry logic with exponential backoff
//!
//! This module provides the bounded retry policy applied to every call
//! against the package index and the release host.

use crate::core::error::SyncError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Errors that know whether another attempt might succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Options for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay before first retry
    #[serde(with = "millis", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    /// Maximum delay between retries
    #[serde(with = "millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Result of a retried operation together with the attempts it took
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Retry manager for executing operations with exponential backoff
///
/// # Examples
///
/// ```no_run
/// use release_backfill::core::{RetryManager, RetryOptions, SyncError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), SyncError> {
///     let manager = RetryManager::new(RetryOptions::default());
///
///     let value = manager
///         .retry("example", || async { Ok::<_, SyncError>(42) })
///         .await?;
///
///     assert_eq!(value, 42);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RetryManager {
    options: RetryOptions,
}

impl RetryManager {
    /// Create a new RetryManager with the given options
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Execute the given async operation with retry logic
    ///
    /// `label` only shows up in log lines.
    pub async fn retry<F, Fut, T, E>(&self, label: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        self.retry_counted(label, operation).await.result
    }

    /// Like [`RetryManager::retry`], but also reports how many attempts ran
    pub async fn retry_counted<F, Fut, T, E>(&self, label: &str, mut operation: F) -> Attempted<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let max_attempts = self.options.max_attempts.max(1);
        let mut delay = self.options.initial_delay;
        let mut attempt = 1;

        loop {
            let result = operation().await;
            let error = match result {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                return Attempted {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            warn!(
                operation = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying: {}",
                error
            );

            sleep(delay).await;

            delay = Duration::from_secs_f64(delay.as_secs_f64() * self.options.backoff_multiplier)
                .min(self.options.max_delay);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options(max_attempts: u32) -> RetryOptions {
        RetryOptions {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }

    fn network_error() -> SyncError {
        SyncError::Network {
            service: "test".to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let manager = RetryManager::new(RetryOptions::default());

        let attempted = manager
            .retry_counted("op", || async { Ok::<_, SyncError>(42) })
            .await;

        assert_eq!(attempted.result.unwrap(), 42);
        assert_eq!(attempted.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let manager = RetryManager::new(fast_options(3));

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let attempted = manager
            .retry_counted("op", move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(network_error())
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(attempted.result.unwrap(), "success");
        assert_eq!(attempted.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_max_attempts_reached() {
        let manager = RetryManager::new(fast_options(3));

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = manager
            .retry("op", move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move { Err::<i32, _>(network_error()) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Network { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error() {
        let manager = RetryManager::new(fast_options(3));

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = manager
            .retry("op", move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<i32, _>(SyncError::NotFound {
                        service: "pypi".to_string(),
                        package: "pkg".to_string(),
                        version: "1.0.0".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(SyncError::NotFound { .. })));
        // Should fail immediately without retries
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_retried() {
        let manager = RetryManager::new(fast_options(2));

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let _ = manager
            .retry("op", move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<(), _>(SyncError::ChecksumMismatch {
                        file: "pkg.whl".to_string(),
                        expected: "00".to_string(),
                        actual: "ff".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let manager = RetryManager::new(RetryOptions {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        });

        let start = std::time::Instant::now();

        let _result = manager
            .retry("op", || async { Err::<i32, _>(network_error()) })
            .await;

        let elapsed = start.elapsed();

        // Delays: 10ms + 20ms, the last attempt does not wait
        assert!(
            elapsed >= Duration::from_millis(30),
            "Expected at least 30ms, got {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let manager = RetryManager::new(fast_options(0));

        let attempted = manager
            .retry_counted("op", || async { Err::<i32, _>(network_error()) })
            .await;

        assert_eq!(attempted.attempts, 1);
    }

    #[test]
    fn test_retry_options_default() {
        let options = RetryOptions::default();

        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.initial_delay, Duration::from_secs(1));
        assert_eq!(options.max_delay, Duration::from_secs(30));
        assert_eq!(options.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_retry_options_yaml_uses_milliseconds() {
        let yaml = "max_attempts: 5\ninitial_delay_ms: 250\nmax_delay_ms: 4000\nbackoff_multiplier: 1.5\n";
        let options: RetryOptions = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.initial_delay, Duration::from_millis(250));
        assert_eq!(options.max_delay, Duration::from_secs(4));
    }

    #[test]
    fn test_retry_options_yaml_partial_keeps_defaults() {
        let options: RetryOptions = serde_yaml::from_str("max_attempts: 4\n").unwrap();

        assert_eq!(options.max_attempts, 4);
        assert_eq!(options.initial_delay, Duration::from_secs(1));
    }
}
