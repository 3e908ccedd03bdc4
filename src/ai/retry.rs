//! Bounded call-site retries for external collaborators.
//!
//! Only recoverable errors (transient network failures, 5xx, rate limits,
//! timeouts, busy store) are retried; everything else returns immediately.

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::types::{Result, ScribeError};

/// Exponential backoff policy shared by every external call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            min_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_secs(config.max_delay_secs),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; used by tests
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self::immediate(0)
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Run `operation`, retrying recoverable failures with exponential backoff
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        f.retry(self.backoff())
            .when(|e: &ScribeError| e.is_recoverable())
            .notify(|e: &ScribeError, delay: Duration| {
                warn!(
                    operation,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after recoverable error: {}",
                    e
                );
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCategory;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::immediate(3);

        let result = policy
            .run("flaky", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ScribeError::external(ErrorCategory::Transient, "503", "search"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::immediate(3);

        let result: Result<()> = policy
            .run("auth", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ScribeError::external(ErrorCategory::Auth, "401", "openai"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_bound() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::immediate(2);

        let result: Result<()> = policy
            .run("down", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ScribeError::Store("unavailable".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
