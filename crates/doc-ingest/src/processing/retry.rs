//! Bounded retry with capped exponential backoff

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Retry policy shared by every task kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Result of a retried operation plus how many retries it took
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T>,
    pub retries: u32,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// Only transient errors are retried. A cancellation during backoff ends
    /// the loop with `Error::Cancelled`.
    pub async fn run<T, F, Fut>(&self, label: &str, cancel: &CancellationToken, mut op: F) -> Retried<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;
        loop {
            match op(retries).await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        retries,
                    }
                }
                Err(e) if e.is_transient() && retries + 1 < self.max_attempts => {
                    retries += 1;
                    let delay = self.delay_for(retries);
                    tracing::warn!(
                        "[{}] attempt {}/{} failed: {}; retrying in {:?}",
                        label,
                        retries,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Retried {
                                result: Err(Error::Cancelled),
                                retries,
                            }
                        }
                    }
                }
                Err(e) => {
                    return Retried {
                        result: Err(e),
                        retries,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = fast_policy(3)
            .run("item", &CancellationToken::new(), |_| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::download("u", "503", true))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(out.result.unwrap(), 42);
        assert_eq!(out.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let out: Retried<()> = fast_policy(3)
            .run("item", &CancellationToken::new(), |_| async {
                Err(Error::download("u", "timeout", true))
            })
            .await;
        assert!(matches!(out.result, Err(Error::Download { .. })));
        assert_eq!(out.retries, 2);
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Retried<()> = tokio_test::block_on(fast_policy(3).run(
            "item",
            &CancellationToken::new(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::UnsupportedFileType("exe".into())) }
            },
        ));
        assert!(out.result.is_err());
        assert_eq!(out.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out: Retried<()> = policy
            .run("item", &cancel, |_| async { Err(Error::Timeout("slow".into())) })
            .await;
        assert!(matches!(out.result, Err(Error::Cancelled)));
    }
}
