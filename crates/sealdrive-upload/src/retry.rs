//! Bounded exponential backoff for transient storage failures
//!
//! Only `StoreError::Network` is retried; contract violations and anything
//! cryptographic fail immediately. Cancellation is observed between
//! attempts, never mid-sleep-to-completion.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{UploadError, UploadResult};
use crate::store::StoreError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first try.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(transfer: &sealdrive_core::config::TransferConfig) -> Self {
        Self {
            max_attempts: transfer.max_part_attempts.max(1),
            base_delay: Duration::from_millis(transfer.retry_base_delay_ms),
            ..Self::default()
        }
    }

    /// Exponential backoff with full jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        rand::thread_rng().gen_range(Duration::ZERO..=exp)
    }

    /// Run `f` until it succeeds, the budget is exhausted, or `cancel`
    /// fires. Each invocation of `f` must be safe to repeat verbatim.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut f: F,
    ) -> UploadResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut last_message = String::new();
        for attempt in 0..self.max_attempts {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            if attempt > 0 {
                let delay = self.delay_for(attempt - 1);
                tracing::debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                }
            }

            match f().await {
                Ok(value) => return Ok(value),
                Err(StoreError::Network(msg)) => {
                    tracing::warn!(operation, attempt, error = %msg, "transient storage failure");
                    last_message = msg;
                }
                Err(StoreError::Contract(msg)) => {
                    return Err(UploadError::Storage { operation, message: msg });
                }
            }
        }

        Err(UploadError::Network {
            operation,
            attempts: self.max_attempts,
            message: last_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = quick()
            .run("op", &cancel, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::Network("flaky".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_surfaces_network_error() {
        let cancel = CancellationToken::new();
        let result: UploadResult<()> = quick()
            .run("op", &cancel, || async {
                Err(StoreError::Network("down".into()))
            })
            .await;

        match result {
            Err(UploadError::Network { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Network, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_contract_error_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: UploadResult<()> = quick()
            .run("op", &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Contract("bad id".into())) }
            })
            .await;

        assert!(matches!(result, Err(UploadError::Storage { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: UploadResult<()> = quick().run("op", &cancel, || async { Ok(()) }).await;
        assert!(matches!(result, Err(UploadError::Cancelled)));
    }
}
