//! Deadlines and retries for adapter calls
//!
//! Every adapter call runs under [`RemoteCallPolicy::call`]: it gets a
//! deadline, transient failures are retried with exponential backoff, and a
//! cancelled token ends the call immediately. Unsupported capabilities are
//! never retried.

use crate::config::SyncConfig;
use crate::{Result, SyncError};
use bridge_traits::BridgeError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCallPolicy {
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
}

impl RemoteCallPolicy {
    pub fn new(timeout: Duration, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            timeout,
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.remote_timeout(),
            config.remote_retries,
            config.retry_base_delay(),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same deadline, single attempt. For writes that are not idempotent.
    pub fn without_retries(&self) -> Self {
        Self {
            max_retries: 0,
            ..*self
        }
    }

    /// Run `call` until it succeeds, fails permanently or runs out of retries.
    pub async fn call<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BridgeError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                outcome = tokio::time::timeout(self.timeout, call()) => outcome,
            };

            let (error, retryable) = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => {
                    let retryable = error.is_transient();
                    (SyncError::from(error), retryable)
                }
                Err(_) => (SyncError::Timeout(self.timeout.as_millis() as u64), true),
            };

            if !retryable || attempt >= self.max_retries {
                return Err(error);
            }

            let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
            attempt += 1;
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Remote call failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retries: u32) -> RemoteCallPolicy {
        RemoteCallPolicy::new(Duration::from_millis(50), retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let calls = AtomicU32::new(0);
        let result = policy(2)
            .call("fetch", &CancellationToken::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(BridgeError::RemoteCall("503".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsupported_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(3)
            .call("fetch", &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(BridgeError::NotSupported {
                        client_id: 4,
                        capability: "movies".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(SyncError::UnsupportedCapability { client_id: 4, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_is_timeout() {
        let result: Result<()> = policy(0)
            .call("fetch", &CancellationToken::new(), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(SyncError::Timeout(50))));
    }

    #[tokio::test]
    async fn test_cancelled_call_returns_promptly() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<()> = policy(0)
            .call("fetch", &token, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
