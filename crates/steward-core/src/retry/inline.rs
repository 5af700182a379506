//! Bounded in-process retries.
//!
//! For calls that are cheap to repeat immediately and need no durability.
//! Failures that outlive this budget should be handed to the durable
//! [`RetryQueue`](super::RetryQueue).

use std::future::Future;
use std::time::Duration;

use steward_types::config::RetryConfig;
use steward_types::error::{ExternalOperationError, RetryExhaustedError};
use uuid::Uuid;

/// `max_retries` total attempts, sleeping `backoff_factor^attempt` seconds
/// between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InlineRetry {
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl InlineRetry {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.inline_max_retries,
            backoff_factor: config.inline_backoff_factor,
        }
    }

    /// Total attempts, never fewer than one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Sleep after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        Duration::try_from_secs_f64(self.backoff_factor.powi(exponent)).unwrap_or(Duration::MAX)
    }
}

impl Default for InlineRetry {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `op` until it succeeds or the attempt budget is spent.
///
/// Returns the last collaborator error when every attempt failed. `name`
/// identifies the call in logs.
pub async fn retry_call<T, F, Fut>(
    name: &str,
    policy: &InlineRetry,
    mut op: F,
) -> Result<T, ExternalOperationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalOperationError>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = name,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(operation = name, attempts, error = %e, "retries exhausted");
                return Err(e);
            }
        }
    }
}

/// Like [`retry_call`], reporting exhaustion as a [`RetryExhaustedError`].
pub async fn retry_with_backoff<T, F, Fut>(
    name: &str,
    policy: &InlineRetry,
    op: F,
) -> Result<T, RetryExhaustedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalOperationError>>,
{
    retry_call(name, policy, op)
        .await
        .map_err(|e| RetryExhaustedError {
            operation_id: Uuid::now_v7(),
            operation: name.to_string(),
            attempts: policy.attempts(),
            final_error: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn delay_grows_by_factor() {
        let policy = InlineRetry::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff("sheets.append_rows", &InlineRetry::default(), || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ExternalOperationError::new("sheets", "HTTP 503"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = retry_with_backoff("scraper.fetch", &InlineRetry::default(), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ExternalOperationError::new("scraper", "timeout"))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.operation, "scraper.fetch");
        assert_eq!(err.final_error, "scraper failed: timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_call_returns_last_collaborator_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let policy = InlineRetry {
            max_retries: 2,
            backoff_factor: 2.0,
        };

        let err = retry_call("sheets.append_rows", &policy, || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ExternalOperationError::new("sheets", format!("HTTP 50{n}")))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.service, "sheets");
        assert_eq!(err.message, "HTTP 501");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_still_makes_one_attempt() {
        let policy = InlineRetry {
            max_retries: 0,
            backoff_factor: 1.5,
        };
        let value = retry_call("scraper.fetch", &policy, || async { Ok::<_, ExternalOperationError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
