// src/services/retry.rs
//! Exponential backoff around service calls, capped by attempt count.

use backoff::{future::retry, ExponentialBackoff};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::ServiceError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: Duration::from_millis(initial_backoff_ms),
            ..Default::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: 2.0,
            // The attempt cap ends retries, not elapsed time.
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Run `operation`, retrying `RateLimited` failures until the attempt cap.
/// Quota and other failures return immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let attempts = AtomicU32::new(0);
    let max_attempts = policy.max_attempts.max(1);

    retry(policy.backoff(), || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let call = operation();
        async move {
            match call.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        "⏳ {} rate limited (attempt {}/{}), backing off: {}",
                        label,
                        attempt,
                        max_attempts,
                        e
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}
