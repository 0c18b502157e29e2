//! Caller-side retries for transient failures
//!
//! The facade never retries. Callers that want to ride out a flaky link
//! wrap a facade call in [`retry_transient`], which retries only errors
//! marked `retryable` and backs off exponentially between attempts.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::DatabaseError;

/// Backoff settings for [`retry_transient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Run `operation`, retrying retryable failures according to `policy`
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, DatabaseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DatabaseError>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Err(error) if error.retryable && attempt < policy.max_attempts => {
                debug!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, policy.max_attempts, error, delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}
