//! Bounded retries with exponential backoff for transient fetch failures.
//!
//! Only errors for which [`FetchError::is_retryable`] holds are retried;
//! everything else is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use ingest_core::RawListing;

use crate::{FetchError, SiteAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts. `on_retry` is told about each failure
/// that will be retried, with the delay about to be slept, and is the only
/// place a retry is reported.
pub async fn retry_with_backoff<T, F, Fut, R>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
    R: FnMut(u32, &FetchError, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                on_retry(attempt, &err, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Fetch one page through `adapter` under `policy`.
pub async fn fetch_with_retry<R>(
    adapter: &dyn SiteAdapter,
    page: u32,
    policy: &RetryPolicy,
    on_retry: R,
) -> Result<Vec<RawListing>, FetchError>
where
    R: FnMut(u32, &FetchError, Duration),
{
    retry_with_backoff(policy, || adapter.fetch_page(page), on_retry).await
}
