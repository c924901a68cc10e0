//! Timeouts and capped exponential retry for provider calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::{ProviderConfig, RetryConfig};
use crate::provider::{ProviderError, ProviderResult};

/// Calculate exponential backoff delay.
///
/// Returns `initial_delay * 2^attempt`, capped at `max_delay`.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, initial_delay: Duration, max_delay: Duration) -> Duration {
    let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    initial_delay.saturating_mul(multiplier).min(max_delay)
}

/// Pick a delay uniformly from `[0, delay]`.
#[must_use]
pub fn full_jitter(delay: Duration) -> Duration {
    let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
}

/// How provider calls are bounded and retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Timeout for a single attempt.
    pub call_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Apply full jitter to delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Build a policy from configuration.
    #[must_use]
    pub const fn new(provider: &ProviderConfig, retry: &RetryConfig) -> Self {
        Self {
            call_timeout: provider.call_timeout(),
            max_retries: retry.max_retries,
            initial_delay: Duration::from_millis(retry.initial_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            jitter: retry.jitter,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = calculate_backoff_delay(attempt, self.initial_delay, self.max_delay);
        if self.jitter {
            full_jitter(delay)
        } else {
            delay
        }
    }

    /// Run `f` under the call timeout, retrying transient failures.
    ///
    /// `NotFound` and `Rejected` are returned at once. A transient failure
    /// that persists past `max_retries` is returned as is.
    pub async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.run(op, ProviderError::is_transient, f).await
    }

    /// Run a non-idempotent `f` under the call timeout.
    ///
    /// Only refusals are retried. A [`ProviderError::Timeout`] is returned at
    /// once: the provider may have applied the change anyway, and repeating
    /// it could apply it twice.
    pub async fn call_mutation<T, F, Fut>(&self, op: &'static str, f: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.run(op, |e| matches!(e, ProviderError::Unavailable(_)), f)
            .await
    }

    async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        retryable: fn(&ProviderError) -> bool,
        mut f: F,
    ) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(self.call_timeout, f())
                .await
                .unwrap_or(Err(ProviderError::Timeout(self.call_timeout)));

            match result {
                Err(e) if retryable(&e) && attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    attempt += 1;
                    warn!(
                        op,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying provider call after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&ProviderConfig::default(), &RetryConfig::default())
    }
}
