use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

use crate::api::ApiError;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Bounded exponential backoff with jitter, used for single file transfers.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_secs: 5,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(base_delay * 2^retry, max_delay) + random_jitter(0..base_delay)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let capped = exponential_secs(self.base_delay_secs, self.max_delay_secs, retry);
        let jitter = if self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        Duration::from_secs(capped + jitter)
    }
}

fn exponential_secs(base: u64, max: u64, retry: u32) -> u64 {
    base.saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX))
        .min(max)
}

/// Sleep unless shutdown is requested first. Returns `false` if cancelled.
pub(crate) async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// Returns the first `Ok` result, or the last error if retries are exhausted,
/// the classifier returns `Abort`, or `cancel` fires during a backoff sleep.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                attempt += 1;
                if classifier(&e) == RetryAction::Abort || attempt >= total_attempts {
                    return Err(e);
                }
                let delay = config.delay_for_retry(attempt - 1);
                tracing::warn!(
                    "Retryable error (attempt {}/{}), retrying in {}s: {}",
                    attempt,
                    total_attempts,
                    delay.as_secs(),
                    e
                );
                if !pause(cancel, delay).await {
                    return Err(e);
                }
            }
        }
    }
}

/// Pacing for every outbound API call.
///
/// Rate-limit responses back off exponentially from `base_delay_secs` up to
/// `max_delay_secs` and are retried without an attempt cap; the paginator's
/// own retry budget bounds total wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub pre_call_delay: Duration,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            pre_call_delay: Duration::from_millis(400),
            base_delay_secs: 30,
            max_delay_secs: 300,
        }
    }
}

impl RateLimitPolicy {
    pub fn backoff_for(&self, rate_limited_count: u32) -> Duration {
        Duration::from_secs(exponential_secs(
            self.base_delay_secs,
            self.max_delay_secs,
            rate_limited_count,
        ))
    }
}

/// Invoke `operation`, sleeping and retrying whenever it reports a rate
/// limit. Any other error is returned on the spot.
///
/// Shutdown is honoured during the pre-call delay, the call itself and every
/// backoff sleep; it surfaces as [`ApiError::Cancelled`].
pub async fn call_rate_limited<F, Fut, T>(
    policy: &RateLimitPolicy,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut rate_limited = 0u32;
    loop {
        if !pause(cancel, policy.pre_call_delay).await {
            return Err(ApiError::Cancelled);
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            result = operation() => result,
        };
        match result {
            Err(e) if e.is_rate_limited() => {
                let delay = policy.backoff_for(rate_limited);
                rate_limited = rate_limited.saturating_add(1);
                tracing::warn!(
                    attempt = rate_limited,
                    delay_secs = delay.as_secs(),
                    "{}, backing off",
                    e
                );
                if !pause(cancel, delay).await {
                    return Err(ApiError::Cancelled);
                }
            }
            other => return other,
        }
    }
}
