use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base_backoff_ms,
        }
    }

    /// Delay before retry number `attempt + 1`: `base * 2^attempt`, saturating.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let backoff_multiplier = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(backoff_multiplier))
    }
}

/// Runs `operation` until it succeeds, returns an error `is_retryable` rejects, or the
/// policy's retry count is spent. The closure receives the zero-based attempt number.
pub async fn retry_with_backoff<T, E, Op, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: Op,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0_u32;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < policy.max_retries && is_retryable(&err) {
                    let backoff = policy.backoff_for(attempt);
                    debug!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying after transient failure"
                    );
                    sleep(backoff).await;
                    attempt = attempt.saturating_add(1);
                    continue;
                }
                return Err(err);
            }
        }
    }
}
