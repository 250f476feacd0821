use common::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout and retry budget applied to every storage call.
#[derive(Debug, Clone, Copy)]
pub struct IoPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for IoPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

async fn sleep_with_jitter(base_ms: u64, max_jitter_ms: u64) {
    let jitter = rand::rng().random_range(0..=max_jitter_ms);
    tokio::time::sleep(Duration::from_millis(base_ms + jitter)).await;
}

/// Runs `operation` under the policy timeout, retrying transient failures
/// with exponential backoff. Non-transient errors return immediately.
pub async fn retry_with_backoff<T, F, Fut>(policy: &IoPolicy, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = policy.max_retries;
    let mut delay = policy.base_delay_ms;

    loop {
        let outcome = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(policy.timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                if retries == 0 || !e.is_transient() {
                    return Err(e);
                }

                warn!(error = %e, retries_left = retries, delay_ms = delay, "Retrying storage call");
                retries -= 1;
                sleep_with_jitter(delay, delay / 2).await;
                delay = delay.saturating_mul(2);
            }
        }
    }
}
