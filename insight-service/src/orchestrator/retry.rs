//! Retry with exponential backoff for transient backend failures.

use crate::backends::BackendError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub add_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);
        if self.add_jitter && backoff_ms > 0 {
            // Up to 25% on top.
            let jitter = rand::thread_rng().gen_range(0..=backoff_ms / 4);
            duration += Duration::from_millis(jitter);
        }
        duration
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the retry
/// budget is spent. `InvalidInput` is never retried.
pub async fn retry_backend_call<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Backend call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) if !error.is_transient() => {
                warn!(
                    operation = operation_name,
                    error = %error,
                    "Backend call failed with permanent error, not retrying"
                );
                return Err(error);
            }
            Err(error) if attempt >= policy.max_retries => {
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error = %error,
                    "Backend call failed after max retries"
                );
                return Err(error);
            }
            Err(error) => {
                let backoff = policy.backoff_duration(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error = %error,
                    backoff_ms = backoff.as_millis() as u64,
                    "Backend call failed, retrying after backoff"
                );
                metrics::counter!("analysis_retries_total", "operation" => operation_name.to_string())
                    .increment(1);
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
