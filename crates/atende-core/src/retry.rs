//! Bounded retries with a per-attempt timeout for upstream calls.

use atende_billing::{BillingError, BillingResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, Copy)]
pub struct RetryRunner {
    base_delay: Duration,
    attempt_timeout: Duration,
}

impl RetryRunner {
    pub fn new(base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            base_delay,
            attempt_timeout,
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Runs `op` up to `max_retries + 1` times, waiting `base_delay * n` after
    /// the n-th failed attempt. Only retryable errors are retried; the last
    /// error is returned once the budget is spent.
    ///
    /// Each attempt is spawned and raced against the timeout. When the timeout
    /// wins the attempt keeps running detached and its result is discarded.
    pub async fn run<T, F, Fut>(&self, label: &str, max_retries: u32, mut op: F) -> BillingResult<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = BillingResult<T>> + Send + 'static,
    {
        let mut attempt: u32 = 1;
        loop {
            let handle = tokio::spawn(op());
            let outcome = match timeout(self.attempt_timeout, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(BillingError::Internal(format!(
                    "{} task failed: {}",
                    label, join_err
                ))),
                Err(_) => Err(BillingError::Timeout(format!(
                    "{} exceeded {}ms",
                    label,
                    self.attempt_timeout.as_millis()
                ))),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt > max_retries {
                return Err(err);
            }

            let delay = self.base_delay * attempt;
            tracing::warn!(
                call = label,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying upstream call after transient failure"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
