use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::{
    clients::http::{ApiClient, ApiResponsePayload, RequestOptions},
    models::{error::ApiClientError, retry::RetryPolicy},
};

const DEFAULT_BATCH_SIZE: usize = 4;

/// Lets the retry loop read a server-advised delay off an arbitrary error
/// type. Errors without the hint fall back to exponential backoff.
pub trait RetryAfterHint {
    fn retry_after_ms(&self) -> Option<u64> {
        None
    }
}

impl RetryAfterHint for ApiClientError {
    fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after_ms
    }
}

impl RetryAfterHint for Error {}

pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: RetryAfterHint + std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(attempt, max_attempts = policy.max_attempts, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;

                if !is_retryable(&e) {
                    debug!(attempt, error = %e, "Error is not retryable, giving up");
                    return Err(e);
                }

                if attempt >= policy.max_attempts {
                    warn!(
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                if elapsed_ms >= policy.timeout_ms {
                    warn!(
                        elapsed_ms,
                        timeout_ms = policy.timeout_ms,
                        error = %e,
                        "Retry deadline passed, giving up"
                    );
                    return Err(e);
                }

                let backoff_ms = exponential_backoff_ms(
                    policy.initial_backoff_ms,
                    attempt,
                    policy.max_backoff_ms,
                );

                let jitter = rand::random_range(-0.1..=0.1);
                let jittered_ms = (backoff_ms as f64 * (1.0 + jitter)) as u64;

                // A server-advised delay is a floor, never shortened by jitter;
                // the overall deadline still caps the wait.
                let wait_ms = match e.retry_after_ms() {
                    Some(retry_after_ms) => retry_after_ms.max(jittered_ms),
                    None => jittered_ms,
                };
                let wait_ms = wait_ms.min(policy.timeout_ms.saturating_sub(elapsed_ms));

                debug!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    wait_ms,
                    "Retry attempt failed, backing off"
                );

                sleep(Duration::from_millis(wait_ms)).await;
            }
        }
    }
}

fn exponential_backoff_ms(initial_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    let doublings = attempt.saturating_sub(1);
    let factor = if doublings >= 63 {
        u64::MAX
    } else {
        1u64 << doublings
    };

    initial_ms.saturating_mul(factor).min(max_ms)
}

/// Issues GETs for every path in fixed-size concurrent batches, awaiting
/// each whole batch before starting the next so at most `batch_size`
/// requests are ever in flight.
pub async fn parallel_get(
    client: &ApiClient,
    paths: &[&str],
    batch_size: Option<usize>,
    options: &RequestOptions,
) -> Result<Vec<Result<ApiResponsePayload, ApiClientError>>, Error> {
    let batch_size = resolve_batch_size(batch_size)?;
    let mut results = Vec::with_capacity(paths.len());

    for batch in paths.chunks(batch_size) {
        let batch_results =
            futures_util::future::join_all(batch.iter().map(|path| client.get(path, options)))
                .await;
        results.extend(batch_results);
    }

    Ok(results)
}

fn resolve_batch_size(value: Option<usize>) -> Result<usize, Error> {
    match value {
        None => Ok(DEFAULT_BATCH_SIZE),
        Some(0) => Err(anyhow!("batch_size must be a positive number, got 0")),
        Some(n) => Ok(n),
    }
}
