use anyhow::{Result, anyhow};
use api_telemetry::{models::retry::RetryPolicy, utils::{RetryAfterHint, retry_with_backoff}};
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use tokio::time::Instant;

#[derive(Debug)]
struct RateLimited {
    retry_after_ms: u64,
}

impl std::fmt::Display for RateLimited {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rate limited, retry after {}ms", self.retry_after_ms)
    }
}

impl RetryAfterHint for RateLimited {
    fn retry_after_ms(&self) -> Option<u64> {
        Some(self.retry_after_ms)
    }
}

fn policy(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff_ms,
        max_backoff_ms,
        timeout_ms: 10_000,
    }
}

/// Test: Successful operations complete without retry
#[tokio::test]
async fn test_successful_operation_no_retry() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&policy(3, 100, 1000), |_| true, || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>("success")
        }
    })
    .await?;

    assert_eq!(result, "success");
    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        1,
        "Should only attempt once"
    );

    Ok(())
}

/// Test: Transient failures are retried until the operation recovers
#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&policy(5, 50, 500), |_| true, || {
        let counter = Arc::clone(&counter);
        async move {
            let attempts = counter.fetch_add(1, Ordering::SeqCst);

            // Fail first 2 attempts, succeed on 3rd
            if attempts < 2 {
                Err(anyhow!("Transient error"))
            } else {
                Ok("success")
            }
        }
    })
    .await?;

    assert_eq!(result, "success");
    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        3,
        "Should retry 2 times then succeed"
    );

    Ok(())
}

/// Test: Exhausting all attempts surfaces the last error, not the first
#[tokio::test]
async fn test_exhaustion_surfaces_last_error() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&policy(4, 20, 100), |_| true, || {
        let counter = Arc::clone(&counter);
        async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<String, _>(anyhow!("failure {}", attempt))
        }
    })
    .await;

    let error = result.expect_err("Should fail after max attempts");
    assert_eq!(error.to_string(), "failure 4");
    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        4,
        "Should attempt exactly max_attempts times"
    );

    Ok(())
}

/// Test: A non-retryable error is surfaced without further invocations
#[tokio::test]
async fn test_non_retryable_fails_immediately() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&policy(5, 20, 100), |_| false, || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(anyhow!("Permanent failure"))
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        1,
        "No retries for non-retryable errors"
    );

    Ok(())
}

/// Test: A server-advised retry delay is honoured as a minimum wait
#[tokio::test]
async fn test_server_retry_delay_is_honoured() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);
    let started = Instant::now();

    let result = retry_with_backoff(&policy(3, 50, 200), |_| true, || {
        let counter = Arc::clone(&counter);
        async move {
            let attempts = counter.fetch_add(1, Ordering::SeqCst);
            if attempts == 0 {
                Err(RateLimited {
                    retry_after_ms: 1000,
                })
            } else {
                Ok("success")
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), "success");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    assert!(
        started.elapsed().as_millis() >= 1000,
        "Second attempt should wait at least the advised delay"
    );

    Ok(())
}

/// Test: The overall deadline stops retrying even with attempts left
#[tokio::test]
async fn test_deadline_stops_retrying() -> Result<()> {
    let policy = RetryPolicy {
        max_attempts: 100,
        initial_backoff_ms: 50,
        max_backoff_ms: 100,
        timeout_ms: 300,
    };

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&policy, |_| true, || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(anyhow!("Fail"))
        }
    })
    .await;

    assert!(result.is_err());

    let attempts = attempt_count.load(Ordering::SeqCst);
    assert!(
        attempts < 100,
        "Deadline should cut retries short, got {} attempts",
        attempts
    );

    Ok(())
}

/// Test: Retry delays follow exponential backoff
#[tokio::test]
async fn test_exponential_backoff_timing() -> Result<()> {
    let policy = policy(4, 100, 1000);

    let start = Instant::now();
    let attempt_times = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let times = Arc::clone(&attempt_times);

    let _ = retry_with_backoff(&policy, |_: &anyhow::Error| true, || {
        let times = Arc::clone(&times);
        async move {
            let elapsed = start.elapsed().as_millis();
            times.lock().await.push(elapsed);
            Err::<String, _>(anyhow!("Fail"))
        }
    })
    .await;

    let times = attempt_times.lock().await;

    assert_eq!(times.len(), 4);
    assert!(times[0] < 50, "First attempt should be immediate");

    for i in 1..times.len() {
        let delay = times[i] - times[i - 1];
        let expected = 100u64 * 2u64.pow(i as u32 - 1);
        let expected_min = expected * 8 / 10;
        let expected_max = expected * 12 / 10 + 20;

        assert!(
            delay >= expected_min as u128 && delay <= expected_max as u128,
            "Delay {} should be between {} and {} (actual: {})",
            i,
            expected_min,
            expected_max,
            delay
        );
    }

    Ok(())
}

/// Test: The max backoff cap is respected
#[tokio::test]
async fn test_max_backoff_cap_respected() -> Result<()> {
    let policy = policy(6, 100, 300);

    let start = Instant::now();
    let attempt_times = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let times = Arc::clone(&attempt_times);

    let _ = retry_with_backoff(&policy, |_: &anyhow::Error| true, || {
        let times = Arc::clone(&times);
        async move {
            let elapsed = start.elapsed().as_millis();
            times.lock().await.push(elapsed);
            Err::<String, _>(anyhow!("Fail"))
        }
    })
    .await;

    let times = attempt_times.lock().await;

    for i in 3..times.len() {
        let delay = times[i] - times[i - 1];
        assert!(
            delay <= (300u64 * 12 / 10 + 20) as u128,
            "Delay should not exceed the max backoff cap"
        );
    }

    Ok(())
}

/// Test: Retry state is independent across concurrent operations
#[tokio::test]
async fn test_concurrent_retry_operations() -> Result<()> {
    let shared_policy = Arc::new(policy(3, 20, 100));
    let total_success = Arc::new(AtomicU32::new(0));
    let mut handles = vec![];

    for i in 0..10 {
        let shared_policy = Arc::clone(&shared_policy);
        let success_counter = Arc::clone(&total_success);

        let handle = tokio::spawn(async move {
            let attempt_count = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&attempt_count);

            let result = retry_with_backoff(&shared_policy, |_| true, || {
                let counter = Arc::clone(&counter);
                async move {
                    let attempts = counter.fetch_add(1, Ordering::SeqCst);

                    if i < 5 && attempts == 0 {
                        Err(anyhow!("First attempt fails"))
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

            if result.is_ok() {
                success_counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        handles.push(handle);
    }

    futures_util::future::join_all(handles).await;

    assert_eq!(
        total_success.load(Ordering::SeqCst),
        10,
        "All concurrent operations should eventually succeed"
    );

    Ok(())
}
