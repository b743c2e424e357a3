use api_telemetry::{
    clients::circuit_breaker::CircuitBreaker,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
};
use std::time::Duration;
use tokio::time::sleep;

fn breaker(failure_threshold: u32, cooldown_ms: u64, half_open_max_attempts: u32) -> CircuitBreaker {
    CircuitBreaker::new(
        "test-service".to_string(),
        CircuitBreakerConfig {
            failure_threshold,
            cooldown_ms,
            half_open_max_attempts,
        },
    )
}

/// Test: Circuit opens exactly at the failure threshold, not before
#[tokio::test]
async fn test_opens_exactly_at_failure_threshold() {
    let mut breaker = breaker(3, 50, 1);

    for _ in 0..2 {
        assert!(breaker.can_proceed());
        breaker.on_failure();
        assert_eq!(breaker.metrics().state, CircuitState::Closed);
    }

    assert_eq!(breaker.metrics().failure_count, 2);

    assert!(breaker.can_proceed());
    breaker.on_failure();

    let metrics = breaker.metrics();
    assert_eq!(metrics.state, CircuitState::Open);
    assert_eq!(metrics.failure_count, 3);
    assert!(metrics.opened_at.is_some());
    assert!(!breaker.can_proceed());
}

/// Test: A success while closed resets the failure streak entirely
#[tokio::test]
async fn test_success_resets_failure_count_while_closed() {
    let mut breaker = breaker(3, 50, 1);

    breaker.on_failure();
    breaker.on_failure();
    assert_eq!(breaker.metrics().failure_count, 2);
    assert_eq!(breaker.metrics().state, CircuitState::Closed);

    breaker.on_success();
    assert_eq!(breaker.metrics().failure_count, 0);
    assert_eq!(breaker.metrics().state, CircuitState::Closed);

    // The reset streak means two more failures still leave it closed
    breaker.on_failure();
    breaker.on_failure();
    assert_eq!(breaker.metrics().failure_count, 2);
    assert_eq!(breaker.metrics().state, CircuitState::Closed);
}

/// Test: Calls are blocked while open and allowed again after the cooldown
#[tokio::test]
async fn test_blocked_until_cooldown_elapses() {
    let mut breaker = breaker(2, 200, 1);

    breaker.on_failure();
    breaker.on_failure();
    assert_eq!(breaker.metrics().state, CircuitState::Open);

    for _ in 0..3 {
        assert!(!breaker.can_proceed());
    }
    assert_eq!(breaker.metrics().state, CircuitState::Open);

    sleep(Duration::from_millis(250)).await;

    assert!(breaker.can_proceed());
    assert_eq!(breaker.metrics().state, CircuitState::HalfOpen);
}

/// Test: Half-open allows exactly the configured number of trial calls
#[tokio::test]
async fn test_half_open_attempt_cap() {
    let mut breaker = breaker(2, 100, 2);

    breaker.on_failure();
    breaker.on_failure();
    assert_eq!(breaker.metrics().state, CircuitState::Open);

    sleep(Duration::from_millis(150)).await;

    assert!(breaker.can_proceed());
    assert_eq!(breaker.metrics().state, CircuitState::HalfOpen);
    assert!(breaker.can_proceed());
    assert!(!breaker.can_proceed());
}

/// Test: A failed trial returns the circuit to open with a fresh opened_at
#[tokio::test]
async fn test_half_open_failure_reopens() {
    let mut breaker = breaker(2, 100, 1);

    breaker.on_failure();
    breaker.on_failure();
    let first_opened_at = breaker.metrics().opened_at.unwrap();

    sleep(Duration::from_millis(150)).await;
    assert!(breaker.can_proceed());

    breaker.on_failure();

    let metrics = breaker.metrics();
    assert_eq!(metrics.state, CircuitState::Open);
    assert!(metrics.opened_at.unwrap() > first_opened_at);
    assert!(!breaker.can_proceed());
}

/// Test: A successful trial closes the circuit and clears counters
#[tokio::test]
async fn test_half_open_success_closes() {
    let mut breaker = breaker(2, 100, 1);

    breaker.on_failure();
    breaker.on_failure();
    sleep(Duration::from_millis(150)).await;
    assert!(breaker.can_proceed());

    breaker.on_success();

    let metrics = breaker.metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.failure_count, 0);
    assert!(metrics.opened_at.is_none());
    assert!(breaker.can_proceed());
}

/// Test: Full lifecycle with threshold 5 and a 1s cooldown
#[tokio::test]
async fn test_full_lifecycle_scenario() {
    let mut breaker = breaker(5, 1000, 1);

    for _ in 0..5 {
        assert!(breaker.can_proceed());
        breaker.on_failure();
    }

    let metrics = breaker.metrics();
    assert_eq!(metrics.state, CircuitState::Open);
    assert_eq!(metrics.failure_count, 5);

    for _ in 0..3 {
        assert!(!breaker.can_proceed());
    }

    sleep(Duration::from_millis(1100)).await;

    assert!(breaker.can_proceed());
    assert_eq!(breaker.metrics().state, CircuitState::HalfOpen);

    breaker.on_success();
    assert_eq!(breaker.metrics().state, CircuitState::Closed);
    assert_eq!(breaker.metrics().failure_count, 0);
}

/// Test: Metrics snapshot reflects configuration and serialises state names
#[tokio::test]
async fn test_metrics_snapshot() {
    let mut breaker = breaker(4, 700, 1);
    breaker.on_failure();

    let metrics = breaker.metrics();
    assert_eq!(metrics.failure_threshold, 4);
    assert_eq!(metrics.cooldown_ms, 700);
    assert_eq!(metrics.failure_count, 1);
    assert!(metrics.opened_at.is_none());

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["state"], "closed");
    assert_eq!(json["failureCount"], 1);

    assert_eq!(CircuitState::from_string("half-open"), CircuitState::HalfOpen);
    assert_eq!(CircuitState::HalfOpen.as_str(), "half-open");
}
