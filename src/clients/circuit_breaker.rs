use chrono::Utc;
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};

pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<i64>,
    half_open_attempts: u32,
}

impl CircuitBreaker {
    pub fn new(service_name: String, config: CircuitBreakerConfig) -> Self {
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            half_open_attempts: 0,
        }
    }

    /// Decides whether a call may be attempted. While open, the cooldown
    /// expiring moves the circuit to half-open and the same call is let
    /// through as the trial; each half-open `true` consumes a trial slot.
    pub fn can_proceed(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| Utc::now().timestamp_millis() - t)
                    .unwrap_or(i64::MAX);

                if elapsed >= self.config.cooldown_ms as i64 {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.state = CircuitState::HalfOpen;
                    self.half_open_attempts = 1;
                    true
                } else {
                    warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_attempts < self.config.half_open_max_attempts {
                    self.half_open_attempts += 1;
                    debug!(
                        service = %self.service_name,
                        attempts = self.half_open_attempts,
                        "Circuit breaker allowing half-open trial"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.half_open_attempts = 0;
                self.opened_at = None;
                info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
            }
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Utc::now().timestamp_millis());
                self.half_open_attempts = 0;
                warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            }
            CircuitState::Closed => {
                self.failure_count += 1;
                debug!(
                    service = %self.service_name,
                    failures = self.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );

                if self.failure_count >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Utc::now().timestamp_millis());
                    self.half_open_attempts = 0;
                    warn!(
                        service = %self.service_name,
                        failures = self.failure_count,
                        "Circuit breaker opened due to consecutive failures"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state,
            failure_count: self.failure_count,
            failure_threshold: self.config.failure_threshold,
            cooldown_ms: self.config.cooldown_ms,
            opened_at: self.opened_at,
        }
    }
}
