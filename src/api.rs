use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clients::{http::ApiClient, recorder::ApiRecorder},
    config::Config,
    models::{
        circuit_breaker::{CircuitBreakerMetrics, CircuitState},
        entry::RecorderStats,
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
};

pub struct AppState {
    recorder: Arc<Mutex<ApiRecorder>>,
    clients: Vec<Arc<ApiClient>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TelemetrySnapshot {
    entries: usize,
    stats: RecorderStats,
    breakers: HashMap<String, CircuitBreakerMetrics>,
}

pub async fn run_api_server(
    config: Config,
    recorder: Arc<Mutex<ApiRecorder>>,
    clients: Vec<Arc<ApiClient>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState { recorder, clients });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/telemetry", get(telemetry_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Telemetry diagnostics server started");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut checks = HashMap::new();

    for client in &state.clients {
        let health = match client.circuit_breaker_metrics() {
            Some(metrics) => breaker_health(&metrics),
            None => ServiceHealth::healthy(),
        };
        checks.insert(client.name().to_string(), health);
    }

    let status = overall_status(&checks);
    let status_code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(HealthCheckResponse {
            status,
            timestamp: Utc::now(),
            checks,
        }),
    )
}

async fn telemetry_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (entries, stats) = {
        let recorder = state
            .recorder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (recorder.count(), recorder.stats())
    };

    let breakers = state
        .clients
        .iter()
        .filter_map(|client| {
            client
                .circuit_breaker_metrics()
                .map(|metrics| (client.name().to_string(), metrics))
        })
        .collect();

    Json(TelemetrySnapshot {
        entries,
        stats,
        breakers,
    })
}

fn breaker_health(metrics: &CircuitBreakerMetrics) -> ServiceHealth {
    let state_str = metrics.state.as_str().to_string();

    match metrics.state {
        CircuitState::Closed => ServiceHealth::healthy().with_circuit_breaker(state_str),
        CircuitState::HalfOpen => ServiceHealth::recovering(state_str),
        CircuitState::Open => ServiceHealth::degraded_circuit_open(state_str),
    }
}

fn overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let has_unhealthy = checks
        .values()
        .any(|health| health.status == HealthStatus::Unhealthy);

    let has_degraded = checks
        .values()
        .any(|health| health.status == HealthStatus::Degraded);

    if has_unhealthy {
        HealthStatus::Unhealthy
    } else if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
