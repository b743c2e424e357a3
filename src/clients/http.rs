use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use anyhow::{Error, Result, anyhow};
use chrono::Utc;
use reqwest::{Client, Method};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{circuit_breaker::CircuitBreaker, recorder::ApiRecorder},
    models::{
        circuit_breaker::CircuitBreakerMetrics,
        entry::{ApiLogEntry, REDACTION_MARKER, RequestDetails, ResponseDetails},
        error::ApiClientError,
    },
};

const SENSITIVE_HEADERS: [&str; 5] = [
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
];

const SENSITIVE_FIELDS: [&str; 7] = [
    "token",
    "access_token",
    "refresh_token",
    "id_token",
    "client_secret",
    "password",
    "secret",
];

const FALLBACK_BLOCKED_STATUS: u16 = 503;

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub data: Option<JsonValue>,
    pub form: Option<HashMap<String, String>>,
    pub ensure_success: bool,
}

#[derive(Debug, Clone)]
pub struct ApiResponsePayload {
    pub status: u16,
    pub ok: bool,
    pub data: Option<JsonValue>,
    pub headers: HashMap<String, String>,
    pub duration_ms: u64,
    pub correlation_id: String,
}

pub struct ApiClient {
    name: String,
    base_url: String,
    http_client: Client,
    capture_raw_bodies: bool,
    recorder: Arc<Mutex<ApiRecorder>>,
    circuit_breaker: Option<Mutex<CircuitBreaker>>,
    last_status: Mutex<Option<u16>>,
}

impl ApiClient {
    pub fn new(
        name: String,
        base_url: String,
        capture_raw_bodies: bool,
        recorder: Arc<Mutex<ApiRecorder>>,
        circuit_breaker: Option<CircuitBreaker>,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(name = %name, base_url = %base_url, "API client initialized");

        Ok(Self {
            name,
            base_url,
            http_client,
            capture_raw_bodies,
            recorder,
            circuit_breaker: circuit_breaker.map(Mutex::new),
            last_status: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn circuit_breaker_metrics(&self) -> Option<CircuitBreakerMetrics> {
        self.circuit_breaker
            .as_ref()
            .map(|breaker| lock(breaker).metrics())
    }

    pub async fn get(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ApiResponsePayload, ApiClientError> {
        self.execute(Method::GET, path, options).await
    }

    pub async fn post(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ApiResponsePayload, ApiClientError> {
        self.execute(Method::POST, path, options).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ApiResponsePayload, ApiClientError> {
        let correlation_id = Uuid::new_v4().to_string();
        let url = format!("{}{}", self.base_url, path);

        if let Some(breaker) = &self.circuit_breaker {
            if !lock(breaker).can_proceed() {
                return Err(self.fast_fail(&method, path, &url, correlation_id));
            }
        }

        debug!(
            name = %self.name,
            method = %method,
            path,
            correlation_id = %correlation_id,
            "Issuing API request"
        );

        let timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let mut request_headers = options.headers.clone();
        request_headers.insert("x-correlation-id".to_string(), correlation_id.clone());

        let mut request = self.http_client.request(method.clone(), &url);
        for (key, value) in &request_headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(data) = &options.data {
            request = request.json(data);
        }
        if let Some(form) = &options.form {
            request = request.form(form);
        }

        let raw_request = if self.capture_raw_bodies {
            outgoing_body_text(options)
        } else {
            None
        };

        let started = Instant::now();
        let response = request.send().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                let ok = response.status().is_success();
                let response_headers = collect_headers(&response);
                let retry_after_ms = parse_retry_after(&response_headers);
                let text = response.text().await.unwrap_or_default();
                let body = parse_body(&text);

                let entry = ApiLogEntry {
                    id: correlation_id.clone(),
                    name: Some(self.name.clone()),
                    method: method.to_string(),
                    url: url.clone(),
                    status,
                    ok,
                    timestamp,
                    duration_ms,
                    request: sanitized_request_details(&request_headers, options),
                    response: ResponseDetails {
                        headers: sanitize_headers(&response_headers),
                        body: body.clone().map(sanitize_value),
                    },
                    raw_request,
                    raw_response: if self.capture_raw_bodies && !text.is_empty() {
                        Some(text)
                    } else {
                        None
                    },
                };
                self.record(entry.clone());
                self.report_outcome(ok);
                *lock(&self.last_status) = Some(status);

                if !ok {
                    warn!(
                        name = %self.name,
                        method = %method,
                        path,
                        status,
                        correlation_id = %correlation_id,
                        "API request failed"
                    );
                }

                if ok || !options.ensure_success {
                    Ok(ApiResponsePayload {
                        status,
                        ok,
                        data: body,
                        headers: response_headers,
                        duration_ms,
                        correlation_id,
                    })
                } else {
                    Err(ApiClientError {
                        message: format!("{} {} responded with status {}", method, path, status),
                        method: method.to_string(),
                        endpoint_path: path.to_string(),
                        status,
                        correlation_id,
                        elapsed_ms: duration_ms,
                        retry_after_ms,
                        log_entry: entry,
                    })
                }
            }
            Err(e) => {
                warn!(
                    name = %self.name,
                    method = %method,
                    path,
                    error = %e,
                    "API request transport failure"
                );

                let entry = ApiLogEntry {
                    id: correlation_id.clone(),
                    name: Some(self.name.clone()),
                    method: method.to_string(),
                    url: url.clone(),
                    status: 0,
                    ok: false,
                    timestamp,
                    duration_ms,
                    request: sanitized_request_details(&request_headers, options),
                    response: ResponseDetails::default(),
                    raw_request,
                    raw_response: None,
                };
                self.record(entry.clone());
                self.report_outcome(false);

                Err(ApiClientError {
                    message: format!("{} {} transport failure: {}", method, path, e),
                    method: method.to_string(),
                    endpoint_path: path.to_string(),
                    status: 0,
                    correlation_id,
                    elapsed_ms: duration_ms,
                    retry_after_ms: None,
                    log_entry: entry,
                })
            }
        }
    }

    /// Synthetic failure for a call rejected by the breaker. No network
    /// traffic happens; the zero duration is what lets callers tell this
    /// apart from a real failed request.
    fn fast_fail(
        &self,
        method: &Method,
        path: &str,
        url: &str,
        correlation_id: String,
    ) -> ApiClientError {
        let status = (*lock(&self.last_status)).unwrap_or(FALLBACK_BLOCKED_STATUS);

        warn!(
            name = %self.name,
            method = %method,
            path,
            status,
            "Request blocked by open circuit"
        );

        let entry = ApiLogEntry {
            id: correlation_id.clone(),
            name: Some(self.name.clone()),
            method: method.to_string(),
            url: url.to_string(),
            status,
            ok: false,
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            duration_ms: 0,
            request: RequestDetails::default(),
            response: ResponseDetails::default(),
            raw_request: None,
            raw_response: None,
        };
        self.record(entry.clone());

        ApiClientError {
            message: format!("{} {} blocked by open circuit", method, path),
            method: method.to_string(),
            endpoint_path: path.to_string(),
            status,
            correlation_id,
            elapsed_ms: 0,
            retry_after_ms: None,
            log_entry: entry,
        }
    }

    fn record(&self, entry: ApiLogEntry) {
        lock(&self.recorder).record(entry);
    }

    fn report_outcome(&self, ok: bool) {
        if let Some(breaker) = &self.circuit_breaker {
            let mut breaker = lock(breaker);
            if ok {
                breaker.on_success();
            } else {
                breaker.on_failure();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn collect_headers(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn parse_retry_after(headers: &HashMap<String, String>) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|seconds| seconds * 1000)
}

fn parse_body(text: &str) -> Option<JsonValue> {
    if text.is_empty() {
        return None;
    }

    Some(serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.to_string())))
}

fn outgoing_body_text(options: &RequestOptions) -> Option<String> {
    options
        .data
        .as_ref()
        .map(|data| data.to_string())
        .or_else(|| {
            options
                .form
                .as_ref()
                .and_then(|form| serde_json::to_string(form).ok())
        })
}

fn sanitized_request_details(
    headers: &HashMap<String, String>,
    options: &RequestOptions,
) -> RequestDetails {
    let query = if options.query.is_empty() {
        None
    } else {
        Some(JsonValue::Object(
            options
                .query
                .iter()
                .map(|(key, value)| (key.clone(), JsonValue::String(value.clone())))
                .collect(),
        ))
    };

    let form = options.form.as_ref().map(|form| {
        JsonValue::Object(
            form.iter()
                .map(|(key, value)| (key.clone(), JsonValue::String(value.clone())))
                .collect(),
        )
    });

    RequestDetails {
        headers: sanitize_headers(headers),
        data: options.data.clone().map(sanitize_value),
        form: form.map(sanitize_value),
        query: query.map(sanitize_value),
    }
}

fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            if SENSITIVE_HEADERS.contains(&name.to_lowercase().as_str()) {
                (name.clone(), REDACTION_MARKER.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

fn sanitize_value(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .map(|(key, val)| {
                    if SENSITIVE_FIELDS.contains(&key.to_lowercase().as_str()) {
                        (key, JsonValue::String(REDACTION_MARKER.to_string()))
                    } else {
                        (key, sanitize_value(val))
                    }
                })
                .collect(),
        ),
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(sanitize_value).collect())
        }
        other => other,
    }
}
