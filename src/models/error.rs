use thiserror::Error;

use crate::models::entry::ApiLogEntry;

/// Structured failure raised by an API client call. A transport-level
/// failure carries status 0; a call rejected by an open circuit carries
/// `elapsed_ms == 0` and the last status the client observed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiClientError {
    pub message: String,
    pub method: String,
    pub endpoint_path: String,
    pub status: u16,
    pub correlation_id: String,
    pub elapsed_ms: u64,
    pub retry_after_ms: Option<u64>,
    pub log_entry: ApiLogEntry,
}

impl ApiClientError {
    pub fn is_retryable(&self) -> bool {
        self.status == 0 || self.status == 429 || self.status >= 500
    }

    pub fn is_fast_fail(&self) -> bool {
        self.elapsed_ms == 0
    }
}
