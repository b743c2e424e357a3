use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const REDACTION_MARKER: &str = "[REDACTED]";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLogEntry {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub method: String,
    pub url: String,
    pub status: u16,
    pub ok: bool,
    pub timestamp: String,
    pub duration_ms: u64,
    pub request: RequestDetails,
    pub response: ResponseDetails,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestDetails {
    pub headers: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseDetails {
    pub headers: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

#[derive(Debug, Clone, Copy)]
pub struct RecorderLimits {
    pub max_entries: usize,
    pub max_field_chars: usize,
}

impl Default for RecorderLimits {
    fn default() -> Self {
        Self {
            max_entries: 250,
            max_field_chars: 4000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStats {
    pub dropped_entries: u64,
    pub trimmed_fields: u64,
}
