use anyhow::{Error, Result};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::models::entry::{ApiLogEntry, RecorderLimits, RecorderStats};

pub struct ApiRecorder {
    include_raw: bool,
    limits: RecorderLimits,
    entries: Vec<ApiLogEntry>,
    dropped_entries: u64,
    trimmed_fields: u64,
}

impl ApiRecorder {
    pub fn new(include_raw: bool) -> Self {
        Self::with_limits(include_raw, RecorderLimits::default())
    }

    pub fn with_limits(include_raw: bool, limits: RecorderLimits) -> Self {
        Self {
            include_raw,
            limits,
            entries: Vec::new(),
            dropped_entries: 0,
            trimmed_fields: 0,
        }
    }

    pub fn include_raw_bodies(&self) -> bool {
        self.include_raw
    }

    /// Stores one call entry, trimming oversized string fields. Once
    /// `max_entries` is reached further entries are counted and discarded
    /// rather than grown or surfaced as errors.
    pub fn record(&mut self, entry: ApiLogEntry) {
        if self.limits.max_entries > 0 && self.entries.len() >= self.limits.max_entries {
            self.dropped_entries += 1;
            debug!(
                dropped = self.dropped_entries,
                max_entries = self.limits.max_entries,
                "API log entry dropped, recorder is full"
            );
            return;
        }

        let limited = self.limit_entry(entry);
        self.entries.push(limited);
    }

    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[ApiLogEntry] {
        &self.entries
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            dropped_entries: self.dropped_entries,
            trimmed_fields: self.trimmed_fields,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped_entries = 0;
        self.trimmed_fields = 0;
    }

    /// Pretty-printed JSON of every stored entry. Raw request/response text
    /// is omitted entirely (not nulled) unless raw capture is enabled on the
    /// recorder or forced through the override.
    pub fn to_json(&self, include_raw_override: Option<bool>) -> Result<String, Error> {
        let include_raw = include_raw_override.unwrap_or(self.include_raw);

        let payload: Vec<ApiLogEntry> = self
            .entries
            .iter()
            .cloned()
            .map(|mut entry| {
                if !include_raw {
                    entry.raw_request = None;
                    entry.raw_response = None;
                }
                entry
            })
            .collect();

        Ok(serde_json::to_string_pretty(&payload)?)
    }

    fn limit_entry(&mut self, mut entry: ApiLogEntry) -> ApiLogEntry {
        let max_chars = self.limits.max_field_chars;
        if max_chars == 0 {
            return entry;
        }

        let mut trimmed = 0u64;

        entry.url = limit_string(entry.url, max_chars, &mut trimmed);
        entry.request.headers = limit_string_map(entry.request.headers, max_chars, &mut trimmed);
        entry.request.data = entry
            .request
            .data
            .map(|v| limit_value(v, max_chars, &mut trimmed));
        entry.request.form = entry
            .request
            .form
            .map(|v| limit_value(v, max_chars, &mut trimmed));
        entry.request.query = entry
            .request
            .query
            .map(|v| limit_value(v, max_chars, &mut trimmed));
        entry.response.headers = limit_string_map(entry.response.headers, max_chars, &mut trimmed);
        entry.response.body = entry
            .response
            .body
            .map(|v| limit_value(v, max_chars, &mut trimmed));
        entry.raw_request = entry
            .raw_request
            .map(|s| limit_string(s, max_chars, &mut trimmed));
        entry.raw_response = entry
            .raw_response
            .map(|s| limit_string(s, max_chars, &mut trimmed));

        if trimmed > 0 {
            self.trimmed_fields += trimmed;
            debug!(
                trimmed,
                max_field_chars = max_chars,
                "Oversized API log fields trimmed"
            );
        }

        entry
    }
}

fn limit_string(value: String, max_chars: usize, trimmed: &mut u64) -> String {
    let total = value.chars().count();
    if total <= max_chars {
        return value;
    }

    let kept: String = value.chars().take(max_chars).collect();
    *trimmed += 1;
    format!("{}... [{} chars truncated]", kept, total - max_chars)
}

fn limit_string_map(
    map: std::collections::HashMap<String, String>,
    max_chars: usize,
    trimmed: &mut u64,
) -> std::collections::HashMap<String, String> {
    map.into_iter()
        .map(|(key, value)| (key, limit_string(value, max_chars, trimmed)))
        .collect()
}

fn limit_value(value: JsonValue, max_chars: usize, trimmed: &mut u64) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(limit_string(s, max_chars, trimmed)),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .into_iter()
                .map(|item| limit_value(item, max_chars, trimmed))
                .collect(),
        ),
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .map(|(key, val)| (key, limit_value(val, max_chars, trimmed)))
                .collect(),
        ),
        other => other,
    }
}
