use anyhow::{Error, Result};
use serde::Serialize;

use crate::{
    clients::recorder::ApiRecorder,
    config::{Config, StdoutMode},
    models::entry::ApiLogEntry,
};

const URL_PREVIEW_CHARS: usize = 96;
const BODY_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentMode {
    Raw,
    Sanitised,
    Summary,
}

impl AttachmentMode {
    pub fn as_str(&self) -> &str {
        match self {
            AttachmentMode::Raw => "raw",
            AttachmentMode::Sanitised => "sanitised",
            AttachmentMode::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentOptions {
    pub include_raw_bodies: bool,
    pub limit_bytes: Option<usize>,
    pub summary_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AttachmentPayload {
    pub mode: AttachmentMode,
    pub payload: String,
    pub note: Option<String>,
}

/// Renders the recorder for a test artifact, degrading under the byte
/// budget: full raw JSON, then sanitised JSON, then a line summary, then a
/// hard-truncated summary as the last resort.
pub fn build_api_attachment_payload(
    recorder: &ApiRecorder,
    options: &AttachmentOptions,
) -> Result<AttachmentPayload, Error> {
    let limit = options.limit_bytes.unwrap_or(usize::MAX);

    if options.include_raw_bodies {
        let raw = recorder.to_json(Some(true))?;
        if raw.len() <= limit {
            return Ok(AttachmentPayload {
                mode: AttachmentMode::Raw,
                payload: raw,
                note: None,
            });
        }
    }

    let sanitised = recorder.to_json(Some(false))?;
    if sanitised.len() <= limit {
        let note = options.include_raw_bodies.then(|| {
            format!(
                "Raw payload exceeded {}; raw bodies omitted.",
                format_bytes(limit)
            )
        });
        return Ok(AttachmentPayload {
            mode: AttachmentMode::Sanitised,
            payload: sanitised,
            note,
        });
    }

    let (summary, skipped) = build_api_log_summary(recorder.entries(), options.summary_limit);
    if summary.len() <= limit {
        let mut note = format!(
            "Payload exceeded {}; attached a summary of {} calls.",
            format_bytes(limit),
            recorder.count()
        );
        if skipped > 0 {
            note.push_str(&format!(" {} further calls omitted.", skipped));
        }
        return Ok(AttachmentPayload {
            mode: AttachmentMode::Summary,
            payload: summary,
            note: Some(note),
        });
    }

    let (payload, truncated_bytes) = truncate_api_log_payload(&summary, Some(limit));
    Ok(AttachmentPayload {
        mode: AttachmentMode::Summary,
        payload,
        note: Some(format!(
            "Attachment truncated to {} ({} dropped).",
            format_bytes(limit),
            format_bytes(truncated_bytes)
        )),
    })
}

/// One line per call, newest last; returns the text and how many entries
/// fell outside the line limit.
pub fn build_api_log_summary(entries: &[ApiLogEntry], limit: Option<usize>) -> (String, usize) {
    let shown = limit.unwrap_or(usize::MAX).min(entries.len());

    let lines: Vec<String> = entries
        .iter()
        .take(shown)
        .enumerate()
        .map(|(index, entry)| summary_line(index + 1, entry))
        .collect();

    (lines.join("\n"), entries.len() - shown)
}

fn summary_line(index: usize, entry: &ApiLogEntry) -> String {
    let mut line = format!("{}. ", index);

    if let Some(name) = &entry.name {
        line.push_str(&format!("[{}] ", name));
    }

    line.push_str(&format!(
        "{} {} -> {}",
        entry.method,
        preview(&entry.url, URL_PREVIEW_CHARS),
        entry.status
    ));

    if !entry.ok {
        line.push_str(" !");
    }

    line.push_str(&format!(" ({}ms)", entry.duration_ms));

    if !entry.id.is_empty() {
        line.push_str(&format!(" id={}", entry.id));
    }

    if let Some(data) = &entry.request.data {
        line.push_str(&format!(
            " body={}",
            preview(&data.to_string(), BODY_PREVIEW_CHARS)
        ));
    }

    line
}

fn preview(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let kept: String = value.chars().take(max_chars).collect();
        format!("{}...", kept)
    }
}

/// Cuts a payload down to the byte limit on a char boundary, reporting how
/// many bytes were dropped. `None` means unbounded.
pub fn truncate_api_log_payload(payload: &str, limit_bytes: Option<usize>) -> (String, usize) {
    let Some(limit) = limit_bytes else {
        return (payload.to_string(), 0);
    };

    if payload.len() <= limit {
        return (payload.to_string(), 0);
    }

    let mut end = limit;
    while end > 0 && !payload.is_char_boundary(end) {
        end -= 1;
    }

    (payload[..end].to_string(), payload.len() - end)
}

pub fn format_bytes(bytes: usize) -> String {
    const KB: f64 = 1024.0;

    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }

    let value = bytes as f64;
    if value < KB * KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{:.1} MB", value / (KB * KB))
    }
}

/// Dumps the recorder to stdout as a summary or full JSON, within the
/// stdout byte budget. Suite gating follows the configured log mode.
pub fn emit_recorder_to_stdout(
    recorder: &ApiRecorder,
    config: &Config,
    suite_name: &str,
) -> Result<(), Error> {
    if !config.should_emit_to_stdout(suite_name) || !recorder.has_entries() {
        return Ok(());
    }

    let text = match config.stdout_mode {
        StdoutMode::Json => recorder.to_json(None)?,
        StdoutMode::Summary => {
            let (summary, skipped) =
                build_api_log_summary(recorder.entries(), config.summary_line_limit);
            if skipped > 0 {
                format!("{}\n... [{} more calls omitted]", summary, skipped)
            } else {
                summary
            }
        }
    };

    let (payload, truncated_bytes) = truncate_api_log_payload(&text, config.stdout_limit_bytes);
    println!("{}", payload);
    if truncated_bytes > 0 {
        println!("... [{} truncated]", format_bytes(truncated_bytes));
    }

    Ok(())
}
