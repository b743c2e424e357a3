use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    models::{circuit_breaker::CircuitBreakerConfig, entry::RecorderLimits, retry::RetryPolicy},
    reporting::AttachmentOptions,
};

const TRUTHY_FLAGS: [&str; 5] = ["1", "true", "yes", "on", "all"];
const FALSY_FLAGS: [&str; 4] = ["0", "false", "no", "off"];

const DEFAULT_MAX_LOG_ENTRIES: usize = 250;
const DEFAULT_MAX_FIELD_CHARS: usize = 4000;
const DEFAULT_ATTACHMENT_LIMIT_KB: i64 = 256;
const DEFAULT_STDOUT_LIMIT_KB: i64 = 64;
const DEFAULT_SUMMARY_LINE_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Off,
    ApiOnly,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutMode {
    Summary,
    Json,
}

/// Raw environment view; every value stays a string so a malformed setting
/// can fall back to its default instead of failing the run.
#[derive(Clone, Deserialize, Debug, Default)]
struct RawConfig {
    api_capture_raw_bodies: Option<String>,
    api_log_attach: Option<String>,
    api_log_mode: Option<String>,
    api_stdout_mode: Option<String>,
    api_max_log_entries: Option<String>,
    api_max_field_chars: Option<String>,
    api_attachment_limit_kb: Option<String>,
    api_stdout_limit_kb: Option<String>,
    api_summary_lines: Option<String>,

    circuit_breaker_failure_threshold: Option<String>,
    circuit_breaker_cooldown_ms: Option<String>,
    circuit_breaker_half_open_max_attempts: Option<String>,

    max_retry_attempts: Option<String>,
    initial_retry_delay_ms: Option<String>,
    max_retry_delay_ms: Option<String>,
    retry_timeout_ms: Option<String>,

    server_port: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub capture_raw_bodies: bool,
    pub attach_logs: bool,
    pub log_mode: LogMode,
    pub stdout_mode: StdoutMode,
    pub max_log_entries: usize,
    pub max_field_chars: usize,
    pub attachment_limit_bytes: Option<usize>,
    pub stdout_limit_bytes: Option<usize>,
    pub summary_line_limit: Option<usize>,

    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_ms: u64,
    pub circuit_breaker_half_open_max_attempts: u32,

    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_timeout_ms: u64,

    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let raw = envy::from_env::<RawConfig>()
            .map_err(|_| anyhow!("Invalid or missing environmental variable"))?;
        Ok(Self::resolve(raw))
    }

    /// Builds a config from an explicit key/value map, so tests can inject
    /// a fake environment without touching process state.
    pub fn from_env_map(env: &HashMap<String, String>) -> Self {
        let raw = envy::from_iter::<_, RawConfig>(env.clone()).unwrap_or_default();
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> Self {
        Self {
            capture_raw_bodies: parse_flag(raw.api_capture_raw_bodies.as_deref(), false),
            attach_logs: parse_flag(raw.api_log_attach.as_deref(), true),
            log_mode: parse_log_mode(raw.api_log_mode.as_deref()),
            stdout_mode: parse_stdout_mode(raw.api_stdout_mode.as_deref()),
            max_log_entries: parse_positive(
                raw.api_max_log_entries.as_deref(),
                DEFAULT_MAX_LOG_ENTRIES,
            ),
            max_field_chars: parse_positive(
                raw.api_max_field_chars.as_deref(),
                DEFAULT_MAX_FIELD_CHARS,
            ),
            attachment_limit_bytes: parse_limit_kb(
                raw.api_attachment_limit_kb.as_deref(),
                DEFAULT_ATTACHMENT_LIMIT_KB,
            ),
            stdout_limit_bytes: parse_limit_kb(
                raw.api_stdout_limit_kb.as_deref(),
                DEFAULT_STDOUT_LIMIT_KB,
            ),
            summary_line_limit: parse_line_limit(
                raw.api_summary_lines.as_deref(),
                DEFAULT_SUMMARY_LINE_LIMIT,
            ),
            circuit_breaker_failure_threshold: parse_positive(
                raw.circuit_breaker_failure_threshold.as_deref(),
                5,
            ),
            circuit_breaker_cooldown_ms: parse_number(
                raw.circuit_breaker_cooldown_ms.as_deref(),
                1000,
            ),
            circuit_breaker_half_open_max_attempts: parse_positive(
                raw.circuit_breaker_half_open_max_attempts.as_deref(),
                1,
            ),
            max_retry_attempts: parse_positive(raw.max_retry_attempts.as_deref(), 3),
            initial_retry_delay_ms: parse_number(raw.initial_retry_delay_ms.as_deref(), 100),
            max_retry_delay_ms: parse_number(raw.max_retry_delay_ms.as_deref(), 2000),
            retry_timeout_ms: parse_number(raw.retry_timeout_ms.as_deref(), 30_000),
            server_port: parse_positive(raw.server_port.as_deref(), 8089),
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            cooldown_ms: self.circuit_breaker_cooldown_ms,
            half_open_max_attempts: self.circuit_breaker_half_open_max_attempts,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            initial_backoff_ms: self.initial_retry_delay_ms,
            max_backoff_ms: self.max_retry_delay_ms,
            timeout_ms: self.retry_timeout_ms,
        }
    }

    pub fn recorder_limits(&self) -> RecorderLimits {
        RecorderLimits {
            max_entries: self.max_log_entries,
            max_field_chars: self.max_field_chars,
        }
    }

    pub fn attachment_options(&self) -> AttachmentOptions {
        AttachmentOptions {
            include_raw_bodies: self.capture_raw_bodies,
            limit_bytes: self.attachment_limit_bytes,
            summary_limit: self.summary_line_limit,
        }
    }

    pub fn should_emit_to_stdout(&self, suite_name: &str) -> bool {
        match self.log_mode {
            LogMode::Off => false,
            LogMode::All => true,
            LogMode::ApiOnly => suite_name.to_lowercase().contains("api"),
        }
    }
}

fn parse_flag(value: Option<&str>, default_value: bool) -> bool {
    let Some(value) = value else {
        return default_value;
    };

    let normalised = value.trim().to_lowercase();
    if TRUTHY_FLAGS.contains(&normalised.as_str()) {
        return true;
    }
    if FALSY_FLAGS.contains(&normalised.as_str()) {
        return false;
    }

    default_value
}

fn parse_log_mode(value: Option<&str>) -> LogMode {
    let Some(value) = value else {
        return LogMode::ApiOnly;
    };

    let normalised = value.trim().to_lowercase();
    if FALSY_FLAGS.contains(&normalised.as_str()) {
        return LogMode::Off;
    }
    if normalised == "api" || normalised == "api-only" {
        return LogMode::ApiOnly;
    }
    if TRUTHY_FLAGS.contains(&normalised.as_str()) {
        return LogMode::All;
    }

    LogMode::ApiOnly
}

fn parse_stdout_mode(value: Option<&str>) -> StdoutMode {
    match value.map(|v| v.trim().to_lowercase()) {
        Some(normalised) if normalised == "json" => StdoutMode::Json,
        _ => StdoutMode::Summary,
    }
}

fn parse_number<T>(value: Option<&str>, default_value: T) -> T
where
    T: std::str::FromStr,
{
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default_value)
}

fn parse_positive<T>(value: Option<&str>, default_value: T) -> T
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|parsed| *parsed > T::from(0u8))
        .unwrap_or(default_value)
}

fn parse_limit_kb(value: Option<&str>, default_kb: i64) -> Option<usize> {
    let kb = parse_number(value, default_kb);
    if kb <= 0 { None } else { Some(kb as usize * 1024) }
}

fn parse_line_limit(value: Option<&str>, default_lines: i64) -> Option<usize> {
    let lines = parse_number(value, default_lines);
    if lines <= 0 { None } else { Some(lines as usize) }
}
