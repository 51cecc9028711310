//! Purpose: Define the structured stderr envelope for engine log lines.
//! Exports: `LogNotice`, `log_notice_json`, `notice_time_now`.
//! Role: Shared contract helper for the CLI's `--log-verbosity` output.
//! Invariants: One JSON object per line; never mixed into stdout payloads.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use crate::api::LogMessage;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogNotice {
    pub time: String,
    #[serde(rename = "level")]
    pub verbosity_level: i32,
    pub message: String,
}

impl LogNotice {
    pub fn from_message(message: LogMessage, time: String) -> Self {
        Self {
            time,
            verbosity_level: message.verbosity_level,
            message: message.message,
        }
    }
}

pub fn log_notice_json(notice: &LogNotice) -> Value {
    json!({ "log": notice })
}

/// RFC 3339 wall-clock time, or `None` if the clock is before the epoch.
pub fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}
