//! Output formatting utilities

use chrono::{DateTime, Utc};
use rangedl_core::StreamOutcome;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Print a value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Serializable view of a stream task's outcome
#[derive(Debug, Serialize)]
pub struct StreamSummary {
    pub id: Uuid,
    pub path: Option<PathBuf>,
    pub read_num: u64,
    pub file_size: u64,
    pub is_resume: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u128,
    pub error: Option<String>,
}

impl From<&StreamOutcome> for StreamSummary {
    fn from(outcome: &StreamOutcome) -> Self {
        Self {
            id: outcome.id,
            path: outcome.path.clone(),
            read_num: outcome.read_num,
            file_size: outcome.file_size,
            is_resume: outcome.is_resume,
            started_at: outcome.started_at,
            elapsed_ms: outcome.elapsed.as_millis(),
            error: outcome.result.as_ref().err().map(|e| e.to_string()),
        }
    }
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format speed as human-readable
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec as f64))
}

/// Format a duration like `1m 5s` or `2.4s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

/// Average throughput over a whole transfer
pub fn average_speed(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}
