//! Shared types for rangedl
//!
//! This crate contains the serializable data structures shared by the
//! download engine and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// User agent sent with every request unless settings override it
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

// ============================================================================
// Download Types
// ============================================================================

/// What to download and where to put it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTarget {
    /// Remote URL. The single-stream mode also accepts a `<kbps>:` prefix.
    pub url: String,
    pub output_dir: PathBuf,
    /// Filename override. When unset the name is resolved from the response.
    pub output_filename: Option<String>,
    /// Extra request headers, name -> value
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Lowercase hex SHA-256 the merged file must match
    #[serde(default)]
    pub expected_sha256: Option<String>,
}

impl DownloadTarget {
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output_dir: output_dir.into(),
            output_filename: None,
            headers: HashMap::new(),
            expected_sha256: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.output_filename = Some(filename.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into().to_ascii_lowercase());
        self
    }
}

/// Lifecycle status of a download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Probing,
    Downloading,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

/// Byte range of one planned segment plus what was actually received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub index: u32,
    pub from: u64,
    pub to: u64,
    pub received: u64,
}

/// What a segment failure does to the rest of a multi-segment download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let every worker finish, then fail at merge if bytes are missing
    #[default]
    BestEffort,
    /// Cancel the remaining workers and return the first segment error
    FailFast,
}

// ============================================================================
// Settings Types
// ============================================================================

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_output_dir: PathBuf,
    /// Worker count for segmented downloads (None = logical CPU count)
    pub segments: Option<u32>,
    /// Bytes per second shared by all workers of a segmented download
    pub speed_limit: Option<u64>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub failure_policy: FailurePolicy,
    /// How often progress events are emitted
    pub progress_interval_ms: u64,
    pub proxy: ProxySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            segments: None,
            speed_limit: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 180,
            connect_timeout_secs: 30,
            failure_policy: FailurePolicy::default(),
            progress_interval_ms: 500,
            proxy: ProxySettings::default(),
        }
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Proxy mode: "none", "system", or "manual"
    pub mode: String,
    /// HTTP proxy URL (for manual mode)
    pub http_proxy: Option<String>,
    /// HTTPS proxy URL (for manual mode)
    pub https_proxy: Option<String>,
    /// Bypass proxy for these hosts (comma-separated)
    pub no_proxy: Option<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            mode: "system".to_string(),
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the core while downloads run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    DownloadProgress {
        id: Uuid,
        downloaded: u64,
        total: Option<u64>,
        speed: u64,
        eta: Option<u64>, // seconds
    },
    SegmentCompleted {
        download_id: Uuid,
        segment_index: u32,
        bytes: u64,
    },
    SegmentFailed {
        download_id: Uuid,
        segment_index: u32,
        error: String,
    },
    DownloadStatusChanged {
        id: Uuid,
        status: DownloadStatus,
        error: Option<String>,
    },
}

// ============================================================================
// API Types
// ============================================================================

/// Information about a link (from probing)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInfo {
    pub url: String,
    pub final_url: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub resumable: bool,
    pub probed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_in_defaults() {
        let json = r#"{ "segments": 8, "proxy": { "mode": "none" } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.segments, Some(8));
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(settings.request_timeout_secs, 180);
        assert_eq!(settings.proxy.mode, "none");
        assert_eq!(settings.failure_policy, FailurePolicy::BestEffort);
    }

    #[test]
    fn target_builder_normalizes_digest() {
        let target = DownloadTarget::new("https://host/a.bin", "/tmp")
            .with_filename("b.bin")
            .with_header("Cookie", "k=v")
            .with_sha256("ABCDEF");
        assert_eq!(target.output_filename.as_deref(), Some("b.bin"));
        assert_eq!(target.headers.get("Cookie").map(String::as_str), Some("k=v"));
        assert_eq!(target.expected_sha256.as_deref(), Some("abcdef"));
    }
}
