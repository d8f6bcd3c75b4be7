//! Error types for rangedl core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while probing, fetching, or assembling a download
#[derive(Debug, Error)]
pub enum RangedlError {
    #[error("Server unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    #[error("Server does not support byte-range requests")]
    ResumeUnsupported,

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    #[error("Short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: u64, actual: u64 },

    #[error("Incomplete file: expected {expected} bytes, merged {actual}")]
    IncompleteFile { expected: u64, actual: u64 },

    #[error("File is already downloaded: {}", .0.display())]
    AlreadyDownloaded(PathBuf),

    #[error("No filename could be determined from the response")]
    FilenameUnresolvable,

    #[error("Response carries no usable Content-Length")]
    MissingContentLength,

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Download task panicked: {0}")]
    Panicked(String),
}

impl RangedlError {
    /// Check if a caller-side retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RangedlError::Unreachable(_)
            | RangedlError::Network(_)
            | RangedlError::ShortRead { .. }
            | RangedlError::IncompleteFile { .. } => true,
            RangedlError::ServerError { status } => *status >= 500,
            _ => false,
        }
    }
}

// Allow converting to String for event payloads
impl From<RangedlError> for String {
    fn from(error: RangedlError) -> Self {
        error.to_string()
    }
}
