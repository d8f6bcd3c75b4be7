//! rangedl Core - Download Engine
//!
//! This crate provides the download engine behind the `rangedl` CLI.
//! It handles multi-segment parallel downloads, resumable single-stream
//! downloads, rate limiting, link probing and progress events.
//!
//! ```no_run
//! use rangedl_core::RangedlCore;
//! use rangedl_types::{DownloadTarget, Settings};
//!
//! # async fn demo() -> Result<(), rangedl_core::RangedlError> {
//! let core = RangedlCore::new(Settings::default())?;
//! let target = DownloadTarget::new("https://example.com/file.iso", "/tmp");
//! let report = core.download_segmented(target, Some(4)).await?;
//! println!("{} bytes at {:?}", report.file_size, report.path);
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
pub mod engine;
mod error;
mod filename;

pub use client::*;
pub use config::*;
pub use engine::{
    parse_rate_prefix, plan_ranges, MergeVerifier, RateLimiter, ResumableTask, Segment,
    SegmentFetcher, SegmentedDownload, SegmentedReport, Sha256Verifier, StreamHandle,
    StreamOutcome, StreamProgress,
};
pub use error::*;
pub use filename::*;

use engine::DownloadManager;
use rangedl_types::{CoreEvent, DownloadTarget, LinkInfo, Settings};
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the event channel; slow subscribers miss the oldest events
const EVENT_CAPACITY: usize = 1024;

/// The main rangedl core instance
pub struct RangedlCore {
    /// Event broadcaster
    event_tx: broadcast::Sender<CoreEvent>,
    /// Download manager
    download_manager: DownloadManager,
}

impl RangedlCore {
    /// Create a new core instance from settings
    pub fn new(settings: Settings) -> Result<Self, RangedlError> {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let download_manager = DownloadManager::new(settings, event_tx.clone())?;
        Ok(Self {
            event_tx,
            download_manager,
        })
    }

    /// Subscribe to core events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_tx.subscribe()
    }

    /// Probe a link without downloading it
    pub async fn probe(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<LinkInfo, RangedlError> {
        self.download_manager.probe_url(url, headers).await
    }

    /// Prepare a segmented download with settings applied, for further tuning
    pub fn segmented(&self, target: DownloadTarget, workers: Option<u32>) -> SegmentedDownload {
        self.download_manager.segmented(target, workers)
    }

    /// Download `target` in parallel segments
    pub async fn download_segmented(
        &self,
        target: DownloadTarget,
        workers: Option<u32>,
    ) -> Result<SegmentedReport, RangedlError> {
        let download = self.download_manager.segmented(target, workers);
        self.download_manager.download_segmented(download).await
    }

    /// Run a download prepared with [`RangedlCore::segmented`]
    pub async fn run_segmented(
        &self,
        download: SegmentedDownload,
    ) -> Result<SegmentedReport, RangedlError> {
        self.download_manager.download_segmented(download).await
    }

    /// Start a resumable single-stream download in the background
    pub async fn spawn_resumable(&self, target: DownloadTarget) -> StreamHandle {
        self.download_manager.spawn_resumable(target).await
    }

    /// Cancel a running download
    pub async fn cancel(&self, id: Uuid) -> bool {
        self.download_manager.cancel(id).await
    }

    /// Cancel every running download
    pub fn shutdown(&self) {
        self.download_manager.shutdown();
    }
}
