//! Download Manager - owns the HTTP client and tracks running downloads
//!
//! This is the coordinator behind the public facade:
//! - Builds the shared client from settings
//! - Probes links
//! - Starts segmented and resumable downloads with settings applied
//! - Cancels individual downloads or everything at shutdown

use crate::client::{build_client, header_map};
use crate::engine::{
    content_length, ResumableTask, SegmentedDownload, SegmentedReport, StreamHandle,
};
use crate::error::RangedlError;
use crate::filename::filename_from_response;
use chrono::Utc;
use rangedl_types::{CoreEvent, DownloadTarget, LinkInfo, Settings};
use reqwest::header::{ACCEPT_RANGES, CONTENT_TYPE};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Download manager that coordinates all downloads
pub struct DownloadManager {
    /// HTTP client shared by every download
    client: Client,
    settings: Settings,
    /// Cancellation tokens of running downloads
    active: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Parent of every download token
    shutdown: CancellationToken,
    event_tx: broadcast::Sender<CoreEvent>,
}

impl DownloadManager {
    /// Create a new download manager
    pub fn new(
        settings: Settings,
        event_tx: broadcast::Sender<CoreEvent>,
    ) -> Result<Self, RangedlError> {
        let client = build_client(&settings)?;
        Ok(Self {
            client,
            settings,
            active: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            event_tx,
        })
    }

    /// Probe a URL for metadata without downloading it
    pub async fn probe_url(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<LinkInfo, RangedlError> {
        info!("Probing URL: {}", url);
        url::Url::parse(url).map_err(|e| RangedlError::InvalidUrl(format!("{}: {}", url, e)))?;

        let response = self
            .client
            .head(url)
            .headers(header_map(headers)?)
            .send()
            .await
            .map_err(RangedlError::Unreachable)?;

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(RangedlError::ServerError { status });
        }

        let filename = match filename_from_response(&response) {
            Ok(name) => Some(name),
            Err(e) => {
                warn!("No filename for {}: {}", url, e);
                None
            }
        };
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let resumable = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        Ok(LinkInfo {
            url: url.to_string(),
            final_url: response.url().to_string(),
            filename,
            size: content_length(response.headers()),
            content_type,
            resumable,
            probed_at: Utc::now(),
        })
    }

    /// Build a segmented download configured from settings
    ///
    /// `workers` overrides `Settings::segments`; both unset means one worker per CPU.
    pub fn segmented(&self, target: DownloadTarget, workers: Option<u32>) -> SegmentedDownload {
        let client = self.client.clone();
        let mut download = SegmentedDownload::new(target, client, self.event_tx.clone())
            .with_failure_policy(self.settings.failure_policy)
            .with_speed_limit(self.settings.speed_limit)
            .with_progress_interval(Duration::from_millis(self.settings.progress_interval_ms))
            .with_cancel(self.shutdown.child_token());
        if let Some(count) = workers.or(self.settings.segments) {
            download = download.with_workers(count);
        }
        download
    }

    /// Run a segmented download to completion
    pub async fn download_segmented(
        &self,
        download: SegmentedDownload,
    ) -> Result<SegmentedReport, RangedlError> {
        let id = download.id();
        self.active.write().await.insert(id, download.cancel_token());
        let result = download.run().await;
        self.active.write().await.remove(&id);
        result
    }

    /// Start a resumable single-stream download in the background
    pub async fn spawn_resumable(&self, target: DownloadTarget) -> StreamHandle {
        let task = ResumableTask::new(target, self.client.clone(), self.event_tx.clone())
            .with_progress_interval(Duration::from_millis(self.settings.progress_interval_ms))
            .with_cancel(self.shutdown.child_token());
        let id = task.id();
        self.active.write().await.insert(id, task.cancel_token());

        let active = self.active.clone();
        task.spawn_with(async move {
            active.write().await.remove(&id);
        })
    }

    /// Cancel one running download; false if it is not running
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.active.read().await.get(&id) {
            Some(token) => {
                info!("Cancelling download {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// IDs of downloads that have not finished yet
    pub async fn active_downloads(&self) -> Vec<Uuid> {
        self.active.read().await.keys().copied().collect()
    }

    /// Cancel everything this manager started
    pub fn shutdown(&self) {
        info!("Shutting down download manager");
        self.shutdown.cancel();
    }
}
