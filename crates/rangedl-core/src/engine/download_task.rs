//! Multi-segment download - probes, plans, fetches concurrently, merges
//!
//! This is the orchestrator for one parallel download. Every planned range
//! gets its own worker; results come back through a `JoinSet` keyed by
//! segment index, so each slot is written exactly once and merging waits
//! for every worker to finish.

use crate::client::header_map;
use crate::engine::{
    contain_panic, content_length, default_worker_count, plan_segments, spawn_progress_reporter,
    MergeVerifier, RateLimiter, Segment, SegmentFetcher, Sha256Verifier,
};
use crate::error::RangedlError;
use crate::filename::output_filename;
use chrono::{DateTime, Utc};
use rangedl_types::{CoreEvent, DownloadStatus, DownloadTarget, FailurePolicy, SegmentSummary};
use reqwest::header::{HeaderMap, ACCEPT_RANGES};
use reqwest::Client;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the HEAD probe learned about the resource
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub final_url: String,
    pub filename: String,
    pub file_size: u64,
}

/// State of one multi-segment download between probe and merge
#[derive(Debug)]
pub struct DownloadSession {
    pub file_size: u64,
    /// Ordered by index; slot `i` is only ever filled by worker `i`
    pub segments: Vec<Segment>,
    pub output_path: PathBuf,
}

impl DownloadSession {
    pub fn new(file_size: u64, worker_count: u32, output_path: PathBuf) -> Self {
        Self {
            file_size,
            segments: plan_segments(file_size, worker_count),
            output_path,
        }
    }

    /// Total bytes received across all segments
    pub fn received(&self) -> u64 {
        self.segments.iter().map(Segment::received).sum()
    }
}

/// Result of a finished multi-segment download
#[derive(Debug, Clone, Serialize)]
pub struct SegmentedReport {
    pub id: Uuid,
    pub path: PathBuf,
    pub file_size: u64,
    pub segments: Vec<SegmentSummary>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// A parallel, range-split download of one resource
pub struct SegmentedDownload {
    id: Uuid,
    target: DownloadTarget,
    client: Client,
    worker_count: u32,
    failure_policy: FailurePolicy,
    speed_limit: Option<u64>,
    progress_interval: Duration,
    verifier: Option<Box<dyn MergeVerifier>>,
    event_tx: broadcast::Sender<CoreEvent>,
    cancel: CancellationToken,
    downloaded_bytes: Arc<AtomicU64>,
}

impl SegmentedDownload {
    /// Create a download with one worker per logical CPU and best-effort failures
    pub fn new(
        target: DownloadTarget,
        client: Client,
        event_tx: broadcast::Sender<CoreEvent>,
    ) -> Self {
        let verifier = target
            .expected_sha256
            .as_ref()
            .map(|digest| Box::new(Sha256Verifier::new(digest.clone())) as Box<dyn MergeVerifier>);

        Self {
            id: Uuid::new_v4(),
            target,
            client,
            worker_count: default_worker_count(),
            failure_policy: FailurePolicy::default(),
            speed_limit: None,
            progress_interval: Duration::from_millis(500),
            verifier,
            event_tx,
            cancel: CancellationToken::new(),
            downloaded_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_workers(mut self, worker_count: u32) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Share one limiter of `bytes_per_second` across all workers
    pub fn with_speed_limit(mut self, bytes_per_second: Option<u64>) -> Self {
        self.speed_limit = bytes_per_second.filter(|&l| l > 0);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Replace the post-merge check (by default SHA-256 when the target has a digest)
    pub fn with_verifier(mut self, verifier: Box<dyn MergeVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token that aborts this download at its next blocking point
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the download to completion
    pub async fn run(mut self) -> Result<SegmentedReport, RangedlError> {
        info!(
            "Starting segmented download {}: {} with {} workers",
            self.id, self.target.url, self.worker_count
        );
        let started_at = Utc::now();
        let clock = Instant::now();
        self.emit_status(DownloadStatus::Probing, None);

        let result = self.execute().await;
        match &result {
            Ok(session) => {
                info!(
                    "Download {} completed: {:?} ({} bytes)",
                    self.id, session.output_path, session.file_size
                );
                self.emit_status(DownloadStatus::Completed, None);
            }
            Err(RangedlError::Cancelled) => {
                info!("Download {} cancelled", self.id);
                self.emit_status(DownloadStatus::Cancelled, None);
            }
            Err(e) => {
                error!("Download {} failed: {}", self.id, e);
                self.emit_status(DownloadStatus::Failed, Some(e.to_string()));
            }
        }

        let session = result?;
        Ok(SegmentedReport {
            id: self.id,
            path: session.output_path.clone(),
            file_size: session.file_size,
            segments: session.segments.iter().map(Segment::summary).collect(),
            started_at,
            elapsed: clock.elapsed(),
        })
    }

    async fn execute(&mut self) -> Result<DownloadSession, RangedlError> {
        let headers = header_map(&self.target.headers)?;
        let probe = self.probe(&headers).await?;

        let output_path = self.target.output_dir.join(&probe.filename);
        let mut session = DownloadSession::new(probe.file_size, self.worker_count, output_path);
        info!(
            "Download {}: {} bytes into {:?}, {} segments",
            self.id,
            session.file_size,
            session.output_path,
            session.segments.len()
        );
        debug!(
            "Planned ranges: {:?}",
            session
                .segments
                .iter()
                .map(|s| (s.from, s.to))
                .collect::<Vec<_>>()
        );

        self.emit_status(DownloadStatus::Downloading, None);
        self.fetch_all(&mut session, &probe.final_url, headers).await?;

        self.emit_status(DownloadStatus::Merging, None);
        self.merge(&session).await?;
        Ok(session)
    }

    /// HEAD the target: require range support, learn size and filename
    pub async fn probe(&self, headers: &HeaderMap) -> Result<ProbeResult, RangedlError> {
        info!("Probing URL: {}", self.target.url);
        let request = self.client.head(&self.target.url).headers(headers.clone());

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RangedlError::Cancelled),
            response = request.send() => response.map_err(RangedlError::Unreachable)?,
        };

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(RangedlError::ServerError { status });
        }

        let accepts_ranges = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
        if !accepts_ranges {
            return Err(RangedlError::ResumeUnsupported);
        }

        let filename = output_filename(self.target.output_filename.as_deref(), &response)?;

        let file_size =
            content_length(response.headers()).ok_or(RangedlError::MissingContentLength)?;

        Ok(ProbeResult {
            final_url: response.url().to_string(),
            filename,
            file_size,
        })
    }

    /// Launch one worker per segment and wait for all of them
    async fn fetch_all(
        &self,
        session: &mut DownloadSession,
        url: &str,
        headers: HeaderMap,
    ) -> Result<(), RangedlError> {
        let reporter_stop = CancellationToken::new();
        let reporter = spawn_progress_reporter(
            self.id,
            self.downloaded_bytes.clone(),
            Arc::new(AtomicU64::new(session.file_size)),
            self.progress_interval,
            self.event_tx.clone(),
            reporter_stop.clone(),
        );

        let workers_cancel = self.cancel.child_token();
        let mut fetcher = SegmentFetcher::new(self.client.clone(), url, headers)
            .with_progress(self.downloaded_bytes.clone())
            .with_cancel(workers_cancel.clone());
        if let Some(limit) = self.speed_limit {
            fetcher = fetcher.with_rate_limiter(Arc::new(Mutex::new(RateLimiter::new(limit))));
        }

        let mut join_set = JoinSet::new();
        for segment in &session.segments {
            let fetcher = fetcher.clone();
            let (index, from, to) = (segment.index, segment.from, segment.to);
            info!("Starting segment {} (bytes {}-{})", index, from, to);
            join_set.spawn(async move {
                (index, contain_panic(fetcher.fetch(from, to)).await)
            });
        }

        let mut first_error: Option<RangedlError> = None;
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Segment task failed to join: {}", e);
                    continue;
                }
            };

            match result {
                Ok(data) => {
                    let bytes = data.len() as u64;
                    info!("Segment {} complete ({} bytes)", index, bytes);
                    session.segments[index as usize].data = Some(data);
                    let _ = self.event_tx.send(CoreEvent::SegmentCompleted {
                        download_id: self.id,
                        segment_index: index,
                        bytes,
                    });
                }
                Err(RangedlError::Cancelled) => {
                    debug!("Segment {} cancelled", index);
                }
                Err(e) => {
                    let segment = &session.segments[index as usize];
                    error!(
                        "Segment {} (bytes {}-{}) failed: {}",
                        index, segment.from, segment.to, e
                    );
                    let _ = self.event_tx.send(CoreEvent::SegmentFailed {
                        download_id: self.id,
                        segment_index: index,
                        error: e.to_string(),
                    });
                    if self.failure_policy == FailurePolicy::FailFast && first_error.is_none() {
                        warn!("Fail-fast: cancelling remaining segments of {}", self.id);
                        workers_cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }

        reporter_stop.cancel();
        let _ = reporter.await;

        if self.cancel.is_cancelled() {
            return Err(RangedlError::Cancelled);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Concatenate segments in index order and check the result
    async fn merge(&mut self, session: &DownloadSession) -> Result<(), RangedlError> {
        info!(
            "Merging {} segments into {:?}",
            session.segments.len(),
            session.output_path
        );

        if !self.target.output_dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(&self.target.output_dir).await?;
        }
        let mut output = File::create(&session.output_path).await?;
        let mut verifier = self.verifier.take();

        let mut total: u64 = 0;
        for segment in &session.segments {
            match &segment.data {
                Some(data) => {
                    output.write_all(data).await?;
                    if let Some(v) = verifier.as_mut() {
                        v.update(data);
                    }
                    total += data.len() as u64;
                }
                None => warn!("Segment {} has no data, merged file will be short", segment.index),
            }
        }
        output.flush().await?;
        output.sync_all().await?;

        if total != session.file_size {
            return Err(RangedlError::IncompleteFile {
                expected: session.file_size,
                actual: total,
            });
        }
        if let Some(v) = verifier {
            v.finish()?;
            info!("Checksum verified for {:?}", session.output_path);
        }

        info!("Merge complete: {:?}", session.output_path);
        Ok(())
    }

    fn emit_status(&self, status: DownloadStatus, error: Option<String>) {
        let _ = self.event_tx.send(CoreEvent::DownloadStatusChanged {
            id: self.id,
            status,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_plans_segments_and_sums_received() {
        let mut session = DownloadSession::new(10, 3, PathBuf::from("/tmp/out.bin"));
        assert_eq!(session.segments.len(), 3);
        assert_eq!(session.received(), 0);

        let len = session.segments[1].len() as usize;
        session.segments[1].data = Some(vec![0u8; len]);
        assert_eq!(session.received(), len as u64);
    }
}
