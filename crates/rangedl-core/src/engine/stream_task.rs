//! Resumable single-stream download
//!
//! One connection, one writer. If a partial file with the resolved name is
//! already on disk, the task asks the server for the missing suffix and
//! appends to it. The flow is an explicit state machine:
//!
//! ```text
//! Idle -> Probing -> Resuming | Fresh -> Streaming -> Done
//! ```
//!
//! Any state may jump straight to `Done` with an error. The final
//! [`StreamOutcome`] is delivered exactly once through [`StreamHandle::wait`],
//! even if the task panics.

use crate::client::header_map;
use crate::engine::{
    contain_panic, content_length, parse_rate_prefix, spawn_progress_reporter, RateLimiter,
};
use crate::error::RangedlError;
use crate::filename::output_filename;
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use rangedl_types::{CoreEvent, DownloadStatus, DownloadTarget};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response};
use std::future::Future;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bytes read from the body per loop iteration
const BUFFER_SIZE: usize = 1024;

/// Live state shared between the I/O task, its progress reporter and the caller.
///
/// `read_num` has a single writer (the streaming loop); everyone else only
/// loads it. The write-once fields are set when the task learns them.
#[derive(Debug, Default)]
pub struct StreamProgress {
    read_num: Arc<AtomicU64>,
    file_size: Arc<AtomicU64>,
    is_resume: AtomicBool,
    path: OnceLock<PathBuf>,
    started: OnceLock<(DateTime<Utc>, Instant)>,
}

impl StreamProgress {
    /// Bytes present in the output file so far, including resumed bytes
    pub fn read_num(&self) -> u64 {
        self.read_num.load(Ordering::Acquire)
    }

    /// Expected final size (0 until known)
    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Acquire)
    }

    pub fn is_resume(&self) -> bool {
        self.is_resume.load(Ordering::Acquire)
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.get()
    }
}

/// Terminal result of a stream task
#[derive(Debug)]
pub struct StreamOutcome {
    pub id: Uuid,
    pub result: Result<(), RangedlError>,
    pub path: Option<PathBuf>,
    pub read_num: u64,
    pub file_size: u64,
    pub is_resume: bool,
    /// When streaming began; `None` if the task never got that far
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed: Duration,
}

impl StreamOutcome {
    fn from_progress(
        id: Uuid,
        progress: &StreamProgress,
        result: Result<(), RangedlError>,
    ) -> Self {
        let (started_at, elapsed) = match progress.started.get() {
            Some((wall, clock)) => (Some(*wall), clock.elapsed()),
            None => (None, Duration::ZERO),
        };
        Self {
            id,
            result,
            path: progress.path().cloned(),
            read_num: progress.read_num(),
            file_size: progress.file_size(),
            is_resume: progress.is_resume(),
            started_at,
            elapsed,
        }
    }
}

/// Caller side of a running stream task
pub struct StreamHandle {
    id: Uuid,
    progress: Arc<StreamProgress>,
    cancel: CancellationToken,
    outcome_rx: oneshot::Receiver<StreamOutcome>,
}

impl StreamHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn progress(&self) -> &StreamProgress {
        &self.progress
    }

    /// Ask the task to stop at its next blocking point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> StreamOutcome {
        match self.outcome_rx.await {
            Ok(outcome) => outcome,
            Err(_) => StreamOutcome::from_progress(
                self.id,
                &self.progress,
                Err(RangedlError::Panicked("stream task dropped its result".to_string())),
            ),
        }
    }
}

/// States of a single-stream download
enum StreamState {
    Idle,
    Probing {
        response: Response,
    },
    Resuming {
        response: Response,
        path: PathBuf,
        existing: u64,
    },
    Fresh {
        response: Response,
        path: PathBuf,
    },
    Streaming {
        response: Response,
        file: File,
        total: u64,
    },
    Done(Result<(), RangedlError>),
}

/// A resumable single-connection download
pub struct ResumableTask {
    id: Uuid,
    client: Client,
    url: String,
    target: DownloadTarget,
    rate_limit: Option<u64>,
    progress_interval: Duration,
    event_tx: broadcast::Sender<CoreEvent>,
    cancel: CancellationToken,
    progress: Arc<StreamProgress>,
}

impl ResumableTask {
    /// Create a task for `target`; a `<kbps>:` prefix on its URL sets the rate limit
    pub fn new(
        target: DownloadTarget,
        client: Client,
        event_tx: broadcast::Sender<CoreEvent>,
    ) -> Self {
        let (rate_limit, url) = parse_rate_prefix(&target.url);
        let url = url.to_string();
        Self {
            id: Uuid::new_v4(),
            client,
            url,
            target,
            rate_limit,
            progress_interval: Duration::from_millis(500),
            event_tx,
            cancel: CancellationToken::new(),
            progress: Arc::new(StreamProgress::default()),
        }
    }

    /// Override the rate limit in bytes per second (`None` = unlimited)
    pub fn with_rate_limit(mut self, bytes_per_second: Option<u64>) -> Self {
        self.rate_limit = bytes_per_second.filter(|&l| l > 0);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The URL actually requested, without any rate prefix
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn rate_limit(&self) -> Option<u64> {
        self.rate_limit
    }

    /// Start the task in the background
    pub fn spawn(self) -> StreamHandle {
        self.spawn_with(async {})
    }

    /// Start the task and run `cleanup` after it ends, before the outcome is delivered
    pub(crate) fn spawn_with<F>(self, cleanup: F) -> StreamHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let handle = StreamHandle {
            id: self.id,
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
            outcome_rx,
        };

        tokio::spawn(async move {
            let id = self.id;
            let outcome = self.run().await;
            if let Err(e) = contain_panic(cleanup.map(Ok::<(), RangedlError>)).await {
                error!("Cleanup after stream download {} failed: {}", id, e);
            }
            let _ = outcome_tx.send(outcome);
        });
        handle
    }

    /// Run the task to completion on the current task
    pub async fn run(self) -> StreamOutcome {
        info!("Starting stream download {}: {}", self.id, self.url);
        let id = self.id;
        let progress = self.progress.clone();
        let event_tx = self.event_tx.clone();

        let result = contain_panic(self.drive()).await;
        if let Err(RangedlError::Panicked(message)) = &result {
            error!("Stream download {} panicked: {}", id, message);
        }

        let (status, error_text) = match &result {
            Ok(()) => {
                info!("Stream download {} completed ({} bytes)", id, progress.read_num());
                (DownloadStatus::Completed, None)
            }
            Err(RangedlError::Cancelled) => (DownloadStatus::Cancelled, None),
            Err(e) => {
                warn!("Stream download {} ended with error: {}", id, e);
                (DownloadStatus::Failed, Some(e.to_string()))
            }
        };
        let _ = event_tx.send(CoreEvent::DownloadStatusChanged {
            id,
            status,
            error: error_text,
        });

        StreamOutcome::from_progress(id, &progress, result)
    }

    async fn drive(self) -> Result<(), RangedlError> {
        let headers = header_map(&self.target.headers)?;
        let mut state = StreamState::Idle;
        loop {
            state = match state {
                StreamState::Done(result) => return result,
                other => self.advance(other, &headers).await,
            };
        }
    }

    async fn advance(&self, state: StreamState, headers: &HeaderMap) -> StreamState {
        let next = match state {
            StreamState::Idle => self.probe(headers).await,
            StreamState::Probing { response } => self.prepare(response, headers).await,
            StreamState::Resuming {
                response,
                path,
                existing,
            } => self.open_resumed(response, path, existing).await,
            StreamState::Fresh { response, path } => self.open_fresh(response, path).await,
            StreamState::Streaming {
                response,
                file,
                total,
            } => Ok(StreamState::Done(self.stream(response, file, total).await)),
            done @ StreamState::Done(_) => Ok(done),
        };
        next.unwrap_or_else(|e| StreamState::Done(Err(e)))
    }

    /// Idle -> Probing: plain GET
    async fn probe(&self, headers: &HeaderMap) -> Result<StreamState, RangedlError> {
        self.emit_status(DownloadStatus::Probing);
        let response = self.send(headers.clone()).await?;
        Ok(StreamState::Probing { response })
    }

    /// Probing -> Resuming | Fresh: compare the local file against the remote size
    async fn prepare(
        &self,
        response: Response,
        headers: &HeaderMap,
    ) -> Result<StreamState, RangedlError> {
        let filename = output_filename(self.target.output_filename.as_deref(), &response)?;
        let path = self.target.output_dir.join(filename);
        let _ = self.progress.path.set(path.clone());

        let remote_size = content_length(response.headers());
        let existing = match tokio::fs::metadata(&path).await {
            Ok(meta) if !meta.is_dir() => Some(meta.len()),
            _ => None,
        };

        match (existing, remote_size) {
            (Some(size), Some(remote)) if size == remote => {
                info!("{:?} already holds all {} bytes", path, remote);
                self.progress.file_size.store(remote, Ordering::Release);
                self.progress.read_num.store(size, Ordering::Release);
                Err(RangedlError::AlreadyDownloaded(path))
            }
            (Some(size), Some(remote)) if size < remote => {
                drop(response);
                info!(
                    "Found partial file {:?} ({} of {} bytes), requesting the rest",
                    path, size, remote
                );
                let mut ranged = headers.clone();
                ranged.insert(RANGE, range_from(size)?);
                let response = self.send(ranged).await?;

                if response.status().as_u16() == 206 && signals_range_support(response.headers()) {
                    Ok(StreamState::Resuming {
                        response,
                        path,
                        existing: size,
                    })
                } else {
                    info!("Server ignored the range request, restarting {:?}", path);
                    Ok(StreamState::Fresh { response, path })
                }
            }
            (Some(size), remote) => {
                warn!(
                    "Local file {:?} ({} bytes) does not match remote size {:?}, starting over",
                    path, size, remote
                );
                Ok(StreamState::Fresh { response, path })
            }
            (None, _) => Ok(StreamState::Fresh { response, path }),
        }
    }

    /// Resuming -> Streaming: append to the partial file
    async fn open_resumed(
        &self,
        response: Response,
        path: PathBuf,
        existing: u64,
    ) -> Result<StreamState, RangedlError> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path).await?;
        file.seek(SeekFrom::End(0)).await?;

        self.progress.read_num.store(existing, Ordering::Release);
        self.progress.is_resume.store(true, Ordering::Release);
        let total = content_length(response.headers()).unwrap_or(0) + existing;
        info!("Resuming {:?} at byte {} of {}", path, existing, total);

        Ok(StreamState::Streaming {
            response,
            file,
            total,
        })
    }

    /// Fresh -> Streaming: write a new file
    async fn open_fresh(
        &self,
        response: Response,
        path: PathBuf,
    ) -> Result<StreamState, RangedlError> {
        if !self.target.output_dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(&self.target.output_dir).await?;
        }
        let file = File::create(&path).await?;
        self.progress.read_num.store(0, Ordering::Release);
        let total = content_length(response.headers()).unwrap_or(0);
        debug!("Writing {:?} from scratch ({} bytes expected)", path, total);

        Ok(StreamState::Streaming {
            response,
            file,
            total,
        })
    }

    /// Streaming -> Done: copy the body into the file in fixed-size reads
    async fn stream(
        &self,
        response: Response,
        mut file: File,
        total: u64,
    ) -> Result<(), RangedlError> {
        self.progress.file_size.store(total, Ordering::Release);
        let _ = self.progress.started.set((Utc::now(), Instant::now()));
        self.emit_status(DownloadStatus::Downloading);

        let reporter_stop = CancellationToken::new();
        let reporter = spawn_progress_reporter(
            self.id,
            self.progress.read_num.clone(),
            self.progress.file_size.clone(),
            self.progress_interval,
            self.event_tx.clone(),
            reporter_stop.clone(),
        );

        let result = self.copy_body(response, &mut file).await;
        let flushed = file.flush().await.map_err(RangedlError::from);

        reporter_stop.cancel();
        let _ = reporter.await;
        result.and(flushed)
    }

    async fn copy_body(&self, response: Response, file: &mut File) -> Result<(), RangedlError> {
        let mut limiter = self.rate_limit.map(RateLimiter::new);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        let mut reader = StreamReader::new(body);
        let mut buf = [0u8; BUFFER_SIZE];

        loop {
            if let Some(limiter) = limiter.as_mut() {
                limiter.wait(self.progress.read_num(), &self.cancel).await?;
            }

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RangedlError::Cancelled),
                read = reader.read(&mut buf) => read.map_err(body_error)?,
            };
            if read == 0 {
                return Ok(());
            }

            let written = file.write(&buf[..read]).await?;
            if written != read {
                return Err(RangedlError::ShortWrite {
                    expected: read as u64,
                    actual: written as u64,
                });
            }
            self.progress
                .read_num
                .fetch_add(read as u64, Ordering::AcqRel);
        }
    }

    async fn send(&self, headers: HeaderMap) -> Result<Response, RangedlError> {
        let request = self.client.get(&self.url).headers(headers);
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RangedlError::Cancelled),
            response = request.send() => response.map_err(RangedlError::Unreachable)?,
        };

        let status = response.status().as_u16();
        if status != 200 && status != 206 {
            return Err(RangedlError::ServerError { status });
        }
        Ok(response)
    }

    fn emit_status(&self, status: DownloadStatus) {
        let _ = self.event_tx.send(CoreEvent::DownloadStatusChanged {
            id: self.id,
            status,
            error: None,
        });
    }
}

fn range_from(offset: u64) -> Result<HeaderValue, RangedlError> {
    HeaderValue::from_str(&format!("bytes={}-", offset))
        .map_err(|e| RangedlError::InvalidHeader(e.to_string()))
}

/// `Accept-Ranges: bytes` or any `Content-Range` means the suffix request was honored
fn signals_range_support(headers: &HeaderMap) -> bool {
    let accepts_bytes = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);
    accepts_bytes || headers.contains_key(CONTENT_RANGE)
}

/// Unwrap a transport error that travelled through the `AsyncRead` adapter
fn body_error(e: std::io::Error) -> RangedlError {
    let is_transport = e
        .get_ref()
        .map(|inner| inner.is::<reqwest::Error>())
        .unwrap_or(false);
    if is_transport {
        if let Some(inner) = e.into_inner() {
            if let Ok(transport) = inner.downcast::<reqwest::Error>() {
                return RangedlError::Network(*transport);
            }
        }
        return RangedlError::Io(std::io::Error::other("response body failed"));
    }
    RangedlError::Io(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_support_from_either_header() {
        let mut headers = HeaderMap::new();
        assert!(!signals_range_support(&headers));

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));
        assert!(!signals_range_support(&headers));

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("Bytes"));
        assert!(signals_range_support(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 10-99/100"));
        assert!(signals_range_support(&headers));
    }

    #[test]
    fn suffix_range_header() {
        assert_eq!(range_from(4096).unwrap(), "bytes=4096-");
    }

    #[test]
    fn rate_prefix_is_stripped_from_request_url() {
        let (tx, _rx) = broadcast::channel(4);
        let target = DownloadTarget::new("250:http://example.com/file.bin", "/tmp");
        let task = ResumableTask::new(target, Client::new(), tx);
        assert_eq!(task.url(), "http://example.com/file.bin");
        assert_eq!(task.rate_limit(), Some(250_000));

        let task = task.with_rate_limit(None);
        assert_eq!(task.rate_limit(), None);
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let err = body_error(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(err, RangedlError::Io(_)));
    }

    #[tokio::test]
    async fn outcome_without_streaming_has_no_start() {
        let progress = StreamProgress::default();
        let outcome =
            StreamOutcome::from_progress(Uuid::nil(), &progress, Err(RangedlError::Cancelled));
        assert!(outcome.started_at.is_none());
        assert_eq!(outcome.elapsed, Duration::ZERO);
        assert_eq!(outcome.read_num, 0);
        assert!(!outcome.is_resume);
    }

    #[tokio::test]
    async fn lost_task_still_yields_a_panicked_outcome() {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let progress = Arc::new(StreamProgress::default());
        progress.read_num.store(512, Ordering::Release);
        let handle = StreamHandle {
            id: Uuid::nil(),
            progress,
            cancel: CancellationToken::new(),
            outcome_rx,
        };

        // The task died without reporting.
        tokio::spawn(async move {
            let _tx = outcome_tx;
            panic!("stream task exploded");
        });

        let outcome = handle.wait().await;
        assert!(matches!(outcome.result, Err(RangedlError::Panicked(_))));
        assert_eq!(outcome.read_num, 512);
    }

    #[tokio::test]
    async fn panicking_cleanup_does_not_swallow_the_outcome() {
        let (tx, mut rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let target = DownloadTarget::new("http://127.0.0.1:9/file.bin", "/tmp");
        let handle = ResumableTask::new(target, Client::new(), tx)
            .with_cancel(cancel)
            .spawn_with(async {
                if true {
                    panic!("cleanup exploded");
                }
            });

        let outcome = handle.wait().await;
        assert!(matches!(outcome.result, Err(RangedlError::Cancelled)));

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::DownloadStatusChanged { status, .. } = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![DownloadStatus::Probing, DownloadStatus::Cancelled]);
    }
}
