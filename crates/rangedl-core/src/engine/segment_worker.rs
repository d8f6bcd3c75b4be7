//! Segment fetcher - downloads one byte range into memory
//!
//! Each fetch issues its own ranged GET and must return exactly the number
//! of bytes the range covers. Fetchers are cheap to clone; every worker of a
//! multi-segment download gets its own clone sharing the progress counter,
//! the optional rate limiter, and the cancellation token.

use crate::engine::rate_limiter::RateLimiter;
use crate::error::RangedlError;
use futures::StreamExt;
use reqwest::header::{HeaderMap, RANGE};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fetches inclusive byte ranges of a single URL
#[derive(Clone)]
pub struct SegmentFetcher {
    client: Client,
    url: String,
    headers: HeaderMap,
    downloaded_bytes: Arc<AtomicU64>,
    rate_limiter: Option<Arc<Mutex<RateLimiter>>>,
    cancel: CancellationToken,
}

impl SegmentFetcher {
    /// Create a fetcher for `url` sending `headers` with every request
    pub fn new(client: Client, url: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            client,
            url: url.into(),
            headers,
            downloaded_bytes: Arc::new(AtomicU64::new(0)),
            rate_limiter: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Count received bytes into a shared counter
    pub fn with_progress(mut self, downloaded_bytes: Arc<AtomicU64>) -> Self {
        self.downloaded_bytes = downloaded_bytes;
        self
    }

    /// Throttle reads through a limiter shared with sibling fetchers
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<Mutex<RateLimiter>>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch bytes `from..=to`.
    ///
    /// Fails with `ServerError` on any status of 300 or above and with
    /// `ShortRead` unless exactly `to - from + 1` bytes arrive.
    pub async fn fetch(&self, from: u64, to: u64) -> Result<Vec<u8>, RangedlError> {
        let expected = to - from + 1;
        let range_header = format!("bytes={}-{}", from, to);
        debug!("Requesting range {} of {}", range_header, self.url);

        let request = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .header(RANGE, range_header);

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RangedlError::Cancelled),
            response = request.send() => response.map_err(RangedlError::Unreachable)?,
        };

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(RangedlError::ServerError { status });
        }

        let mut data = Vec::with_capacity(expected.min(64 * 1024 * 1024) as usize);
        let mut stream = response.bytes_stream();
        loop {
            if let Some(limiter) = &self.rate_limiter {
                let total = self.downloaded_bytes.load(Ordering::Acquire);
                limiter.lock().await.wait(total, &self.cancel).await?;
            }

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RangedlError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            data.extend_from_slice(&chunk);
            self.downloaded_bytes
                .fetch_add(chunk.len() as u64, Ordering::AcqRel);

            if data.len() as u64 > expected {
                // A server that ignored the range is sending the whole body.
                break;
            }
        }

        let actual = data.len() as u64;
        if actual != expected {
            return Err(RangedlError::ShortRead { expected, actual });
        }

        info!("Fetched bytes {}-{} ({} bytes)", from, to, actual);
        Ok(data)
    }
}
