//! Background progress reporting
//!
//! The reporter only ever reads the shared byte counter; the I/O side is
//! the single writer. It stops as soon as its token is cancelled.

use rangedl_types::CoreEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Weight of the newest speed sample in the moving average
const SPEED_ALPHA: f64 = 0.3;

/// Spawn a task emitting `DownloadProgress` every `interval` until `stop` fires.
///
/// `total` is read on every tick so it may be filled in after the reporter starts
/// (0 = unknown).
pub fn spawn_progress_reporter(
    id: Uuid,
    downloaded: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    interval: Duration,
    event_tx: broadcast::Sender<CoreEvent>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_downloaded = downloaded.load(Ordering::Acquire);
        let mut last_time = Instant::now();
        let mut smoothed_speed: f64 = 0.0;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let now = Instant::now();
            let current = downloaded.load(Ordering::Acquire);
            let elapsed = now.duration_since(last_time).as_secs_f64();
            let instant_speed = if elapsed > 0.0 {
                current.saturating_sub(last_downloaded) as f64 / elapsed
            } else {
                0.0
            };
            smoothed_speed = SPEED_ALPHA * instant_speed + (1.0 - SPEED_ALPHA) * smoothed_speed;
            let speed = smoothed_speed as u64;

            let total = match total.load(Ordering::Acquire) {
                0 => None,
                t => Some(t),
            };
            let eta = match total {
                Some(t) if speed > 0 => Some(t.saturating_sub(current) / speed),
                _ => None,
            };

            let _ = event_tx.send(CoreEvent::DownloadProgress {
                id,
                downloaded: current,
                total,
                speed,
                eta,
            });

            last_downloaded = current;
            last_time = now;
        }
    })
}
