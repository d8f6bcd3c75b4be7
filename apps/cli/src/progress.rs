//! Progress bar utilities for CLI downloads

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rangedl_types::{CoreEvent, DownloadStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Manages progress bars for running downloads
pub struct DownloadProgress {
    multi: MultiProgress,
    bars: Arc<RwLock<HashMap<Uuid, ProgressBar>>>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a progress bar for a download; the length arrives with the first event
    pub async fn add_download(&self, id: Uuid, label: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(0));

        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        pb.set_message(label.to_string());

        self.bars.write().await.insert(id, pb.clone());
        pb
    }

    /// Update a progress bar from an event
    pub async fn handle_event(&self, event: &CoreEvent) {
        match event {
            CoreEvent::DownloadProgress {
                id,
                downloaded,
                total,
                ..
            } => {
                let bars = self.bars.read().await;
                if let Some(pb) = bars.get(id) {
                    if let Some(total) = total {
                        pb.set_length(*total);
                    }
                    pb.set_position(*downloaded);
                }
            }

            CoreEvent::SegmentFailed {
                download_id,
                segment_index,
                error,
            } => {
                let bars = self.bars.read().await;
                if let Some(pb) = bars.get(download_id) {
                    pb.println(format!(
                        "{} Segment {} failed: {}",
                        style("!").yellow().bold(),
                        segment_index,
                        error
                    ));
                }
            }

            CoreEvent::DownloadStatusChanged { id, status, error } => {
                let bars = self.bars.read().await;
                if let Some(pb) = bars.get(id) {
                    match status {
                        DownloadStatus::Merging => {
                            pb.set_message(format!("{} merging", style("⟳").cyan()));
                        }
                        DownloadStatus::Completed => {
                            if let Some(len) = pb.length() {
                                pb.set_position(len);
                            }
                            pb.finish_with_message(format!(
                                "{} Download complete",
                                style("✓").green().bold()
                            ));
                        }
                        DownloadStatus::Failed => {
                            pb.abandon_with_message(format!(
                                "{} Failed: {}",
                                style("✗").red().bold(),
                                error.as_deref().unwrap_or("Unknown error")
                            ));
                        }
                        DownloadStatus::Cancelled => {
                            pb.abandon_with_message(format!("{} Cancelled", style("○").dim()));
                        }
                        _ => {}
                    }
                }
            }

            _ => {}
        }
    }

    /// Clear all progress bars
    pub async fn clear(&self) {
        for (_, pb) in self.bars.write().await.drain() {
            pb.finish_and_clear();
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed core events into the progress bars until the channel closes
pub fn spawn_event_pump(
    progress: Arc<DownloadProgress>,
    mut events: broadcast::Receiver<CoreEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => progress.handle_event(&event).await,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}
