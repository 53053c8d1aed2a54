//! Bulk capture of a URL list through the coordinator
//!
//! Every URL is submitted at once; the admission queue decides how many
//! render at a time.

use crate::{filename_for_url, format_duration, CaptureCoordinator, CaptureError};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{error, info};

/// Outcome for one URL of a batch
#[derive(Debug)]
pub struct BatchItem {
    pub url: String,
    pub result: Result<PathBuf, CaptureError>,
}

pub struct BatchRunner {
    coordinator: CaptureCoordinator,
    output_dir: PathBuf,
}

impl BatchRunner {
    pub fn new(coordinator: CaptureCoordinator, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            coordinator,
            output_dir: output_dir.into(),
        }
    }

    pub async fn run(
        &self,
        urls: Vec<String>,
        progress: Arc<ProgressTracker>,
    ) -> Result<Vec<BatchItem>, CaptureError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        info!("Processing batch of {} URLs", urls.len());

        let captures = urls.into_iter().map(|url| {
            let progress = progress.clone();
            async move {
                let result = self.capture_to_file(&url).await;
                if let Err(e) = &result {
                    error!("Failed to capture {}: {}", url, e);
                }
                progress.record_completion(result.is_ok());
                BatchItem { url, result }
            }
        });
        let items = join_all(captures).await;

        let succeeded = items.iter().filter(|item| item.result.is_ok()).count();
        info!(
            "Batch completed. Succeeded: {}, Failed: {}",
            succeeded,
            items.len() - succeeded
        );
        Ok(items)
    }

    async fn capture_to_file(&self, url: &str) -> Result<PathBuf, CaptureError> {
        let artifact = self.coordinator.capture(url).await?;
        let path = self.output_dir.join(filename_for_url(url));
        tokio::fs::write(&path, &artifact.data).await?;
        Ok(path)
    }
}

/// Read one URL per line, skipping blanks and `#` comments
pub async fn read_url_list(path: &Path) -> Result<Vec<String>, CaptureError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_url_list(&content))
}

fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            completed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let eta = if completed > 0 && rate > 0.0 {
            let remaining = self.total.saturating_sub(completed);
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        };

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed.saturating_sub(errors),
            elapsed,
            rate,
            eta,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }

    /// Log progress every `every` until the batch completes.
    pub async fn report_every(&self, every: Duration) {
        let mut timer = interval(every);
        timer.tick().await;

        while !self.is_complete() {
            timer.tick().await;
            let progress = self.get_progress();
            info!(
                "Progress: {}/{} ({} failed) in {}, {:.1}/s{}",
                progress.completed,
                progress.total,
                progress.errors,
                format_duration(progress.elapsed),
                progress.rate,
                progress
                    .eta
                    .map(|eta| format!(", ETA {}", format_duration(eta)))
                    .unwrap_or_default()
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}
