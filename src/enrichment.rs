//! Detached text extraction for cached captures
//!
//! Every successful capture gets exactly one extraction pass, spawned after
//! the result is cached and never awaited by the request that produced it.

use crate::{CaptureArtifact, CaptureError, EnrichmentSettings, Metrics, ResultCache};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Turns a captured bitmap into text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, artifact: &CaptureArtifact) -> Result<String, CaptureError>;
}

/// Extractor used when no OCR program is configured
pub struct NoopExtractor;

#[async_trait]
impl TextExtractor for NoopExtractor {
    async fn extract(&self, _artifact: &CaptureArtifact) -> Result<String, CaptureError> {
        Ok(String::new())
    }
}

/// Runs an external OCR program against the PNG.
///
/// The image is written to a temporary file whose path is passed as the last
/// argument. The program must print a JSON object on stdout:
///
/// ```json
/// { "full_text_context": "...", "error": null }
/// ```
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ExtractorOutput {
    #[serde(default)]
    full_text_context: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run_program(&self, image: &Path) -> Result<String, CaptureError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                CaptureError::EnrichmentFailed(format!(
                    "{} timed out after {:?}",
                    self.program, self.timeout
                ))
            })?
            .map_err(|e| {
                CaptureError::EnrichmentFailed(format!("failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::EnrichmentFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        parse_output(&output.stdout)
    }
}

fn parse_output(stdout: &[u8]) -> Result<String, CaptureError> {
    let parsed: ExtractorOutput = serde_json::from_slice(stdout)
        .map_err(|e| CaptureError::EnrichmentFailed(format!("unreadable extractor output: {e}")))?;

    if let Some(message) = parsed.error {
        return Err(CaptureError::EnrichmentFailed(message));
    }
    Ok(parsed.full_text_context.unwrap_or_default())
}

#[async_trait]
impl TextExtractor for CommandExtractor {
    async fn extract(&self, artifact: &CaptureArtifact) -> Result<String, CaptureError> {
        let image = std::env::temp_dir().join(format!("page-capture-{}.png", uuid::Uuid::new_v4()));
        tokio::fs::write(&image, &artifact.data).await?;

        let result = self.run_program(&image).await;

        if let Err(e) = tokio::fs::remove_file(&image).await {
            debug!("Could not remove {}: {}", image.display(), e);
        }
        result
    }
}

/// Pick the extractor described by the configuration
pub fn extractor_from_settings(settings: &EnrichmentSettings) -> Arc<dyn TextExtractor> {
    match &settings.command {
        Some(program) => {
            info!("Text extraction enabled via {}", program);
            Arc::new(CommandExtractor::new(
                program.clone(),
                settings.args.clone(),
                settings.timeout,
            ))
        }
        None => Arc::new(NoopExtractor),
    }
}

#[derive(Clone)]
pub struct BackgroundEnricher {
    cache: Arc<ResultCache>,
    extractor: Arc<dyn TextExtractor>,
}

impl BackgroundEnricher {
    pub fn new(cache: Arc<ResultCache>, extractor: Arc<dyn TextExtractor>) -> Self {
        Self { cache, extractor }
    }

    /// Run the extractor inline on an image that is not in the cache
    pub async fn extract(&self, artifact: &CaptureArtifact) -> Result<String, CaptureError> {
        self.extractor.extract(artifact).await
    }

    /// Spawn one extraction pass for the capture cached as `generation`.
    ///
    /// Failures, panics included, are logged and leave the slot idle.
    pub fn run(
        &self,
        url: String,
        artifact: Arc<CaptureArtifact>,
        generation: u64,
    ) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let extractor = self.extractor.clone();

        tokio::spawn(async move {
            if !cache.begin_enrichment(&url, generation) {
                debug!("Capture for {} was replaced before enrichment started", url);
                return;
            }

            let start = Instant::now();
            let outcome = AssertUnwindSafe(extractor.extract(&artifact))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(text)) => {
                    Metrics::record_enrichment(true);
                    if cache.attach_enrichment_for(&url, generation, text) {
                        info!("Enrichment for {} completed in {:?}", url, start.elapsed());
                    }
                }
                Ok(Err(e)) => {
                    Metrics::record_enrichment(false);
                    warn!("Enrichment for {} failed: {}", url, e);
                    cache.abandon_enrichment(&url, generation);
                }
                Err(_) => {
                    Metrics::record_enrichment(false);
                    error!("Enrichment for {} panicked", url);
                    cache.abandon_enrichment(&url, generation);
                }
            }
        })
    }
}
