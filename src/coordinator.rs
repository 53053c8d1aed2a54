//! Capture coordinator tying the pool, admission queue, cache and enricher
//! together
//!
//! A capture first checks the cache. Only a miss is admitted to the queue, and
//! only an admitted task ever leases a render worker.

use crate::{
    extractor_from_settings, validate_url, AdmissionQueue, BackgroundEnricher, CaptureArtifact,
    CaptureError, ChromeBackend, Config, EnrichmentStatus, Metrics, PoolStats, QueueStats,
    RenderBackend, ResultCache, TextExtractor, WorkerHandle, WorkerPool,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Entry point for captures
///
/// Cheap to clone; clones share the same pool, queue and cache.
///
/// # Examples
///
/// ```rust,no_run
/// use page_capture::{CaptureCoordinator, Config};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let coordinator = CaptureCoordinator::with_chrome(Config::default());
///     coordinator.start().await?;
///
///     let artifact = coordinator.capture("https://example.com").await?;
///     println!("Captured {} bytes", artifact.data.len());
///
///     coordinator.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CaptureCoordinator {
    pool: WorkerPool,
    queue: AdmissionQueue,
    cache: Arc<ResultCache>,
    enricher: BackgroundEnricher,
    config: Arc<Config>,
}

impl CaptureCoordinator {
    pub fn new(
        config: Config,
        backend: Arc<dyn RenderBackend>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache_ttl));
        Self {
            pool: WorkerPool::new(config.clone(), backend),
            queue: AdmissionQueue::new(config.max_concurrent),
            enricher: BackgroundEnricher::new(cache.clone(), extractor),
            cache,
            config: Arc::new(config),
        }
    }

    /// Coordinator backed by headless Chrome, with the extractor named in the
    /// enrichment settings
    pub fn with_chrome(config: Config) -> Self {
        let backend = Arc::new(ChromeBackend::new(config.clone()));
        let extractor = extractor_from_settings(&config.enrichment);
        Self::new(config, backend, extractor)
    }

    /// Launch the worker pool.
    pub async fn start(&self) -> Result<PoolStats, CaptureError> {
        self.pool.init().await?;
        let stats = self.pool.stats();
        info!(
            "Capture coordinator started: {} workers, max {} concurrent captures",
            stats.total,
            self.queue.max_concurrent()
        );
        Ok(stats)
    }

    pub async fn capture(&self, url: &str) -> Result<Arc<CaptureArtifact>, CaptureError> {
        self.capture_with_priority(url, 0).await
    }

    /// Capture `url`, answering from the cache when a fresh result exists.
    ///
    /// Higher `priority` values are admitted first when captures are queued.
    pub async fn capture_with_priority(
        &self,
        url: &str,
        priority: i32,
    ) -> Result<Arc<CaptureArtifact>, CaptureError> {
        if self.pool.is_closed() {
            return Err(CaptureError::PoolClosed);
        }
        validate_url(url)?;

        if let Some(cached) = self.cache.get(url) {
            Metrics::record_cache_lookup(true);
            debug!("Cache hit for {} ({:?} old)", url, cached.age);
            return Ok(cached.artifact);
        }
        Metrics::record_cache_lookup(false);

        let this = self.clone();
        let url = url.to_string();
        self.queue
            .submit(priority, async move { this.capture_task(url).await })
            .await
    }

    async fn capture_task(&self, url: String) -> Result<Arc<CaptureArtifact>, CaptureError> {
        let handle = self.pool.acquire().await?;

        let start = Instant::now();
        let deadline = start + self.config.capture_timeout;
        let rendered = match timeout_at(deadline, render(&handle, &url, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::NavigationTimeout(self.config.capture_timeout)),
        };
        let render_time = start.elapsed();
        let worker_id = handle.id();
        let overflow = handle.is_overflow();
        drop(handle);

        Metrics::record_capture(render_time, rendered.is_ok());
        let (data, title) = rendered.map_err(|e| {
            warn!("Capture of {} failed on worker {}: {}", url, worker_id, e);
            e
        })?;

        let artifact = Arc::new(CaptureArtifact {
            url: url.clone(),
            data,
            title,
            captured_at: Utc::now(),
            render_time,
            worker_id,
            overflow,
        });
        let generation = self.cache.put(&url, artifact.clone());
        info!(
            "Captured {} in {:?} on worker {} ({} bytes)",
            url,
            render_time,
            worker_id,
            artifact.size()
        );

        self.enricher.run(url, artifact.clone(), generation);
        Ok(artifact)
    }

    /// Extract text from an image supplied by the caller.
    ///
    /// Runs right away, outside the admission queue and the pool, and caches
    /// nothing.
    pub async fn extract_uploaded(&self, data: Vec<u8>) -> Result<String, CaptureError> {
        let artifact = CaptureArtifact {
            url: "upload".to_string(),
            data,
            title: None,
            captured_at: Utc::now(),
            render_time: std::time::Duration::ZERO,
            worker_id: 0,
            overflow: false,
        };
        self.enricher.extract(&artifact).await
    }

    /// Fresh cached capture for `url`, if any
    pub fn get_cached(&self, url: &str) -> Option<Arc<CaptureArtifact>> {
        self.cache.get(url).map(|cached| cached.artifact)
    }

    pub fn get_enrichment(&self, url: &str) -> EnrichmentStatus {
        self.cache.enrichment(url)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool. Queued and later captures fail with `PoolClosed`.
    pub async fn shutdown(&self) {
        info!("Shutting down capture coordinator...");
        self.pool.shutdown().await;
    }
}

/// Navigate and screenshot on a leased worker. The page is closed on every
/// path that opened one.
async fn render(
    handle: &WorkerHandle,
    url: &str,
    deadline: Instant,
) -> Result<(Vec<u8>, Option<String>), CaptureError> {
    let page = handle.worker().navigate(url, deadline).await?;

    let screenshot = page.screenshot().await;
    let title = match screenshot {
        Ok(_) => page.title().await,
        Err(_) => None,
    };
    page.close().await;

    Ok((screenshot?, title))
}
