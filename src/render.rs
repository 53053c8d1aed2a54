//! Render capability interface and its headless Chrome implementation
//!
//! The worker pool only ever talks to [`RenderBackend`] and [`RenderWorker`];
//! which browser engine sits behind them is picked when the coordinator is
//! constructed.

use crate::{create_browser_config, worker_profile_dir, CaptureError, Config, Viewport};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Identity of one render worker, unique for the lifetime of a pool
pub type WorkerId = u64;

/// Factory for expensive render workers
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn launch(&self, id: WorkerId) -> Result<Arc<dyn RenderWorker>, CaptureError>;
}

/// One live, controllable render instance
#[async_trait]
pub trait RenderWorker: Send + Sync {
    /// Open `url` in a fresh page and wait for it to settle.
    ///
    /// `deadline` is advisory; the caller enforces the hard timeout.
    async fn navigate(
        &self,
        url: &str,
        deadline: Instant,
    ) -> Result<Box<dyn RenderedPage>, CaptureError>;

    /// False once the underlying process is known to be gone.
    fn is_alive(&self) -> bool;

    async fn shutdown(&self);
}

/// A navigated page, ready to be captured
#[async_trait]
pub trait RenderedPage: Send + Sync {
    /// PNG bitmap of the current viewport
    async fn screenshot(&self) -> Result<Vec<u8>, CaptureError>;

    async fn title(&self) -> Option<String>;

    async fn close(&self);
}

/// Launches one headless Chrome process per worker
pub struct ChromeBackend {
    config: Config,
}

impl ChromeBackend {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RenderBackend for ChromeBackend {
    async fn launch(&self, id: WorkerId) -> Result<Arc<dyn RenderWorker>, CaptureError> {
        let profile_dir = worker_profile_dir(id);
        tokio::fs::create_dir_all(&profile_dir).await.map_err(|e| {
            CaptureError::ResourceCreationFailed(format!("Failed to create profile dir: {e}"))
        })?;

        let browser_config = create_browser_config(&self.config, id)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CaptureError::ResourceCreationFailed(e.to_string()))?;

        // The CDP handler is a stream that must be polled for the browser to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("Chrome worker {} handler error: {}", id, e);
                    return;
                }
            }
            debug!("Chrome worker {} handler stream ended", id);
        });

        info!("Chrome worker {} launched", id);

        Ok(Arc::new(ChromeWorker {
            id,
            browser: Mutex::new(browser),
            handler: handler_task,
            profile_dir,
            viewport: self.config.viewport.clone(),
            settle_delay: self.config.settle_delay,
        }))
    }
}

pub struct ChromeWorker {
    id: WorkerId,
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
    viewport: Viewport,
    settle_delay: Duration,
}

impl ChromeWorker {
    async fn prepare_page(&self, page: &Page, url: &str, deadline: Instant) -> Result<(), CaptureError> {
        let emulation = SetDeviceMetricsOverrideParams::builder()
            .width(self.viewport.width)
            .height(self.viewport.height)
            .device_scale_factor(self.viewport.device_scale_factor)
            .mobile(self.viewport.mobile)
            .build()
            .map_err(CaptureError::CaptureFailed)?;

        page.execute(emulation)
            .await
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

        page.goto(url)
            .await
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

        page.wait_for_navigation()
            .await
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

        // Heavy script-driven sites keep painting after the load event
        let settle_until = (Instant::now() + self.settle_delay).min(deadline);
        sleep_until(settle_until).await;

        Ok(())
    }
}

#[async_trait]
impl RenderWorker for ChromeWorker {
    async fn navigate(
        &self,
        url: &str,
        deadline: Instant,
    ) -> Result<Box<dyn RenderedPage>, CaptureError> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?
        };
        let page = ChromePage::new(page);

        debug!("Chrome worker {} navigating to {}", self.id, url);
        match self.prepare_page(&page.page, url, deadline).await {
            Ok(()) => Ok(Box::new(page)),
            Err(e) => {
                page.close().await;
                Err(e)
            }
        }
    }

    fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }

    async fn shutdown(&self) {
        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!("Chrome worker {} did not close cleanly: {}", self.id, e);
            }
        }
        self.handler.abort();

        if let Err(e) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            debug!("Could not remove profile dir {}: {}", self.profile_dir.display(), e);
        }
        info!("Chrome worker {} shut down", self.id);
    }
}

/// Page wrapper that closes its tab even when the capture future is dropped
/// mid-flight by a timeout.
struct ChromePage {
    page: Page,
    closed: AtomicBool,
}

impl ChromePage {
    fn new(page: Page) -> Self {
        Self {
            page,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RenderedPage for ChromePage {
    async fn screenshot(&self) -> Result<Vec<u8>, CaptureError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(false)
            .build();

        self.page
            .screenshot(params)
            .await
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))
    }

    async fn title(&self) -> Option<String> {
        self.page.get_title().await.ok().flatten()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.page.clone().close().await {
            debug!("Page close failed: {}", e);
        }
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let page = self.page.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}
