//! In-memory render backend for tests

use crate::{CaptureArtifact, CaptureError, Config, RenderBackend, RenderWorker, RenderedPage, WorkerId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub fn test_config() -> Config {
    Config {
        pool_size: 2,
        max_concurrent: 2,
        capture_timeout: Duration::from_secs(5),
        settle_delay: Duration::ZERO,
        launch_stagger: Duration::ZERO,
        shutdown_grace: Duration::from_millis(100),
        ..Config::default()
    }
}

pub fn sample_artifact(url: &str) -> CaptureArtifact {
    CaptureArtifact {
        url: url.to_string(),
        data: vec![0x89, b'P', b'N', b'G'],
        title: Some("Sample".to_string()),
        captured_at: chrono::Utc::now(),
        render_time: Duration::from_millis(10),
        worker_id: 0,
        overflow: false,
    }
}

#[derive(Default)]
struct Counters {
    launches: AtomicUsize,
    navigations: AtomicUsize,
    navigated: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    shut_down: Mutex<HashSet<WorkerId>>,
    workers: Mutex<HashMap<WorkerId, Arc<FakeWorker>>>,
}

/// Fake backend whose pages take `render_time` to load.
///
/// URLs containing `fail` fail to navigate; URLs containing `slow` never
/// finish loading.
pub struct FakeBackend {
    counters: Arc<Counters>,
    failing_launches: HashSet<WorkerId>,
    launch_delay: Option<(usize, Duration)>,
    render_time: Duration,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            failing_launches: HashSet::new(),
            launch_delay: None,
            render_time: Duration::from_millis(10),
        }
    }

    pub fn with_render_time(mut self, render_time: Duration) -> Self {
        self.render_time = render_time;
        self
    }

    pub fn failing_launch_for(mut self, id: WorkerId) -> Self {
        self.failing_launches.insert(id);
        self
    }

    /// Every launch from the `from`-th one on (zero-based) takes `delay`
    pub fn with_launch_delay_from(mut self, from: usize, delay: Duration) -> Self {
        self.launch_delay = Some((from, delay));
        self
    }

    pub fn launch_count(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn navigation_count(&self) -> usize {
        self.counters.navigations.load(Ordering::SeqCst)
    }

    /// URLs in the order navigation started
    pub fn navigated(&self) -> Vec<String> {
        self.counters.navigated.lock().unwrap().clone()
    }

    /// Pages open at the same time, at most
    pub fn peak_active(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.counters.shut_down.lock().unwrap().len()
    }

    pub fn was_shut_down(&self, id: WorkerId) -> bool {
        self.counters.shut_down.lock().unwrap().contains(&id)
    }

    /// Whether the latest worker launched as `id` is still running
    pub fn is_alive(&self, id: WorkerId) -> bool {
        self.counters
            .workers
            .lock()
            .unwrap()
            .get(&id)
            .is_some_and(|worker| worker.alive.load(Ordering::SeqCst))
    }

    /// Simulate the process of worker `id` dying
    pub fn kill(&self, id: WorkerId) {
        if let Some(worker) = self.counters.workers.lock().unwrap().get(&id) {
            worker.alive.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RenderBackend for FakeBackend {
    async fn launch(&self, id: WorkerId) -> Result<Arc<dyn RenderWorker>, CaptureError> {
        let launch = self.counters.launches.fetch_add(1, Ordering::SeqCst);
        if let Some((from, delay)) = self.launch_delay {
            if launch >= from {
                sleep(delay).await;
            }
        }
        if self.failing_launches.contains(&id) {
            return Err(CaptureError::ResourceCreationFailed(format!(
                "worker {id} failed to start"
            )));
        }

        let worker = Arc::new(FakeWorker {
            id,
            alive: AtomicBool::new(true),
            render_time: self.render_time,
            counters: self.counters.clone(),
        });
        self.counters
            .workers
            .lock()
            .unwrap()
            .insert(id, worker.clone());
        Ok(worker)
    }
}

pub struct FakeWorker {
    id: WorkerId,
    alive: AtomicBool,
    render_time: Duration,
    counters: Arc<Counters>,
}

#[async_trait]
impl RenderWorker for FakeWorker {
    async fn navigate(
        &self,
        url: &str,
        _deadline: Instant,
    ) -> Result<Box<dyn RenderedPage>, CaptureError> {
        self.counters.navigations.fetch_add(1, Ordering::SeqCst);
        self.counters.navigated.lock().unwrap().push(url.to_string());
        let page = FakePage::open(self.counters.clone(), url);

        if url.contains("slow") {
            sleep(Duration::from_secs(3600)).await;
        } else {
            sleep(self.render_time).await;
        }

        if url.contains("fail") {
            return Err(CaptureError::CaptureFailed(format!(
                "navigation to {url} failed"
            )));
        }
        Ok(Box::new(page))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.counters.shut_down.lock().unwrap().insert(self.id);
    }
}

/// Counts as active from navigation start until dropped
struct FakePage {
    counters: Arc<Counters>,
    url: String,
}

impl FakePage {
    fn open(counters: Arc<Counters>, url: &str) -> Self {
        let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        Self {
            counters,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl RenderedPage for FakePage {
    async fn screenshot(&self) -> Result<Vec<u8>, CaptureError> {
        let mut png = vec![0x89, b'P', b'N', b'G'];
        png.extend_from_slice(self.url.as_bytes());
        Ok(png)
    }

    async fn title(&self) -> Option<String> {
        Some(format!("Title of {}", self.url))
    }

    async fn close(&self) {}
}

impl Drop for FakePage {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}
