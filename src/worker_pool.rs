//! Render worker pool management
//!
//! Keeps a fixed set of pre-launched render workers and leases them out to
//! captures. When every managed worker is busy, `acquire` launches a one-shot
//! overflow worker instead of waiting, and that worker is destroyed as soon as
//! its lease ends.

use crate::{CaptureError, Config, Metrics, RenderBackend, RenderWorker, WorkerId};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Whether a leased worker belongs to the managed set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Managed,
    Overflow,
}

/// Lease on one render worker.
///
/// Dropping the handle releases the worker, so release happens exactly once on
/// every exit path of the holder, including timeouts and panics.
pub struct WorkerHandle {
    id: WorkerId,
    kind: WorkerKind,
    worker: Arc<dyn RenderWorker>,
    pool: WorkerPool,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn is_overflow(&self) -> bool {
        self.kind == WorkerKind::Overflow
    }

    pub fn worker(&self) -> &Arc<dyn RenderWorker> {
        &self.worker
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.pool.return_worker(self.id, self.kind, &self.worker);
    }
}

#[derive(Default)]
struct PoolState {
    workers: HashMap<WorkerId, Arc<dyn RenderWorker>>,
    available: VecDeque<WorkerId>,
    in_use: HashSet<WorkerId>,
    overflow_live: usize,
}

pub struct WorkerPool {
    backend: Arc<dyn RenderBackend>,
    config: Config,
    state: Arc<Mutex<PoolState>>,
    init_lock: Arc<tokio::sync::Mutex<()>>,
    is_initialized: Arc<AtomicBool>,
    is_closed: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(config: Config, backend: Arc<dyn RenderBackend>) -> Self {
        Self {
            backend,
            config,
            state: Arc::new(Mutex::new(PoolState::default())),
            init_lock: Arc::new(tokio::sync::Mutex::new(())),
            is_initialized: Arc::new(AtomicBool::new(false)),
            is_closed: Arc::new(AtomicBool::new(false)),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_id(&self) -> WorkerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Launch the configured number of workers.
    ///
    /// Idempotent. A worker that fails to launch is logged and skipped, leaving
    /// the pool degraded rather than failing startup. Returns the number of
    /// managed workers.
    pub async fn init(&self) -> Result<usize, CaptureError> {
        let _guard = self.init_lock.lock().await;

        if self.is_closed() {
            return Err(CaptureError::PoolClosed);
        }
        if self.is_initialized.load(Ordering::Acquire) {
            return Ok(self.lock_state().workers.len());
        }

        let target = self.config.pool_size;
        info!("Initializing worker pool with {} instances", target);

        for i in 0..target {
            if i > 0 && !self.config.launch_stagger.is_zero() {
                sleep(self.config.launch_stagger).await;
            }

            let id = self.allocate_id();
            match self.backend.launch(id).await {
                Ok(worker) => {
                    let mut state = self.lock_state();
                    state.workers.insert(id, worker);
                    state.available.push_back(id);
                    info!("Render worker {} created ({}/{})", id, i + 1, target);
                }
                Err(e) => {
                    error!("Failed to create render worker {}: {}", id, e);
                }
            }
        }

        self.is_initialized.store(true, Ordering::Release);

        let created = self.lock_state().workers.len();
        if created < target {
            warn!(
                "Worker pool degraded: {} of {} instances available",
                created, target
            );
        }
        info!("Worker pool initialized with {} instances", created);
        Metrics::record_pool(&self.stats());

        Ok(created)
    }

    /// Lease a worker.
    ///
    /// Never waits for another lease to end: when no managed worker is free an
    /// overflow worker is launched instead.
    pub async fn acquire(&self) -> Result<WorkerHandle, CaptureError> {
        if self.is_closed() {
            return Err(CaptureError::PoolClosed);
        }
        if !self.is_initialized.load(Ordering::Acquire) {
            self.init().await?;
        }

        loop {
            let Some((id, worker)) = self.take_available() else {
                return self.acquire_overflow().await;
            };

            if worker.is_alive() {
                debug!("Render worker {} acquired", id);
                Metrics::record_pool(&self.stats());
                return Ok(self.lease(id, WorkerKind::Managed, worker));
            }

            warn!("Render worker {} is no longer alive, relaunching", id);
            match self.relaunch(id, worker).await {
                Ok(fresh) => return Ok(self.lease(id, WorkerKind::Managed, fresh)),
                Err(CaptureError::PoolClosed) => return Err(CaptureError::PoolClosed),
                Err(e) => {
                    error!("Failed to relaunch render worker {}: {}", id, e);
                    self.retire(id);
                }
            }
        }
    }

    /// Explicitly end a lease. Equivalent to dropping the handle.
    pub fn release(&self, handle: WorkerHandle) {
        drop(handle);
    }

    /// Pop the next available managed worker and mark it in use, atomically.
    fn take_available(&self) -> Option<(WorkerId, Arc<dyn RenderWorker>)> {
        let mut state = self.lock_state();
        while let Some(id) = state.available.pop_front() {
            if let Some(worker) = state.workers.get(&id).cloned() {
                state.in_use.insert(id);
                return Some((id, worker));
            }
        }
        None
    }

    fn lease(&self, id: WorkerId, kind: WorkerKind, worker: Arc<dyn RenderWorker>) -> WorkerHandle {
        WorkerHandle {
            id,
            kind,
            worker,
            pool: self.clone(),
        }
    }

    async fn relaunch(
        &self,
        id: WorkerId,
        dead: Arc<dyn RenderWorker>,
    ) -> Result<Arc<dyn RenderWorker>, CaptureError> {
        dead.shutdown().await;
        let fresh = self.backend.launch(id).await?;

        // Shutdown may have drained the pool while the launch was in flight
        let closed = {
            let mut state = self.lock_state();
            if self.is_closed() {
                state.in_use.remove(&id);
                state.workers.remove(&id);
                true
            } else {
                state.workers.insert(id, fresh.clone());
                false
            }
        };
        if closed {
            warn!("Pool closed while relaunching render worker {}, destroying it", id);
            fresh.shutdown().await;
            return Err(CaptureError::PoolClosed);
        }

        Metrics::record_worker_relaunch();
        info!("Render worker {} relaunched", id);
        Ok(fresh)
    }

    /// Drop a managed worker that could not be relaunched.
    fn retire(&self, id: WorkerId) {
        let mut state = self.lock_state();
        state.in_use.remove(&id);
        state.workers.remove(&id);
        warn!(
            "Render worker {} retired; pool now has {} instances",
            id,
            state.workers.len()
        );
    }

    async fn acquire_overflow(&self) -> Result<WorkerHandle, CaptureError> {
        if self.is_closed() {
            return Err(CaptureError::PoolClosed);
        }
        {
            let mut state = self.lock_state();
            if let Some(limit) = self.config.max_total_workers {
                if state.workers.len() + state.overflow_live >= limit {
                    warn!("Worker ceiling of {} reached, rejecting acquire", limit);
                    return Err(CaptureError::PoolExhausted { limit });
                }
            }
            state.overflow_live += 1;
        }

        let id = self.allocate_id();
        warn!("All render workers busy, launching overflow worker {}", id);

        match self.backend.launch(id).await {
            Ok(worker) => {
                Metrics::record_overflow_launch();
                Ok(self.lease(id, WorkerKind::Overflow, worker))
            }
            Err(e) => {
                self.lock_state().overflow_live -= 1;
                error!("Failed to launch overflow worker {}: {}", id, e);
                Err(e)
            }
        }
    }

    fn return_worker(&self, id: WorkerId, kind: WorkerKind, worker: &Arc<dyn RenderWorker>) {
        match kind {
            WorkerKind::Managed => {
                let mut state = self.lock_state();
                if state.in_use.remove(&id) && !self.is_closed() {
                    state.available.push_back(id);
                }
                debug!(
                    "Render worker {} released. Available: {}, In use: {}",
                    id,
                    state.available.len(),
                    state.in_use.len()
                );
            }
            WorkerKind::Overflow => {
                {
                    let mut state = self.lock_state();
                    state.overflow_live = state.overflow_live.saturating_sub(1);
                }
                debug!("Overflow worker {} released, destroying", id);

                let worker = worker.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move { worker.shutdown().await });
                    }
                    Err(_) => warn!("No runtime to shut down overflow worker {}", id),
                }
            }
        }
    }

    /// Close the pool and destroy every managed worker.
    ///
    /// Waits up to `shutdown_grace` for leased workers to come back first.
    /// Every later `acquire` fails with `PoolClosed`.
    pub async fn shutdown(&self) {
        if self.is_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down worker pool...");

        // Serialize with a concurrent init so no worker is launched after the drain
        let _guard = self.init_lock.lock().await;

        let deadline = Instant::now() + self.config.shutdown_grace;
        loop {
            let busy = self.lock_state().in_use.len();
            if busy == 0 || Instant::now() >= deadline {
                if busy > 0 {
                    warn!("Shutting down with {} workers still in use", busy);
                }
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        let workers: Vec<_> = {
            let mut state = self.lock_state();
            state.available.clear();
            state.in_use.clear();
            state.workers.drain().collect()
        };

        for (id, worker) in workers {
            worker.shutdown().await;
            debug!("Render worker {} destroyed", id);
        }

        info!("Worker pool shutdown complete");
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock_state();
        PoolStats {
            total: state.workers.len(),
            available: state.available.len(),
            in_use: state.in_use.len(),
            overflow_in_use: state.overflow_live,
        }
    }
}

impl Clone for WorkerPool {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            init_lock: self.init_lock.clone(),
            is_initialized: self.is_initialized.clone(),
            is_closed: self.is_closed.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    pub overflow_in_use: usize,
}
