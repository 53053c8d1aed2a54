//! Admission control for capture work
//!
//! Bounds how many captures run at once. Work beyond `max_concurrent` waits in
//! a priority queue and is started, highest priority first, as running work
//! completes.

use crate::{CaptureError, Metrics};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct QueuedTask {
    priority: i32,
    seq: u64,
    job: BoxFuture<'static, ()>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Max-heap: higher priority first, then the earlier submission
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<QueuedTask>,
    running: usize,
    next_seq: u64,
}

#[derive(Clone)]
pub struct AdmissionQueue {
    state: Arc<Mutex<QueueState>>,
    max_concurrent: usize,
}

impl AdmissionQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            max_concurrent: max_concurrent.max(1),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `task` and return a future resolving to its result.
    ///
    /// The task is enqueued when `submit` is called, not when the returned
    /// future is first polled. Dropping the returned future does not stop the
    /// task.
    pub fn submit<F, T>(
        &self,
        priority: i32,
        task: F,
    ) -> impl Future<Output = Result<T, CaptureError>> + Send + 'static
    where
        F: Future<Output = Result<T, CaptureError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = async move {
            // The submitter may have gone away
            let _ = tx.send(task.await);
        }
        .boxed();

        {
            let mut state = self.lock_state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(QueuedTask { priority, seq, job });
            debug!(
                "Task {} queued with priority {} ({} pending)",
                seq,
                priority,
                state.pending.len()
            );
        }
        self.dispatch();

        async move {
            rx.await.unwrap_or_else(|_| {
                Err(CaptureError::CaptureFailed(
                    "capture task aborted".to_string(),
                ))
            })
        }
    }

    /// Start queued tasks until the concurrency ceiling is reached.
    fn dispatch(&self) {
        let ready: Vec<QueuedTask> = {
            let mut state = self.lock_state();
            let mut ready = Vec::new();
            while state.running < self.max_concurrent {
                let Some(task) = state.pending.pop() else {
                    break;
                };
                state.running += 1;
                ready.push(task);
            }
            ready
        };

        if ready.is_empty() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No runtime available, dropping {} admitted tasks", ready.len());
                let mut state = self.lock_state();
                state.running -= ready.len();
                return;
            }
        };

        for task in ready {
            debug!("Starting task {} (priority {})", task.seq, task.priority);
            let slot = SlotGuard {
                queue: self.clone(),
            };
            runtime.spawn(async move {
                let _slot = slot;
                task.job.await;
            });
        }

        Metrics::record_queue(&self.stats());
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock_state();
        QueueStats {
            queued: state.pending.len(),
            running: state.running,
            max_concurrent: self.max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

/// Frees a running slot when its task finishes, panics included.
struct SlotGuard {
    queue: AdmissionQueue,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut state = self.queue.lock_state();
            state.running = state.running.saturating_sub(1);
        }
        self.queue.dispatch();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub max_concurrent: usize,
}
