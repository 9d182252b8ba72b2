//! Render job scheduler.
//!
//! Jobs go through a bounded queue to a fixed pool of worker tasks. Each tile
//! key has at most one job queued or running: a submission for a key that is
//! already pending joins the existing job's shared completion future, so any
//! number of concurrent requests for a tile cause a single rasterization.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tile_common::{TileError, TileKey, TileRange, TileResult};

use crate::metrics;
use crate::rendering::{RenderOutcome, TileRenderer};

type RenderFuture = Shared<BoxFuture<'static, TileResult<RenderOutcome>>>;

/// Scheduler sizing and retry policy.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Extra attempts for retryable failures
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further attempt
    pub retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

struct Job {
    key: TileKey,
    done: oneshot::Sender<TileResult<RenderOutcome>>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    deduplicated: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

struct Inner {
    config: SchedulerConfig,
    renderer: Arc<TileRenderer>,
    tx: mpsc::Sender<Job>,
    pending: Mutex<HashMap<TileKey, RenderFuture>>,
    counters: Counters,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the render queue and its workers. Cheap to clone.
#[derive(Clone)]
pub struct RenderScheduler {
    inner: Arc<Inner>,
}

/// A tile job that was queued or joined.
pub struct Submission {
    pub key: TileKey,
    /// True when an existing job for the key was joined
    pub deduplicated: bool,
    future: RenderFuture,
}

impl Submission {
    /// Wait for the render to finish.
    pub async fn wait(self) -> TileResult<RenderOutcome> {
        self.future.await
    }
}

/// Result of submitting a tile range.
pub struct BatchSubmission {
    pub submissions: Vec<Submission>,
    pub queued: u64,
    pub deduplicated: u64,
    /// Tiles refused because the queue was full
    pub rejected: u64,
}

/// Snapshot for `GET /render/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub workers: usize,
    pub queue_capacity: usize,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub deduplicated: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub rasterized: u64,
}

impl RenderScheduler {
    /// Spawn the worker pool. Must be called inside a Tokio runtime.
    pub fn start(renderer: Arc<TileRenderer>, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            config,
            renderer,
            tx,
            pending: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            shutdown,
            handles: Mutex::new(Vec::new()),
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let handles: Vec<JoinHandle<()>> = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    inner.clone(),
                    rx.clone(),
                    inner.shutdown.subscribe(),
                ))
            })
            .collect();

        if let Ok(mut guard) = inner.handles.lock() {
            guard.extend(handles);
        }

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Render scheduler started"
        );

        Self { inner }
    }

    /// Queue a render of `key`, or join the job already pending for it.
    ///
    /// Never waits for queue space: a full queue is `QueueFull`.
    pub fn submit(&self, key: TileKey) -> TileResult<Submission> {
        key.validate()?;
        let mut pending = self.lock_pending()?;
        self.submit_locked(&mut pending, key)
    }

    /// Submit every tile of a range, or none of them.
    ///
    /// When the queue cannot take every key that is not already pending,
    /// the whole range is rejected and nothing is queued.
    pub fn submit_range(&self, range: &TileRange) -> BatchSubmission {
        let mut batch = BatchSubmission {
            submissions: Vec::with_capacity(range.len() as usize),
            queued: 0,
            deduplicated: 0,
            rejected: 0,
        };

        let mut pending = match self.lock_pending() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(range = %range, error = %e, "Render queue unavailable");
                batch.rejected = range.len();
                return batch;
            }
        };

        // Workers only free slots, so the room counted here stays available
        // while the lock is held
        let fresh = range.iter().filter(|key| !pending.contains_key(key)).count();
        let room = self.inner.tx.capacity();
        if fresh > room {
            warn!(range = %range, fresh = fresh, room = room, "Render queue cannot take range");
            batch.rejected = range.len();
            return batch;
        }

        for key in range.iter() {
            match self.submit_locked(&mut pending, key) {
                Ok(submission) => {
                    if submission.deduplicated {
                        batch.deduplicated += 1;
                    } else {
                        batch.queued += 1;
                    }
                    batch.submissions.push(submission);
                }
                Err(e) => {
                    warn!(range = %range, error = %e, "Render queue refused tile");
                    batch.rejected += 1;
                }
            }
        }
        batch
    }

    fn lock_pending(&self) -> TileResult<MutexGuard<'_, HashMap<TileKey, RenderFuture>>> {
        self.inner
            .pending
            .lock()
            .map_err(|_| TileError::StorageError("scheduler state poisoned".to_string()))
    }

    fn submit_locked(
        &self,
        pending: &mut HashMap<TileKey, RenderFuture>,
        key: TileKey,
    ) -> TileResult<Submission> {
        if let Some(existing) = pending.get(&key) {
            self.inner.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(zoom = key.zoom, x = key.x, y = key.y, "Joined pending render");
            return Ok(Submission {
                key,
                deduplicated: true,
                future: existing.clone(),
            });
        }

        let (done, rx) = oneshot::channel();
        match self.inner.tx.try_send(Job { key, done }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => return Err(TileError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return Err(TileError::DataUnavailable("render scheduler stopped".to_string()))
            }
        }

        let future = rx
            .map(|result| {
                result.unwrap_or_else(|_| {
                    Err(TileError::DataUnavailable(
                        "render job dropped before completion".to_string(),
                    ))
                })
            })
            .boxed()
            .shared();
        pending.insert(key, future.clone());

        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::set_queue_depth(self.queue_depth());

        Ok(Submission {
            key,
            deduplicated: false,
            future,
        })
    }

    /// Jobs waiting for a worker.
    pub fn queue_depth(&self) -> usize {
        self.inner.config.queue_capacity.max(1) - self.inner.tx.capacity()
    }

    /// Keys queued or being rendered.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn renderer(&self) -> &Arc<TileRenderer> {
        &self.inner.renderer
    }

    pub fn status(&self) -> SchedulerStatus {
        let counters = &self.inner.counters;
        SchedulerStatus {
            workers: self.inner.config.workers,
            queue_capacity: self.inner.config.queue_capacity,
            queue_depth: self.queue_depth(),
            in_flight: self.in_flight(),
            submitted: counters.submitted.load(Ordering::Relaxed),
            deduplicated: counters.deduplicated.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            rasterized: self.inner.renderer.rasterizations(),
        }
    }

    /// Stop the workers once their current job is done.
    ///
    /// Jobs still queued are dropped; their waiters get `DataUnavailable`.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = match self.inner.handles.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Render worker panicked");
            }
        }
        info!("Render scheduler stopped");
    }
}

async fn worker_loop(
    id: usize,
    inner: Arc<Inner>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = id, "Render worker started");
    loop {
        let job = tokio::select! {
            _ = shutdown.changed() => break,
            job = async { rx.lock().await.recv().await } => job,
        };
        let Some(job) = job else { break };

        metrics::set_queue_depth(inner.config.queue_capacity.max(1) - inner.tx.capacity());
        let result = render_with_retry(&inner, &job.key).await;

        match &result {
            Ok(_) => {
                inner.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_render_error(e.code());
                error!(
                    worker = id,
                    zoom = job.key.zoom,
                    x = job.key.x,
                    y = job.key.y,
                    error = %e,
                    "Tile render failed"
                );
            }
        }

        // Unregister before publishing so later submissions start a fresh job
        if let Ok(mut pending) = inner.pending.lock() {
            pending.remove(&job.key);
        }
        let _ = job.done.send(result);
    }
    debug!(worker = id, "Render worker stopped");
}

async fn render_with_retry(inner: &Inner, key: &TileKey) -> TileResult<RenderOutcome> {
    let mut attempt = 0u32;
    loop {
        match inner.renderer.render(key).await {
            Err(e) if e.is_retryable() && attempt < inner.config.max_retries => {
                let delay = inner.config.retry_backoff * 2u32.saturating_pow(attempt);
                attempt += 1;
                inner.counters.retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    zoom = key.zoom,
                    x = key.x,
                    y = key.y,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying tile render"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::RenderSettings;
    use storage::{MemoryPointSource, MemoryTileCache};

    fn scheduler(config: SchedulerConfig) -> RenderScheduler {
        let renderer = Arc::new(TileRenderer::new(
            Arc::new(MemoryPointSource::default()),
            Arc::new(MemoryTileCache::new(1024 * 1024)),
            RenderSettings::default(),
        ));
        RenderScheduler::start(renderer, config)
    }

    #[tokio::test]
    async fn test_submit_range_joins_pending_keys() {
        let scheduler = scheduler(SchedulerConfig::default());
        let range = TileRange::try_new(2, 0, 1, 0, 1).unwrap();

        let first = scheduler.submit(TileKey::try_new(2, 1, 1).unwrap()).unwrap();
        let batch = scheduler.submit_range(&range);
        assert_eq!(batch.queued, 3);
        assert_eq!(batch.deduplicated, 1);
        assert_eq!(batch.rejected, 0);
        assert_eq!(scheduler.in_flight(), 4);

        first.wait().await.unwrap();
        for submission in batch.submissions {
            submission.wait().await.unwrap();
        }
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(scheduler.renderer().rasterizations(), 4);
    }

    #[tokio::test]
    async fn test_submit_range_is_all_or_nothing() {
        let scheduler = scheduler(SchedulerConfig {
            workers: 1,
            queue_capacity: 2,
            ..Default::default()
        });
        // Nothing is dequeued until this task yields
        let range = TileRange::try_new(3, 0, 3, 0, 0).unwrap();
        let batch = scheduler.submit_range(&range);
        assert_eq!(batch.queued, 0);
        assert_eq!(batch.rejected, 4);
        assert!(batch.submissions.is_empty());
        assert_eq!(scheduler.queue_depth(), 0);
        assert_eq!(scheduler.in_flight(), 0);

        // Pending keys need no queue slot
        let pending = scheduler.submit(TileKey::try_new(3, 0, 0).unwrap()).unwrap();
        let small = TileRange::try_new(3, 0, 1, 0, 0).unwrap();
        let batch = scheduler.submit_range(&small);
        assert_eq!(batch.queued, 1);
        assert_eq!(batch.deduplicated, 1);
        assert_eq!(batch.rejected, 0);
        assert_eq!(scheduler.queue_depth(), 2);
        assert!(!pending.deduplicated);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_refused() {
        let scheduler = scheduler(SchedulerConfig {
            workers: 1,
            ..Default::default()
        });
        scheduler.shutdown().await;

        let late = scheduler.submit(TileKey::try_new(1, 0, 0).unwrap());
        assert!(matches!(late, Err(TileError::DataUnavailable(_))));
        assert_eq!(scheduler.in_flight(), 0);
    }
}
