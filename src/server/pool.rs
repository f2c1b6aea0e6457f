//! Elastic worker thread pool.
//!
//! Application calls that block can be moved off the I/O runtime onto these
//! threads. The pool grows when work queues up and shrinks again when
//! workers sit idle:
//!
//! ```text
//! target = clamp(ceil(queued / divisor), minimum, maximum)
//! ```
//!
//! Growth happens on submit. A worker above the minimum that waits longer
//! than the idle timeout without work retires. On shutdown every queued job
//! still runs; workers then stop at a marker placed behind them and are
//! joined.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::PoolConfig;
use crate::http::app::Wakeup;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("job dropped before completion; pool shutting down")]
    Cancelled,
}

/// Sizing policy for a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub minimum: usize,
    pub maximum: usize,
    pub divisor: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            minimum: 5,
            maximum: 100,
            divisor: 10,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(cfg: &PoolConfig) -> Self {
        Self {
            minimum: cfg.minimum,
            maximum: cfg.maximum,
            divisor: cfg.divisor,
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs),
        }
    }
}

/// Number of workers wanted for a queue of `queued` jobs.
///
/// # Example
///
/// ```
/// # use wicket::server::pool::{target_size, PoolSettings};
/// let settings = PoolSettings::default();
/// assert_eq!(target_size(0, &settings), 5);
/// assert_eq!(target_size(101, &settings), 11);
/// assert_eq!(target_size(5000, &settings), 100);
/// ```
pub fn target_size(queued: usize, settings: &PoolSettings) -> usize {
    let wanted = queued.div_ceil(settings.divisor.max(1));
    wanted.clamp(settings.minimum, settings.maximum.max(settings.minimum))
}

type Task = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Task),
    Stop,
}

struct Shared {
    queue: Mutex<VecDeque<Message>>,
    available: Condvar,
    workers: AtomicUsize,
    spawned: AtomicUsize,
    shutdown: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    settings: PoolSettings,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns workers until `target` are running.
    fn grow(self: &Arc<Self>, target: usize) {
        loop {
            let current = self.workers.load(Ordering::SeqCst);
            if current >= target || self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if self
                .workers
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.spawn_worker();
            }
        }
    }

    /// Releases one worker slot if the pool is above its minimum.
    fn try_retire(&self) -> bool {
        loop {
            let current = self.workers.load(Ordering::SeqCst);
            if current <= self.settings.minimum {
                return false;
            }
            if self
                .workers
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        let id = self.spawned.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(self);

        let spawned = thread::Builder::new()
            .name(format!("wicket-worker-{id}"))
            .spawn(move || shared.work());

        match spawned {
            Ok(handle) => {
                let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(e) => {
                self.workers.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(error = %e, "Failed to spawn worker thread");
            }
        }
    }

    fn work(self: Arc<Self>) {
        tracing::debug!("Worker thread starting");

        loop {
            let message = {
                let mut queue = self.queue();
                loop {
                    if let Some(message) = queue.pop_front() {
                        break Some(message);
                    }
                    if self.shutdown.load(Ordering::SeqCst) {
                        break None;
                    }

                    let (guard, timeout) = self
                        .available
                        .wait_timeout(queue, self.settings.idle_timeout)
                        .unwrap_or_else(PoisonError::into_inner);
                    queue = guard;

                    if timeout.timed_out() && queue.is_empty() && self.try_retire() {
                        tracing::debug!("Idle worker retiring");
                        return;
                    }
                }
            };

            match message {
                Some(Message::Run(task)) => task(),
                Some(Message::Stop) | None => break,
            }
        }

        self.workers.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!("Worker thread stopped");
    }
}

/// Cloneable handle for submitting work to a [`WorkerPool`].
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    /// Queues `f` and returns a handle to its eventual result. Panics in
    /// `f` are caught and reported as [`JobError::Panicked`].
    pub fn submit<F, T>(&self, f: F) -> Job<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Job { rx };
        }

        let task: Task = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                JobError::Panicked(message)
            });
            let _ = tx.send(result);
        });

        let depth = {
            let mut queue = self.shared.queue();
            queue.push_back(Message::Run(task));
            queue.len()
        };
        self.shared.available.notify_one();
        self.shared.grow(target_size(depth, &self.shared.settings));

        Job { rx }
    }

    /// Live worker threads.
    pub fn workers(&self) -> usize {
        self.shared.workers.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn settings(&self) -> PoolSettings {
        self.shared.settings
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.workers())
            .field("settings", &self.shared.settings)
            .finish()
    }
}

/// Result of a submitted job, awaitable from async code.
pub struct Job<T> {
    rx: oneshot::Receiver<Result<T, JobError>>,
}

/// Where a detached job leaves its result.
pub type JobSlot<T> = Arc<Mutex<Option<Result<T, JobError>>>>;

impl<T: Send + 'static> Job<T> {
    /// Splits the job into a wakeup for a cooperative responder to yield on
    /// and a slot it can read once resumed.
    pub fn detach(self) -> (Wakeup, JobSlot<T>) {
        let slot: JobSlot<T> = Arc::new(Mutex::new(None));
        let filled = Arc::clone(&slot);

        let wakeup: Wakeup = Box::pin(async move {
            let result = self.await;
            *filled.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
        });

        (wakeup, slot)
    }
}

impl<T> Future for Job<T> {
    type Output = Result<T, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(JobError::Cancelled)))
    }
}

/// Owner of the worker threads.
pub struct WorkerPool {
    executor: Executor,
}

impl WorkerPool {
    /// Starts a pool with `settings.minimum` workers.
    pub fn new(settings: PoolSettings) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            workers: AtomicUsize::new(0),
            spawned: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
            settings,
        });

        shared.grow(settings.minimum);
        tracing::info!(
            minimum = settings.minimum,
            maximum = settings.maximum,
            "Worker pool started"
        );

        Self {
            executor: Executor { shared },
        }
    }

    pub fn executor(&self) -> Executor {
        self.executor.clone()
    }

    pub fn workers(&self) -> usize {
        self.executor.workers()
    }

    /// Stops accepting work, drains the queue, and joins every worker.
    /// Blocks; call from a blocking context.
    pub fn shutdown(self) {
        self.stop();
    }

    fn stop(&self) {
        let shared = &self.executor.shared;
        if shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut queue = shared.queue();
            for _ in 0..shared.workers.load(Ordering::SeqCst) {
                queue.push_back(Message::Stop);
            }
        }
        shared.available.notify_all();

        let handles =
            std::mem::take(&mut *shared.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("Worker thread panicked during shutdown");
            }
        }

        tracing::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("executor", &self.executor)
            .finish()
    }
}
