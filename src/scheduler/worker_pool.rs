//! Worker pool executing poll and work tasks from one shared queue.
//!
//! Every worker is an independent tokio task pulling from the same unbounded
//! FIFO. A poll task is pushed back after each run, behind whatever work it
//! produced, so polling and work interleave in arrival order.
//!
//! # Features
//!
//! - Pool size derived from the number of polled queues
//! - Graceful shutdown with broadcast channel
//! - Panics and errors inside a task never stop the worker
//! - Pool statistics tracking

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::task::{PollTask, Task, TaskContext};

/// Cap on workers added on top of one per queue.
pub const MAX_EXTRA_WORKERS: usize = 10;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// No queues to poll.
    #[error("No queues to poll")]
    NoQueues,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Number of workers for `queues` polled queues.
///
/// One worker per queue plus up to three more per queue, capped at
/// [`MAX_EXTRA_WORKERS`] extra. An override replaces the computation.
pub fn pool_size(queues: usize, override_size: Option<usize>) -> usize {
    override_size.unwrap_or_else(|| queues + (queues * 3).min(MAX_EXTRA_WORKERS))
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Fixed number of workers; derived from the queue count when unset.
    pub num_workers: Option<usize>,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: None,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with a fixed number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: Some(num_workers),
            ..Default::default()
        }
    }

    /// Sets or clears the worker count override.
    pub fn with_num_workers(mut self, num_workers: Option<usize>) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently running a task.
    pub active_workers: usize,
    /// Tasks run to completion, poll and work alike.
    pub tasks_executed: u64,
    /// Tasks that panicked.
    pub tasks_failed: u64,
    /// Work tasks whose handler reported failure.
    pub handler_failures: u64,
    /// Poll tasks run.
    pub polls: u64,
    /// Messages received across all polls.
    pub messages_received: u64,
}

impl PoolStats {
    /// Returns the total number of tasks attempted.
    pub fn total_processed(&self) -> u64 {
        self.tasks_executed + self.tasks_failed
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    tasks_executed: AtomicU64,
    tasks_failed: AtomicU64,
    handler_failures: AtomicU64,
    polls: AtomicU64,
    messages_received: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            tasks_executed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_poll(&self, received: usize) {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.messages_received
            .fetch_add(received as u64, Ordering::SeqCst);
    }

    fn record_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
    }

    fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            tasks_executed: self.tasks_executed.load(Ordering::SeqCst),
            tasks_failed: self.tasks_failed.load(Ordering::SeqCst),
            handler_failures: self.handler_failures.load(Ordering::SeqCst),
            polls: self.polls.load(Ordering::SeqCst),
            messages_received: self.messages_received.load(Ordering::SeqCst),
        }
    }
}

/// Multi-consumer FIFO of tasks.
///
/// The sender never closes while the pool holds a clone, so `pop` only
/// returns `None` once every handle is gone.
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Task>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    pub fn push(&self, task: Task) {
        if let Err(e) = self.sender.send(task) {
            error!(task = %e.0, "Task queue closed, dropping task");
        }
    }

    /// Waits for the next task.
    pub async fn pop(&self) -> Option<Task> {
        self.receiver.lock().await.recv().await
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker pool that runs the bridge.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    num_workers: usize,
    context: Arc<TaskContext>,
    queue: TaskQueue,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool sized for the queues in `context`'s registry.
    pub fn new(config: WorkerPoolConfig, context: TaskContext) -> Self {
        let queues = context.registry.queues().len();
        let num_workers = pool_size(queues, config.num_workers);
        if num_workers <= queues {
            warn!(
                num_workers = num_workers,
                queues = queues,
                "Polling and processing share workers; throughput will be degraded"
            );
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            num_workers,
            context: Arc::new(context),
            queue: TaskQueue::new(),
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Seeds one poll task per queue and spawns the workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running,
    /// or `PoolError::NoQueues` if nothing is registered.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }
        if self.context.registry.queues().is_empty() {
            return Err(PoolError::NoQueues);
        }

        for queue in self.context.registry.queues() {
            info!(queue_url = %queue.queue_url, region = %queue.region, "Polling queue");
            self.queue.push(Task::Poll(PollTask::new(queue.clone())));
        }

        for i in 0..self.num_workers {
            let worker = Worker::new(
                format!("worker-{}", i),
                self.queue.clone(),
                Arc::clone(&self.context),
                self.shutdown_tx.subscribe(),
                Arc::clone(&self.stats),
            );

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.num_workers, "Worker pool started");

        Ok(())
    }

    /// Stops every worker after its current task.
    ///
    /// Tasks still queued are dropped; their messages reappear on the queue
    /// once the visibility timeout lapses.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let timeout = self.config.shutdown_timeout;
        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                info!(stats = ?self.stats(), "Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }
}

/// A single worker pulling tasks from the shared queue.
struct Worker {
    id: String,
    queue: TaskQueue,
    context: Arc<TaskContext>,
    shutdown_rx: broadcast::Receiver<()>,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    fn new(
        id: String,
        queue: TaskQueue,
        context: Arc<TaskContext>,
        shutdown_rx: broadcast::Receiver<()>,
        stats: Arc<SharedPoolStats>,
    ) -> Self {
        Self {
            id,
            queue,
            context,
            shutdown_rx,
            stats,
        }
    }

    /// Main worker loop.
    ///
    /// Runs tasks until a shutdown signal is received. A signal sent while a
    /// task is running is picked up before the next task is taken.
    async fn run(mut self) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            let task = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    debug!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                task = self.queue.pop() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            self.process_task(task).await;
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    /// Runs one task, re-queueing poll tasks and any work they produced.
    async fn process_task(&self, task: Task) {
        self.stats.increment_active();

        let poll = match &task {
            Task::Poll(poll) => Some(poll.clone()),
            Task::Work(_) => None,
        };
        let description = task.to_string();

        let result = AssertUnwindSafe(self.execute(task)).catch_unwind().await;

        self.stats.decrement_active();

        match result {
            Ok(()) => self.stats.record_executed(),
            Err(panic) => {
                self.stats.record_failure();
                error!(
                    worker_id = %self.id,
                    task = %description,
                    panic = panic_message(&panic),
                    "Task panicked"
                );
            }
        }

        if let Some(poll) = poll {
            self.queue.push(Task::Poll(poll));
        }
    }

    async fn execute(&self, task: Task) {
        match task {
            Task::Poll(poll) => {
                let outcome = poll.poll(&self.context).await;
                self.stats.record_poll(outcome.received);
                for work in outcome.work {
                    self.queue.push(Task::Work(work));
                }
            }
            Task::Work(work) => {
                if !work.run(&self.context).await {
                    self.stats.record_handler_failure();
                }
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
