//! Bounded in-process task queue and its consumer loops.
//!
//! ## Flow
//!
//! ```text
//! producer -- submit(task) --> outstanding += 1 --> bounded FIFO (blocks when full)
//!                                                         |
//! consumer <-- run_loop(worker_id) <----------------------+
//!    |  derive TaskScope, wrap job in middleware, run inside the task span
//!    |  log and discard any error
//!    +- outstanding -= 1   (always, also when the job panics)
//! ```
//!
//! ## Guarantees
//!
//! - One consumer loop: tasks run in submission order.
//! - Several consumer loops: each task runs on exactly one of them; the order
//!   across loops is unspecified.
//! - `submit` returning means the task was accepted, not that it ran.
//! - Job errors never reach the submitter and are never retried.
//!
//! Producers must not submit from inside a job running on the only consumer
//! loop while the queue is full: the loop would wait on itself.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::middleware::{self, Middleware};
use crate::scope::TaskScope;
use crate::task::Task;

struct Shared {
    sender: SyncSender<Task>,
    receiver: Mutex<Receiver<Task>>,
    outstanding: AtomicUsize,
    middleware: RwLock<Middleware>,
    config: WorkerConfig,
}

/// Handle to a task queue. Clones share the same queue; hand one to every
/// producer instead of reaching for a global.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("capacity", &self.shared.config.queue_capacity)
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` waiting tasks.
    ///
    /// A capacity of 0 makes every `submit` wait for a consumer to take the task.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(WorkerConfig::default().with_queue_capacity(capacity))
    }

    pub fn with_config(config: WorkerConfig) -> Self {
        let (sender, receiver) = mpsc::sync_channel(config.queue_capacity);
        Self {
            shared: Arc::new(Shared {
                sender,
                receiver: Mutex::new(receiver),
                outstanding: AtomicUsize::new(0),
                middleware: RwLock::new(middleware::identity()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.queue_capacity
    }

    /// Accept a task, blocking while the queue is full.
    pub fn submit(&self, task: Task) {
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        debug!(task = %task.name(), "task submitted");

        // The receiver lives as long as `Shared`, so this only fails if the
        // queue is being torn down underneath us.
        if let Err(mpsc::SendError(task)) = self.shared.sender.send(task) {
            self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            warn!(task = %task.name(), "task queue disconnected; task dropped");
        }
    }

    /// Replace the middleware applied to every job executed from now on.
    pub fn use_middleware(&self, middleware: Middleware) {
        *self
            .shared
            .middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner) = middleware;
    }

    /// Tasks submitted but not yet finished (queued or running).
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    /// Consume tasks forever on the calling thread.
    ///
    /// There is no stop signal: the loop lives as long as the process. A job
    /// that panics ends the loop (after its outstanding count is released)
    /// unless a recovering middleware is installed.
    pub fn run_loop(&self, worker_id: usize) {
        info!(worker_id, "task worker started");

        loop {
            let next = {
                let receiver = self
                    .shared
                    .receiver
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                receiver.recv()
            };

            match next {
                Ok(task) => self.execute(worker_id, task),
                Err(mpsc::RecvError) => break,
            }
        }

        info!(worker_id, "task worker stopped");
    }

    /// Start `count` consumer loops on named threads (`task-worker-<id>`).
    pub fn spawn_workers(&self, count: usize) -> Result<Vec<thread::JoinHandle<()>>, WorkerError> {
        (1..=count)
            .map(|worker_id| {
                let queue = self.clone();
                thread::Builder::new()
                    .name(format!("task-worker-{worker_id}"))
                    .spawn(move || queue.run_loop(worker_id))
                    .map_err(WorkerError::from)
            })
            .collect()
    }

    /// Start as many consumer loops as the config asks for.
    pub fn start(&self) -> Result<Vec<thread::JoinHandle<()>>, WorkerError> {
        self.spawn_workers(self.shared.config.consumers)
    }

    /// Wait until every accepted task has finished or `deadline` passes.
    ///
    /// Producers must be stopped first; new submissions keep the count above
    /// zero. Giving up at the deadline does not stop running tasks.
    pub fn shutdown(&self, deadline: Instant) -> Result<(), WorkerError> {
        let interval = self.shared.config.shutdown_poll_interval;

        loop {
            let outstanding = self.outstanding();
            if outstanding == 0 {
                info!("task queue drained");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(outstanding, "task queue shutdown deadline elapsed");
                return Err(WorkerError::ShutdownTimeout { outstanding });
            }

            debug!(outstanding, "waiting for outstanding tasks");
            thread::sleep(interval.min(deadline - now));
        }
    }

    pub fn shutdown_timeout(&self, timeout: Duration) -> Result<(), WorkerError> {
        self.shutdown(Instant::now() + timeout)
    }

    fn execute(&self, worker_id: usize, task: Task) {
        let _completion = CompletionGuard(&self.shared.outstanding);

        let (origin, name, job, submitted_at) = task.into_parts();
        let mut scope = TaskScope::derive(worker_id, name, origin.as_ref());
        drop(origin);

        let middleware = Arc::clone(
            &self
                .shared
                .middleware
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let job = (*middleware)(job);

        let span = scope.span();
        let _entered = span.enter();
        let waited_ms = (Utc::now() - submitted_at).num_milliseconds();
        debug!(waited_ms, "task started");

        if let Err(err) = job.run(&mut scope) {
            let message = format!("{err:#}");
            error!(worker_id, task = %scope.task_name(), error = %message, "task failed");
        }
    }
}

/// Releases one outstanding slot when dropped, including during unwinding.
struct CompletionGuard<'a>(&'a AtomicUsize);

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
