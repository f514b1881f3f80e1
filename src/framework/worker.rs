//! # Workers
//!
//! A [`Worker`] is a named, sequential execution context: a Tokio task draining a queue of
//! jobs one at a time. Services pinned to a worker have every lifecycle call marshalled onto
//! that queue, so from the service's own point of view start/stop/update/swap never overlap.
//!
//! The split mirrors a classic actor: [`WorkerLoop`] is the server half that owns the
//! receiver, [`Worker`] is the cheap, cloneable client half that posts jobs.
//!
//! ```rust
//! use service_graph::framework::Worker;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (worker, handle) = Worker::spawn("io");
//!     let posted = worker.post(async { 40 + 2 }).unwrap();
//!     assert_eq!(posted.outcome().await.unwrap(), 42);
//!
//!     worker.stop();
//!     handle.await.unwrap();
//! }
//! ```

use crate::framework::{lock, FrameworkError};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

tokio::task_local! {
    static CURRENT_WORKER: Arc<str>;
}

/// Type-erased unit of work executed by a worker loop.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Message sent to a [`WorkerLoop`].
pub enum WorkerRequest {
    Run { job: Job },
    Stop,
}

impl fmt::Debug for WorkerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRequest::Run { .. } => f.write_str("Run { .. }"),
            WorkerRequest::Stop => f.write_str("Stop"),
        }
    }
}

// =============================================================================
// 1. THE LOOP (server half)
// =============================================================================

/// The server half of a worker: owns the queue and runs jobs sequentially.
pub struct WorkerLoop {
    name: Arc<str>,
    receiver: mpsc::UnboundedReceiver<WorkerRequest>,
}

impl WorkerLoop {
    /// Creates a new loop and the [`Worker`] handle that feeds it.
    ///
    /// The loop does nothing until [`WorkerLoop::run`] is spawned.
    pub fn new(name: impl Into<String>) -> (Self, Worker) {
        let name: Arc<str> = Arc::from(name.into());
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker_loop = Self {
            name: name.clone(),
            receiver,
        };
        (worker_loop, Worker { name, sender })
    }

    /// Drains the queue until every handle is dropped or a stop is requested.
    ///
    /// Each job runs in its own task and is awaited before the next one is taken, which
    /// keeps execution sequential while letting a panicking job surface as a `JoinError`
    /// instead of killing the loop.
    pub async fn run(mut self) {
        info!(worker = %self.name, "Worker started");
        let mut processed = 0usize;

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                WorkerRequest::Run { job } => {
                    job.await;
                    processed += 1;
                }
                WorkerRequest::Stop => {
                    debug!(worker = %self.name, "Stop requested");
                    break;
                }
            }
        }

        info!(worker = %self.name, processed, "Worker shutdown");
    }
}

// =============================================================================
// 2. THE HANDLE (client half)
// =============================================================================

/// Cloneable handle posting jobs to a [`WorkerLoop`].
#[derive(Clone)]
pub struct Worker {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<WorkerRequest>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker").field("name", &self.name).finish()
    }
}

impl Worker {
    /// Creates a worker and spawns its loop on the current Tokio runtime.
    pub fn spawn(name: impl Into<String>) -> (Worker, JoinHandle<()>) {
        let (worker_loop, worker) = WorkerLoop::new(name);
        let handle = tokio::spawn(worker_loop.run());
        (worker, handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the worker executing the current task, if any.
    pub fn current() -> Option<String> {
        CURRENT_WORKER.try_with(|name| name.to_string()).ok()
    }

    /// True when called from a job running on this very worker.
    pub fn is_current(&self) -> bool {
        CURRENT_WORKER
            .try_with(|name| **name == *self.name)
            .unwrap_or(false)
    }

    /// Posts a future to the queue. It is enqueued immediately and runs once every job
    /// posted before it has completed.
    pub fn post<F>(&self, fut: F) -> Result<Posted<F::Output>, FrameworkError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (respond_to, response) = oneshot::channel();
        let name = self.name.clone();
        let job: Job = Box::pin(async move {
            let outcome = tokio::spawn(CURRENT_WORKER.scope(name, fut)).await;
            let _ = respond_to.send(outcome);
        });

        self.sender
            .send(WorkerRequest::Run { job })
            .map_err(|_| FrameworkError::WorkerClosed(self.name.to_string()))?;

        Ok(Posted {
            worker: self.name.clone(),
            response,
        })
    }

    /// Asks the loop to exit once the jobs already queued have run.
    pub fn stop(&self) {
        let _ = self.sender.send(WorkerRequest::Stop);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn ptr_eq(&self, other: &Worker) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

/// Pending result of a job posted with [`Worker::post`].
pub struct Posted<R> {
    worker: Arc<str>,
    response: oneshot::Receiver<Result<R, JoinError>>,
}

impl<R> Posted<R> {
    /// Waits for the job. A panic raised by the job is resumed on the caller.
    pub async fn outcome(self) -> Result<R, FrameworkError> {
        match self.response.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(join)) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Ok(Err(_)) | Err(_) => Err(FrameworkError::WorkerDropped(self.worker.to_string())),
        }
    }
}

// =============================================================================
// 3. THE REGISTRY
// =============================================================================

/// Named workers shared by every graph of a [`crate::registry::Context`].
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, (Worker, JoinHandle<()>)>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Worker> {
        lock(&self.workers).get(name).map(|(worker, _)| worker.clone())
    }

    /// Returns the worker registered under `name`, spawning it first if needed.
    /// The flag tells whether this call created it.
    pub fn get_or_create(&self, name: &str) -> (Worker, bool) {
        let mut workers = lock(&self.workers);
        if let Some((worker, _)) = workers.get(name) {
            return (worker.clone(), false);
        }
        let (worker, handle) = Worker::spawn(name);
        workers.insert(name.to_string(), (worker.clone(), handle));
        debug!(worker = name, size = workers.len(), "Worker registered");
        (worker, true)
    }

    /// Unregisters and stops a worker, returning its loop handle for joining.
    pub fn remove(&self, name: &str) -> Option<JoinHandle<()>> {
        let (worker, handle) = lock(&self.workers).remove(name)?;
        worker.stop();
        debug!(worker = name, "Worker removed");
        Some(handle)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.workers).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        lock(&self.workers).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.workers).is_empty()
    }
}
