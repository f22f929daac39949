//! Worker pool for generation requests
//!
//! A fixed number of workers pull from one bounded FIFO queue:
//! - each submission gets its own oneshot result channel
//! - request statuses live in a map only the pool writes; finished entries
//!   stay queryable until `clear_finished` drops them
//! - `cancel` drops queued work or aborts the running pipeline task
//! - every request runs under the configured timeout
//! - `shutdown` closes the queue and waits for workers to drain it

use crate::config::WorkflowConfig;
use crate::error::{PipelineError, PoolError};
use crate::pipeline::Pipeline;
use crate::types::{GenerationRequest, GenerationResult, RequestId, RequestStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};

struct Job {
    request: GenerationRequest,
    reply: oneshot::Sender<GenerationResult>,
}

/// Receiving side of one submitted request
#[derive(Debug)]
pub struct RequestHandle {
    pub id: RequestId,
    receiver: oneshot::Receiver<GenerationResult>,
}

impl RequestHandle {
    /// Wait for the request to finish
    ///
    /// # Errors
    /// `PoolError::ResultDropped` if the pool went away without answering
    pub async fn wait(self) -> Result<GenerationResult, PoolError> {
        self.receiver
            .await
            .map_err(|_| PoolError::ResultDropped(self.id.to_string()))
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub workers: usize,
    pub queue_capacity: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    /// Requests waiting in the queue
    pub queued: usize,
    /// Requests a worker is running
    pub processing: usize,
}

struct Shared {
    pipeline: Arc<Pipeline>,
    timeout: Duration,
    statuses: DashMap<RequestId, RequestStatus>,
    running: DashMap<RequestId, AbortHandle>,
    stats: Mutex<PoolStats>,
}

/// Fixed-size pool running requests through a [`Pipeline`]
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
    capacity: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("workers", &self.workers.lock().len())
            .field("tracked", &self.shared.statuses.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `max_concurrent_tasks` workers over a queue of
    /// `queue_capacity` (each at least 1). Must run inside a tokio runtime.
    #[must_use]
    pub fn start(pipeline: Arc<Pipeline>, config: &WorkflowConfig) -> Self {
        let workers = config.max_concurrent_tasks.max(1);
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let shared = Arc::new(Shared {
            pipeline,
            timeout: config.request_timeout,
            statuses: DashMap::new(),
            running: DashMap::new(),
            stats: Mutex::new(PoolStats {
                workers,
                queue_capacity: capacity,
                ..PoolStats::default()
            }),
        });

        let handles = (0..workers)
            .map(|n| tokio::spawn(worker_loop(n, Arc::clone(&shared), Arc::clone(&rx))))
            .collect();
        tracing::info!(workers, capacity, "worker pool started");

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            shared,
            capacity,
        }
    }

    /// Queue a request
    ///
    /// # Errors
    /// - `PoolError::QueueFull` when the queue is at capacity
    /// - `PoolError::ShutDown` after [`WorkerPool::shutdown`]
    pub fn submit(&self, request: GenerationRequest) -> Result<RequestHandle, PoolError> {
        let sender = self.sender.lock().clone().ok_or(PoolError::ShutDown)?;
        let id = request.id;
        let (reply, receiver) = oneshot::channel();

        // Tracked before sending so a fast worker always finds the entry.
        self.shared.statuses.insert(id, RequestStatus::Submitted);
        match sender.try_send(Job { request, reply }) {
            Ok(()) => {
                self.shared.stats.lock().submitted += 1;
                tracing::info!(request_id = %id, "request submitted");
                Ok(RequestHandle { id, receiver })
            }
            Err(e) => {
                self.shared.statuses.remove(&id);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => PoolError::QueueFull(self.capacity),
                    mpsc::error::TrySendError::Closed(_) => PoolError::ShutDown,
                })
            }
        }
    }

    /// Submit and wait for the result
    ///
    /// # Errors
    /// See [`WorkerPool::submit`] and [`RequestHandle::wait`]
    pub async fn run(&self, request: GenerationRequest) -> Result<GenerationResult, PoolError> {
        self.submit(request)?.wait().await
    }

    #[must_use]
    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.shared.statuses.get(&id).map(|s| *s)
    }

    /// Cancel a queued or running request. Returns `false` when it had
    /// already finished.
    ///
    /// # Errors
    /// `PoolError::NotFound` for an id the pool never saw
    pub fn cancel(&self, id: RequestId) -> Result<bool, PoolError> {
        let mut status = self
            .shared
            .statuses
            .get_mut(&id)
            .ok_or_else(|| PoolError::NotFound(id.to_string()))?;
        let current = *status;
        match current {
            RequestStatus::Submitted | RequestStatus::Processing => {
                *status = RequestStatus::Cancelled;
                drop(status);
                if let Some(handle) = self.shared.running.get(&id) {
                    handle.abort();
                }
                tracing::info!(request_id = %id, "request cancelled");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drop finished requests from the status map; returns how many.
    /// Long-running pools should call this periodically, since terminal
    /// statuses are otherwise kept for the life of the pool.
    pub fn clear_finished(&self) -> usize {
        let before = self.shared.statuses.len();
        self.shared.statuses.retain(|_, s| !s.is_terminal());
        before - self.shared.statuses.len()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut stats = self.shared.stats.lock().clone();
        for entry in &self.shared.statuses {
            match entry.value() {
                RequestStatus::Submitted => stats.queued += 1,
                RequestStatus::Processing => stats.processing += 1,
                _ => {}
            }
        }
        stats
    }

    /// Stop accepting work and wait until queued requests are done
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker ended abnormally");
            }
        }
        tracing::info!("worker pool shut down");
    }
}

async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
) {
    tracing::debug!(worker, "worker started");
    loop {
        let job = queue.lock().await.recv().await;
        let Some(job) = job else { break };
        shared.process(worker, job).await;
    }
    tracing::debug!(worker, "worker stopped");
}

impl Shared {
    /// Move a queued request to processing; `false` if it was cancelled
    fn begin(&self, id: RequestId) -> bool {
        match self.statuses.get_mut(&id) {
            Some(mut s) if *s == RequestStatus::Submitted => {
                *s = RequestStatus::Processing;
                true
            }
            _ => false,
        }
    }

    fn is_cancelled(&self, id: RequestId) -> bool {
        self.statuses
            .get(&id)
            .is_some_and(|s| *s == RequestStatus::Cancelled)
    }

    fn cancelled_result(id: RequestId, elapsed: f64) -> GenerationResult {
        GenerationResult::failure(id, PipelineError::Cancelled.to_string(), elapsed)
    }

    async fn process(&self, worker: usize, job: Job) {
        let Job { request, reply } = job;
        let id = request.id;
        let started = Instant::now();

        if !self.begin(id) {
            tracing::debug!(worker, request_id = %id, "skipping cancelled request");
            self.stats.lock().cancelled += 1;
            if reply.send(Self::cancelled_result(id, 0.0)).is_err() {
                tracing::debug!(request_id = %id, "caller no longer waiting");
            }
            return;
        }
        tracing::info!(worker, request_id = %id, "processing request");

        let pipeline = Arc::clone(&self.pipeline);
        let task = tokio::spawn(async move { pipeline.generate(&request).await });
        let abort = task.abort_handle();
        self.running.insert(id, abort.clone());
        if self.is_cancelled(id) {
            abort.abort();
        }

        let outcome = tokio::time::timeout(self.timeout, task).await;
        self.running.remove(&id);
        let elapsed = started.elapsed().as_secs_f64();

        let (status, result) = match outcome {
            Ok(Ok(result)) => (result.status(), result),
            Ok(Err(e)) if e.is_cancelled() => (RequestStatus::Cancelled, Self::cancelled_result(id, elapsed)),
            Ok(Err(e)) => {
                tracing::error!(worker, request_id = %id, error = %e, "pipeline task panicked");
                (
                    RequestStatus::Failed,
                    GenerationResult::failure(id, format!("pipeline task failed: {e}"), elapsed),
                )
            }
            Err(_) => {
                abort.abort();
                let error = PipelineError::Timeout {
                    duration_secs: self.timeout.as_secs(),
                };
                tracing::warn!(worker, request_id = %id, error = %error, "request timed out");
                self.stats.lock().timed_out += 1;
                (RequestStatus::Failed, GenerationResult::failure(id, error.to_string(), elapsed))
            }
        };

        // A cancel that raced with completion still wins: terminal states never change.
        let (status, result) = if self.is_cancelled(id) {
            (RequestStatus::Cancelled, Self::cancelled_result(id, elapsed))
        } else {
            (status, result)
        };
        self.statuses.insert(id, status);
        {
            let mut stats = self.stats.lock();
            match status {
                RequestStatus::Completed => stats.completed += 1,
                RequestStatus::Cancelled => stats.cancelled += 1,
                _ => stats.failed += 1,
            }
        }
        tracing::info!(worker, request_id = %id, %status, elapsed_secs = elapsed, "request finished");

        if reply.send(result).is_err() {
            tracing::debug!(request_id = %id, "caller no longer waiting");
        }
    }
}
