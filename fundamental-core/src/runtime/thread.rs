//! In-process task runner over a bounded worker pool.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fundamental_model::{TaskId, TaskStatus, TaskType};

use crate::error::{CoreError, Result};
use crate::store::TaskStore;

use super::executor::execute_task;
use super::{QueuedTask, TaskEnqueuer, TaskHandlerRegistry, TaskRuntime, task_not_found};

const DEFAULT_MAX_WORKERS: usize = 8;
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue handle shared with handlers for subtask enqueueing. Creating
/// the row and pushing onto the queue lives here so the runner and the
/// handler-facing enqueuer cannot drift apart.
struct QueueSender {
    store: Arc<dyn TaskStore>,
    queue_tx: mpsc::UnboundedSender<QueuedTask>,
    in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskEnqueuer for QueueSender {
    async fn enqueue(
        &self,
        task_type: TaskType,
        payload: Value,
        user_id: i64,
        metadata: Option<Value>,
    ) -> Result<TaskId> {
        let task = self
            .store
            .create_task(task_type, user_id, metadata.clone())
            .await?;

        let item = QueuedTask {
            task_id: task.id,
            task_type,
            payload,
            user_id,
            metadata,
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.queue_tx.send(item).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.store
                .fail_task(task.id, "task runner is shut down")
                .await?;
            return Err(CoreError::Configuration(
                "task runner is shut down".to_string(),
            ));
        }

        info!("Task {} ({}) queued for user {}", task.id, task_type, user_id);
        Ok(task.id)
    }
}

/// Bounded-pool task runner: a FIFO queue drained by `max_workers`
/// workers, with per-task cancellation tokens tracked so `cancel` can
/// reach running instances.
pub struct ThreadTaskRunner {
    store: Arc<dyn TaskStore>,
    sender: Arc<QueueSender>,
    running: Arc<DashMap<i64, CancellationToken>>,
    in_flight: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for ThreadTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadTaskRunner")
            .field("running", &self.running.len())
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl ThreadTaskRunner {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<TaskHandlerRegistry>) -> Self {
        Self::with_workers(store, registry, DEFAULT_MAX_WORKERS)
    }

    pub fn with_workers(
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskHandlerRegistry>,
        max_workers: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let in_flight = Arc::new(AtomicUsize::new(0));
        let sender = Arc::new(QueueSender {
            store: Arc::clone(&store),
            queue_tx,
            in_flight: Arc::clone(&in_flight),
        });

        let running: Arc<DashMap<i64, CancellationToken>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        let mut workers = Vec::with_capacity(max_workers.max(1));
        for _ in 0..max_workers.max(1) {
            let store = Arc::clone(&store);
            let registry = Arc::clone(&registry);
            let sender: Arc<dyn TaskEnqueuer> = Arc::clone(&sender) as _;
            let queue_rx = Arc::clone(&queue_rx);
            let running = Arc::clone(&running);
            let in_flight = Arc::clone(&in_flight);
            let shutdown = shutdown.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = queue_rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            item = rx.recv() => item,
                        }
                    };
                    let Some(item) = item else { break };

                    let task_id = item.task_id;
                    let token = CancellationToken::new();
                    running.insert(task_id.as_i64(), token.clone());

                    execute_task(&store, &registry, Arc::clone(&sender), item, token).await;

                    running.remove(&task_id.as_i64());
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }

        info!("Thread task runner started with {} workers", max_workers.max(1));

        Self {
            store,
            sender,
            running,
            in_flight,
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    async fn wait_for_drain(&self) {
        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Shutdown drain timed out with {} tasks outstanding",
                    self.in_flight.load(Ordering::SeqCst)
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[async_trait]
impl TaskEnqueuer for ThreadTaskRunner {
    async fn enqueue(
        &self,
        task_type: TaskType,
        payload: Value,
        user_id: i64,
        metadata: Option<Value>,
    ) -> Result<TaskId> {
        self.sender.enqueue(task_type, payload, user_id, metadata).await
    }
}

#[async_trait]
impl TaskRuntime for ThreadTaskRunner {
    async fn cancel(&self, id: TaskId) -> Result<bool> {
        if self.store.get_task(id).await?.is_none() {
            return Ok(false);
        }

        // Signal a running instance first, then flip the row. Pending
        // tasks are caught by the pre-execution terminal check.
        if let Some(entry) = self.running.get(&id.as_i64()) {
            entry.value().cancel();
        }

        self.store.cancel_task(id).await
    }

    async fn status(&self, id: TaskId) -> Result<TaskStatus> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| task_not_found(id))?;
        Ok(task.status)
    }

    async fn progress(&self, id: TaskId) -> Result<f64> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| task_not_found(id))?;
        Ok(task.progress)
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down thread task runner...");

        self.wait_for_drain().await;
        self.shutdown.cancel();

        let workers: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, worker).await.is_err() {
                warn!("Worker did not shut down gracefully");
            }
        }

        info!("Thread task runner shut down complete");
        Ok(())
    }
}
