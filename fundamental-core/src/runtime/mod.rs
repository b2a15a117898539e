//! Pluggable task runtime.
//!
//! Tasks are persisted rows executed by a backend: an in-process bounded
//! pool ([`ThreadTaskRunner`]) or broker-backed workers
//! ([`BrokerTaskRunner`] + [`TaskActorWorker`]). Handlers are resolved by
//! task type from a [`TaskHandlerRegistry`] and receive a uniform
//! [`TaskContext`], so the same handler code runs on either backend.

mod broker;
mod executor;
mod factory;
mod thread;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use fundamental_model::{TaskId, TaskStatus, TaskType};

use crate::error::{CoreError, Result};
use crate::store::TaskStore;

pub use broker::{BrokerTaskRunner, TASK_EXECUTE_TOPIC, TaskActorWorker};
pub use executor::execute_task;
pub use factory::build_runtime;
pub use thread::ThreadTaskRunner;

/// A task waiting for a backend worker.
#[derive(Clone, Debug)]
pub struct QueuedTask {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub payload: Value,
    pub user_id: i64,
    pub metadata: Option<Value>,
}

/// Enqueue-only capability, handed to handlers so they can spawn
/// subtasks without a reference cycle back to the runtime.
#[async_trait]
pub trait TaskEnqueuer: Send + Sync {
    /// Persist a PENDING row and dispatch it. Returns the task id.
    async fn enqueue(
        &self,
        task_type: TaskType,
        payload: Value,
        user_id: i64,
        metadata: Option<Value>,
    ) -> Result<TaskId>;
}

/// Full task runtime surface.
#[async_trait]
pub trait TaskRuntime: TaskEnqueuer {
    /// Cooperative cancel. Flips the row (and any backend-side flag) and
    /// signals the running instance when there is one. Returns whether
    /// the row changed.
    async fn cancel(&self, id: TaskId) -> Result<bool>;

    async fn status(&self, id: TaskId) -> Result<TaskStatus>;

    async fn progress(&self, id: TaskId) -> Result<f64>;

    /// Drain and stop. Logs rather than panics when workers miss the
    /// deadline.
    async fn shutdown(&self) -> Result<()>;
}

/// Everything a handler may touch during execution.
pub struct TaskContext {
    pub task_id: TaskId,
    pub user_id: i64,
    pub store: Arc<dyn TaskStore>,
    cancel: CancellationToken,
    enqueuer: Arc<dyn TaskEnqueuer>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("user_id", &self.user_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl TaskContext {
    pub fn new(
        task_id: TaskId,
        user_id: i64,
        store: Arc<dyn TaskStore>,
        cancel: CancellationToken,
        enqueuer: Arc<dyn TaskEnqueuer>,
    ) -> Self {
        Self {
            task_id,
            user_id,
            store,
            cancel,
            enqueuer,
        }
    }

    /// Write progress and optionally merge metadata into `task_data`.
    pub async fn update_progress(&self, progress: f64, meta: Option<Value>) -> Result<()> {
        self.store
            .update_progress(self.task_id, progress, meta)
            .await
    }

    /// Enqueue a follow-up task attributed to the same user.
    pub async fn enqueue_task(
        &self,
        task_type: TaskType,
        payload: Value,
        metadata: Option<Value>,
    ) -> Result<TaskId> {
        self.enqueuer
            .enqueue(task_type, payload, self.user_id, metadata)
            .await
    }

    /// Handlers poll this between units of work.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Implementation of one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &TaskContext,
        payload: Value,
        metadata: Option<Value>,
    ) -> Result<()>;
}

/// Task type → handler table. Dispatch is by the persisted string tag,
/// so both backends rehydrate handlers the same way.
#[derive(Clone, Default)]
pub struct TaskHandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl fmt::Debug for TaskHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(TaskType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("TaskHandlerRegistry")
            .field("types", &types)
            .finish()
    }
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type, handler);
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }
}

pub(crate) fn task_not_found(id: TaskId) -> CoreError {
    CoreError::NotFound(format!("task {id}"))
}
