//! Thread runtime lifecycle tests over the in-memory task store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use fundamental_core::error::{CoreError, Result};
use fundamental_core::model::{TaskStatus, TaskType};
use fundamental_core::runtime::{
    TaskContext, TaskEnqueuer, TaskHandler, TaskHandlerRegistry, TaskRuntime,
    ThreadTaskRunner,
};
use fundamental_core::store::{MemoryTaskStore, TaskStore};

struct SucceedingHandler {
    done: Arc<Notify>,
}

#[async_trait]
impl TaskHandler for SucceedingHandler {
    async fn run(
        &self,
        ctx: &TaskContext,
        _payload: Value,
        _metadata: Option<Value>,
    ) -> Result<()> {
        ctx.update_progress(0.5, Some(serde_json::json!({"step": "halfway"})))
            .await?;
        self.done.notify_one();
        Ok(())
    }
}

struct FailingHandler;

#[async_trait]
impl TaskHandler for FailingHandler {
    async fn run(
        &self,
        _ctx: &TaskContext,
        _payload: Value,
        _metadata: Option<Value>,
    ) -> Result<()> {
        Err(CoreError::Internal("x".repeat(5000)))
    }
}

/// Handler that never runs to completion unless cancelled.
struct BlockingHandler {
    started: Arc<Notify>,
}

#[async_trait]
impl TaskHandler for BlockingHandler {
    async fn run(
        &self,
        ctx: &TaskContext,
        _payload: Value,
        _metadata: Option<Value>,
    ) -> Result<()> {
        self.started.notify_one();
        loop {
            if ctx.is_cancelled() {
                return Err(CoreError::Cancelled("handler observed cancel".into()));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

struct MarkerHandler;

#[async_trait]
impl TaskHandler for MarkerHandler {
    async fn run(
        &self,
        _ctx: &TaskContext,
        _payload: Value,
        _metadata: Option<Value>,
    ) -> Result<()> {
        panic!("handler must never be invoked for a cancelled pending task");
    }
}

async fn wait_for_status(
    store: &Arc<dyn TaskStore>,
    id: fundamental_core::model::TaskId,
    status: TaskStatus,
) {
    for _ in 0..200 {
        let task = store.get_task(id).await.unwrap().unwrap();
        if task.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let task = store.get_task(id).await.unwrap().unwrap();
    panic!("task {id} stuck in {:?}, wanted {:?}", task.status, status);
}

#[tokio::test]
async fn successful_task_completes_and_updates_statistics() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let done = Arc::new(Notify::new());

    let mut registry = TaskHandlerRegistry::new();
    registry.register(
        TaskType::EmailSend,
        Arc::new(SucceedingHandler {
            done: Arc::clone(&done),
        }),
    );

    let runner = ThreadTaskRunner::with_workers(Arc::clone(&store), Arc::new(registry), 2);

    let task_id = runner
        .enqueue(TaskType::EmailSend, serde_json::json!({}), 1, None)
        .await
        .unwrap();

    wait_for_status(&store, task_id, TaskStatus::Completed).await;

    let task = store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.progress, 1.0);
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());
    assert!(task.cancelled_at.is_none());
    assert!(task.error_message.is_none());
    assert_eq!(task.task_data.unwrap()["step"], "halfway");

    let stats = store
        .get_statistics(Some(TaskType::EmailSend))
        .await
        .unwrap();
    assert_eq!(stats[0].total_count, 1);
    assert_eq!(stats[0].success_count, 1);

    runner.shutdown().await.unwrap();
}

#[tokio::test]
async fn failing_task_records_a_bounded_error_message() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());

    let mut registry = TaskHandlerRegistry::new();
    registry.register(TaskType::BookConvert, Arc::new(FailingHandler));

    let runner = ThreadTaskRunner::with_workers(Arc::clone(&store), Arc::new(registry), 2);

    let task_id = runner
        .enqueue(TaskType::BookConvert, serde_json::json!({}), 1, None)
        .await
        .unwrap();

    wait_for_status(&store, task_id, TaskStatus::Failed).await;

    let task = store.get_task(task_id).await.unwrap().unwrap();
    let message = task.error_message.unwrap();
    assert_eq!(message.chars().count(), 2000);

    let stats = store
        .get_statistics(Some(TaskType::BookConvert))
        .await
        .unwrap();
    assert_eq!(stats[0].failure_count, 1);

    runner.shutdown().await.unwrap();
}

#[tokio::test]
async fn unregistered_task_types_fail_cleanly() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let runner =
        ThreadTaskRunner::with_workers(Arc::clone(&store), Arc::new(TaskHandlerRegistry::new()), 1);

    let task_id = runner
        .enqueue(TaskType::ProwlarrSync, serde_json::json!({}), 1, None)
        .await
        .unwrap();

    wait_for_status(&store, task_id, TaskStatus::Failed).await;
    let task = store.get_task(task_id).await.unwrap().unwrap();
    assert!(task.error_message.unwrap().contains("no handler registered"));

    runner.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelling_a_pending_task_prevents_execution() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let started = Arc::new(Notify::new());

    let mut registry = TaskHandlerRegistry::new();
    registry.register(
        TaskType::ThumbnailGenerate,
        Arc::new(BlockingHandler {
            started: Arc::clone(&started),
        }),
    );
    registry.register(TaskType::MetadataBackup, Arc::new(MarkerHandler));

    // One worker: the blocker occupies it while the second task waits in
    // the queue.
    let runner = ThreadTaskRunner::with_workers(Arc::clone(&store), Arc::new(registry), 1);

    let blocker_id = runner
        .enqueue(TaskType::ThumbnailGenerate, serde_json::json!({}), 1, None)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), started.notified())
        .await
        .expect("blocker should start");

    let pending_id = runner
        .enqueue(TaskType::MetadataBackup, serde_json::json!({}), 1, None)
        .await
        .unwrap();

    // Cancel while still pending: the handler must never be invoked.
    assert!(runner.cancel(pending_id).await.unwrap());
    assert_eq!(runner.status(pending_id).await.unwrap(), TaskStatus::Cancelled);

    // Release the blocker and let the worker reach the cancelled task.
    assert!(runner.cancel(blocker_id).await.unwrap());
    wait_for_status(&store, blocker_id, TaskStatus::Cancelled).await;

    // Give the worker time to pull (and skip) the pending task.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let pending = store.get_task(pending_id).await.unwrap().unwrap();
    assert_eq!(pending.status, TaskStatus::Cancelled);
    assert!(pending.started_at.is_none());

    runner.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelling_a_running_task_signals_its_token() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let started = Arc::new(Notify::new());

    let mut registry = TaskHandlerRegistry::new();
    registry.register(
        TaskType::ThumbnailGenerate,
        Arc::new(BlockingHandler {
            started: Arc::clone(&started),
        }),
    );

    let runner = ThreadTaskRunner::with_workers(Arc::clone(&store), Arc::new(registry), 1);

    let task_id = runner
        .enqueue(TaskType::ThumbnailGenerate, serde_json::json!({}), 1, None)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), started.notified())
        .await
        .expect("handler should start");

    assert!(runner.cancel(task_id).await.unwrap());
    wait_for_status(&store, task_id, TaskStatus::Cancelled).await;

    // Idempotent second cancel reports no change.
    assert!(!runner.cancel(task_id).await.unwrap());

    runner.shutdown().await.unwrap();
}

#[tokio::test]
async fn status_and_progress_for_unknown_tasks_error() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let runner =
        ThreadTaskRunner::with_workers(store, Arc::new(TaskHandlerRegistry::new()), 1);

    let missing = fundamental_core::model::TaskId(424242);
    assert!(runner.status(missing).await.is_err());
    assert!(runner.progress(missing).await.is_err());
    assert!(!runner.cancel(missing).await.unwrap());

    runner.shutdown().await.unwrap();
}
