//! Broker-backed runtime tests over the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use fundamental_core::error::Result;
use fundamental_core::messaging::{MemoryBroker, MessageBroker, ScanBroker};
use fundamental_core::model::{TaskId, TaskStatus, TaskType};
use fundamental_core::runtime::{
    BrokerTaskRunner, TaskActorWorker, TaskContext, TaskEnqueuer, TaskHandler,
    TaskHandlerRegistry, TaskRuntime,
};
use fundamental_core::store::{MemoryTaskStore, TaskStore};
use fundamental_core::workers::JobProgressTracker;

struct QuickHandler;

#[async_trait]
impl TaskHandler for QuickHandler {
    async fn run(
        &self,
        ctx: &TaskContext,
        payload: Value,
        _metadata: Option<Value>,
    ) -> Result<()> {
        ctx.update_progress(1.0, Some(serde_json::json!({"echo": payload})))
            .await?;
        Ok(())
    }
}

struct SlowHandler;

#[async_trait]
impl TaskHandler for SlowHandler {
    async fn run(
        &self,
        _ctx: &TaskContext,
        _payload: Value,
        _metadata: Option<Value>,
    ) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

struct Fixture {
    store: Arc<dyn TaskStore>,
    broker: Arc<MemoryBroker>,
    runner: Arc<BrokerTaskRunner>,
}

async fn fixture(registry: TaskHandlerRegistry) -> Fixture {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let scan_broker: Arc<dyn ScanBroker> = Arc::clone(&broker) as _;

    let runner = Arc::new(BrokerTaskRunner::new(
        Arc::clone(&store),
        Arc::clone(&scan_broker),
    ));

    let worker = Arc::new(TaskActorWorker::new(
        Arc::clone(&store),
        Arc::new(registry),
        Arc::clone(&runner) as Arc<dyn TaskEnqueuer>,
    ));
    worker.attach(scan_broker.as_ref()).await.unwrap();
    broker.start().await.unwrap();

    Fixture {
        store,
        broker,
        runner,
    }
}

async fn wait_for_status(store: &Arc<dyn TaskStore>, id: TaskId, status: TaskStatus) {
    for _ in 0..300 {
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
async fn enqueued_tasks_execute_on_the_actor_topic() {
    let mut registry = TaskHandlerRegistry::new();
    registry.register(TaskType::EmailSend, Arc::new(QuickHandler));
    let fixture = fixture(registry).await;

    let task_id = fixture
        .runner
        .enqueue(
            TaskType::EmailSend,
            serde_json::json!({"to": "reader@example.com"}),
            1,
            None,
        )
        .await
        .unwrap();

    wait_for_status(&fixture.store, task_id, TaskStatus::Completed).await;

    let task = fixture.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.progress, 1.0);
    assert_eq!(task.task_data.unwrap()["echo"]["to"], "reader@example.com");

    fixture.broker.stop().await.unwrap();
}

#[tokio::test]
async fn exceeding_the_time_limit_cancels_the_task() {
    let mut registry = TaskHandlerRegistry::new();
    registry.register(TaskType::PvrDownloadMonitor, Arc::new(SlowHandler));
    let fixture = fixture(registry).await;

    let task_id = fixture
        .runner
        .enqueue(
            TaskType::PvrDownloadMonitor,
            serde_json::json!({}),
            1,
            Some(serde_json::json!({
                "scheduled": true,
                "max_runtime_seconds": 0.05,
            })),
        )
        .await
        .unwrap();

    wait_for_status(&fixture.store, task_id, TaskStatus::Cancelled).await;

    fixture.broker.stop().await.unwrap();
}

#[tokio::test]
async fn cancel_sets_the_broker_side_flag() {
    let registry = TaskHandlerRegistry::new();
    let fixture = fixture(registry).await;
    fixture.broker.stop().await.unwrap();

    // Enqueue with no consumers running so the task stays pending.
    let task_id = fixture
        .runner
        .enqueue(TaskType::LibraryScan, serde_json::json!({}), 1, None)
        .await
        .unwrap();

    assert!(fixture.runner.cancel(task_id).await.unwrap());
    assert_eq!(
        fixture.runner.status(task_id).await.unwrap(),
        TaskStatus::Cancelled
    );

    let tracker =
        JobProgressTracker::new(Arc::clone(&fixture.broker) as Arc<dyn ScanBroker>);
    assert!(tracker.is_cancelled(task_id).await.unwrap());

    // Remote handlers poll the flag; a second cancel is a no-op.
    assert!(!fixture.runner.cancel(task_id).await.unwrap());
}
