//! Broker-backed task runner and its worker.
//!
//! `enqueue` persists the row and publishes an execution envelope on a
//! well-known topic; a [`TaskActorWorker`] consuming that topic
//! rehydrates the handler by task type and drives the shared lifecycle,
//! enforcing the optional per-message time limit. Cancellation cannot
//! interrupt a remote execution: it flips the row and the broker-side
//! flag, and handlers poll.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fundamental_model::{TaskId, TaskStatus, TaskType};

use crate::error::{CoreError, Result};
use crate::messaging::{BrokerMessage, MessageHandler, ScanBroker};
use crate::store::TaskStore;
use crate::workers::JobProgressTracker;

use super::executor::execute_task;
use super::{QueuedTask, TaskEnqueuer, TaskHandlerRegistry, TaskRuntime, task_not_found};

/// Actor topic consumed by [`TaskActorWorker`].
pub const TASK_EXECUTE_TOPIC: &str = "task_execute";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct TaskExecuteEnvelope {
    task_id: i64,
    user_id: i64,
    task_type: String,
    payload: Value,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    time_limit_seconds: Option<f64>,
}

fn time_limit_from_metadata(metadata: Option<&Value>) -> Option<f64> {
    metadata?
        .get("max_runtime_seconds")
        .and_then(Value::as_f64)
        .filter(|seconds| *seconds > 0.0)
}

/// Task runner that delegates execution to broker workers.
pub struct BrokerTaskRunner {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn ScanBroker>,
}

impl fmt::Debug for BrokerTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerTaskRunner")
            .field("topic", &TASK_EXECUTE_TOPIC)
            .finish()
    }
}

impl BrokerTaskRunner {
    pub fn new(store: Arc<dyn TaskStore>, broker: Arc<dyn ScanBroker>) -> Self {
        Self { store, broker }
    }
}

#[async_trait]
impl TaskEnqueuer for BrokerTaskRunner {
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

        let envelope = TaskExecuteEnvelope {
            task_id: task.id.as_i64(),
            user_id,
            task_type: task_type.as_str().to_string(),
            payload,
            time_limit_seconds: time_limit_from_metadata(metadata.as_ref()),
            metadata,
        };

        let published = self
            .broker
            .publish(TASK_EXECUTE_TOPIC, serde_json::to_value(&envelope)?)
            .await;

        if let Err(err) = published {
            error!("Failed to enqueue task {} via broker: {}", task.id, err);
            self.store
                .fail_task(task.id, "failed to publish task to broker")
                .await?;
            return Err(err);
        }

        info!(
            "Task {} ({}) enqueued via broker for user {}",
            task.id, task_type, user_id
        );
        Ok(task.id)
    }
}

#[async_trait]
impl TaskRuntime for BrokerTaskRunner {
    async fn cancel(&self, id: TaskId) -> Result<bool> {
        if self.store.get_task(id).await?.is_none() {
            return Ok(false);
        }

        // Remote executions observe the flag the next time they poll.
        let tracker = JobProgressTracker::new(Arc::clone(&self.broker));
        tracker.mark_cancelled(id).await?;

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
        // Workers are owned by the broker/worker manager; nothing to
        // join here.
        Ok(())
    }
}

/// Broker consumer that executes task envelopes.
pub struct TaskActorWorker {
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskHandlerRegistry>,
    enqueuer: Arc<dyn TaskEnqueuer>,
}

impl fmt::Debug for TaskActorWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskActorWorker")
            .field("registry", &self.registry)
            .finish()
    }
}

impl TaskActorWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskHandlerRegistry>,
        enqueuer: Arc<dyn TaskEnqueuer>,
    ) -> Self {
        Self {
            store,
            registry,
            enqueuer,
        }
    }

    /// Register this worker on the broker's actor topic.
    pub async fn attach(self: Arc<Self>, broker: &dyn ScanBroker) -> Result<()> {
        broker.subscribe(TASK_EXECUTE_TOPIC, self).await
    }
}

#[async_trait]
impl MessageHandler for TaskActorWorker {
    async fn handle(&self, message: BrokerMessage) -> Result<()> {
        let envelope: TaskExecuteEnvelope = serde_json::from_value(message.payload)?;

        let task_type: TaskType = envelope.task_type.parse().map_err(|err| {
            CoreError::InvalidInput(format!("task envelope {}: {err}", message.id))
        })?;

        let task_id = TaskId(envelope.task_id);
        let item = QueuedTask {
            task_id,
            task_type,
            payload: envelope.payload,
            user_id: envelope.user_id,
            metadata: envelope.metadata,
        };

        let cancel = CancellationToken::new();
        let execution = execute_task(
            &self.store,
            &self.registry,
            Arc::clone(&self.enqueuer),
            item,
            cancel.clone(),
        );

        match envelope.time_limit_seconds {
            Some(seconds) => {
                let limit = Duration::from_secs_f64(seconds);
                if tokio::time::timeout(limit, execution).await.is_err() {
                    warn!(
                        "Task {} exceeded max runtime ({:.0} seconds); marking cancelled",
                        task_id, seconds
                    );
                    cancel.cancel();
                    self.store.cancel_task(task_id).await?;
                }
            }
            None => execution.await,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_limit_requires_a_positive_number() {
        assert_eq!(
            time_limit_from_metadata(Some(&serde_json::json!({
                "max_runtime_seconds": 30.0
            }))),
            Some(30.0)
        );
        assert_eq!(
            time_limit_from_metadata(Some(&serde_json::json!({
                "max_runtime_seconds": 0
            }))),
            None
        );
        assert_eq!(
            time_limit_from_metadata(Some(&serde_json::json!({"scheduled": true}))),
            None
        );
        assert_eq!(time_limit_from_metadata(None), None);
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = TaskExecuteEnvelope {
            task_id: 42,
            user_id: 7,
            task_type: "library_scan".into(),
            payload: serde_json::json!({"library_id": 3}),
            metadata: Some(serde_json::json!({"scheduled": true})),
            time_limit_seconds: Some(60.0),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        let back: TaskExecuteEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back.task_id, 42);
        assert_eq!(back.task_type, "library_scan");
        assert_eq!(back.time_limit_seconds, Some(60.0));
    }
}
