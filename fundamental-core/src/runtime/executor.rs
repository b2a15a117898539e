//! Shared task execution lifecycle.
//!
//! Both backends funnel through [`execute_task`] so the status
//! transitions, error capture, and cancellation handling behave
//! identically regardless of where the handler runs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::CoreError;
use crate::store::TaskStore;

use super::{QueuedTask, TaskContext, TaskEnqueuer, TaskHandlerRegistry};

/// Run one queued task to a terminal state.
///
/// Never returns an error: every failure path lands in the task row
/// (FAILED with a bounded message) or in the log.
pub async fn execute_task(
    store: &Arc<dyn TaskStore>,
    registry: &TaskHandlerRegistry,
    enqueuer: Arc<dyn TaskEnqueuer>,
    item: QueuedTask,
    cancel: CancellationToken,
) {
    let task_id = item.task_id;

    let task = match store.get_task(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            warn!("Task {} not found in database", task_id);
            return;
        }
        Err(err) => {
            error!("Failed to load task {}: {}", task_id, err);
            return;
        }
    };

    // Cancelled (or otherwise finished) before a worker picked it up:
    // the handler must never run.
    if task.is_terminal() {
        debug!(
            "Task {} already {} before execution, skipping",
            task_id, task.status
        );
        return;
    }

    if let Err(err) = store.start_task(task_id).await {
        error!("Failed to start task {}: {}", task_id, err);
        return;
    }

    let Some(handler) = registry.get(item.task_type) else {
        let message = format!("no handler registered for task type {}", item.task_type);
        warn!("Task {}: {}", task_id, message);
        if let Err(err) = store.fail_task(task_id, &message).await {
            error!("Failed to mark task {} as failed: {}", task_id, err);
        }
        return;
    };

    let ctx = TaskContext::new(
        task_id,
        item.user_id,
        Arc::clone(store),
        cancel.clone(),
        enqueuer,
    );

    let outcome = handler.run(&ctx, item.payload, item.metadata).await;

    let transition = match outcome {
        Ok(()) if cancel.is_cancelled() => store.cancel_task(task_id).await.map(|_| ()),
        Ok(()) => store.complete_task(task_id).await,
        Err(CoreError::Cancelled(reason)) => {
            debug!("Task {} cancelled: {}", task_id, reason);
            store.cancel_task(task_id).await.map(|_| ())
        }
        Err(err) => {
            let message = err.to_string();
            warn!("Task {} failed: {}", task_id, message);
            store.fail_task(task_id, &message).await
        }
    };

    if let Err(err) = transition {
        error!("Failed to finalize task {}: {}", task_id, err);
    }
}
