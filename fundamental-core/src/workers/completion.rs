//! Completion worker: finalize the scan's task row.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::error::Result;
use crate::messaging::ScanBroker;
use crate::store::TaskStore;

use super::progress::JobProgressTracker;
use super::serialization::{JobStagePayload, decode};
use super::worker::ScanWorker;
use super::COMPLETION_JOBS_TOPIC;

/// Consumes `completion_jobs`: marks the driving task COMPLETED (or
/// CANCELLED when the cancellation flag is up) and clears any residual
/// counters for the library.
pub struct CompletionWorker {
    tracker: JobProgressTracker,
    store: Arc<dyn TaskStore>,
}

impl std::fmt::Debug for CompletionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionWorker").finish()
    }
}

impl CompletionWorker {
    pub fn new(broker: Arc<dyn ScanBroker>, store: Arc<dyn TaskStore>) -> Self {
        let tracker = JobProgressTracker::new(Arc::clone(&broker));
        Self { tracker, store }
    }
}

#[async_trait]
impl ScanWorker for CompletionWorker {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn input_topic(&self) -> &'static str {
        COMPLETION_JOBS_TOPIC
    }

    async fn process(&self, payload: Value) -> Result<Option<Value>> {
        let message: JobStagePayload = match decode(payload) {
            Ok(message) => message,
            Err(err) => {
                error!("Invalid completion payload: {}", err);
                return Ok(None);
            }
        };

        // Clear anything a partially failed chain left behind.
        self.tracker.clear_job(message.library_id).await?;

        let Some(task_id) = message.task_id else {
            info!(
                "Scan for library {} complete (no tracking task)",
                message.library_id
            );
            return Ok(None);
        };

        if self.tracker.is_cancelled(task_id).await? {
            self.store.cancel_task(task_id).await?;
            self.tracker.clear_cancelled(task_id).await?;
            info!(
                "Scan task {} for library {} finished as cancelled",
                task_id, message.library_id
            );
        } else {
            self.store.complete_task(task_id).await?;
            info!(
                "Scan task {} for library {} completed",
                task_id, message.library_id
            );
        }

        Ok(None)
    }
}
