//! Per-job progress accounting on the broker's key-value side.
//!
//! One scan job per library: Crawl establishes the total, every
//! per-author worker accounts exactly one item per message, and the
//! worker that accounts the final item gets the "this was the last
//! item" signal that releases the next job-level stage.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use fundamental_model::{LibraryId, TaskId};

use crate::error::Result;
use crate::messaging::ScanBroker;

const PREFIX: &str = "scan:progress";
/// Keys expire after a day so abandoned jobs cannot leak counters.
const JOB_KEY_TTL: Duration = Duration::from_secs(86_400);
/// Per-author stages with an idempotent started flag.
const TRACKED_STAGES: [&str; 3] = ["match", "ingest", "link"];

/// Tracks distributed scan-job progress through atomic counters.
#[derive(Clone)]
pub struct JobProgressTracker {
    broker: Arc<dyn ScanBroker>,
}

impl std::fmt::Debug for JobProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProgressTracker").finish()
    }
}

impl JobProgressTracker {
    pub fn new(broker: Arc<dyn ScanBroker>) -> Self {
        Self { broker }
    }

    fn total_key(library_id: LibraryId) -> String {
        format!("{PREFIX}:{library_id}:total")
    }

    fn processed_key(library_id: LibraryId) -> String {
        format!("{PREFIX}:{library_id}:processed")
    }

    fn task_id_key(library_id: LibraryId) -> String {
        format!("{PREFIX}:{library_id}:task_id")
    }

    fn stage_started_key(library_id: LibraryId, stage: &str) -> String {
        format!("{PREFIX}:{library_id}:stage_started:{stage}")
    }

    fn cancellation_key(task_id: TaskId) -> String {
        format!("{PREFIX}:cancelled:{task_id}")
    }

    /// Remove any counters left behind by a previous scan of this
    /// library.
    pub async fn clear_job(&self, library_id: LibraryId) -> Result<()> {
        let mut keys = vec![
            Self::total_key(library_id),
            Self::processed_key(library_id),
            Self::task_id_key(library_id),
        ];
        keys.extend(
            TRACKED_STAGES
                .iter()
                .map(|stage| Self::stage_started_key(library_id, stage)),
        );
        self.broker.delete(&keys).await?;
        info!("Cleared scan job data for library {}", library_id);
        Ok(())
    }

    /// Set `total = N`, `processed = 0`, and remember the driving task.
    pub async fn initialize_job(
        &self,
        library_id: LibraryId,
        total_items: i64,
        task_id: Option<TaskId>,
    ) -> Result<()> {
        self.broker
            .set(
                &Self::total_key(library_id),
                &total_items.to_string(),
                Some(JOB_KEY_TTL),
            )
            .await?;
        self.broker
            .set(&Self::processed_key(library_id), "0", Some(JOB_KEY_TTL))
            .await?;
        if let Some(task_id) = task_id {
            self.broker
                .set(
                    &Self::task_id_key(library_id),
                    &task_id.to_string(),
                    Some(JOB_KEY_TTL),
                )
                .await?;
        }
        info!(
            "Initialized scan job for library {} with {} items",
            library_id, total_items
        );
        Ok(())
    }

    /// Account one processed (or dropped) item.
    ///
    /// Returns true when this was the final item: all counter keys are
    /// deleted and the caller must trigger the next job-level stage. When
    /// the job was never initialized or already finished, returns false
    /// without counting.
    pub async fn mark_item_processed(&self, library_id: LibraryId) -> Result<bool> {
        let Some(total) = self.broker.get(&Self::total_key(library_id)).await? else {
            debug!(
                "Total count not found for library {} (job may be completed or not initialized)",
                library_id
            );
            return Ok(false);
        };
        let total: i64 = total.parse().unwrap_or(0);

        let processed = self.broker.incr(&Self::processed_key(library_id)).await?;
        debug!("Library {} progress: {}/{}", library_id, processed, total);

        if processed >= total {
            info!(
                "Library {} scan job complete ({}/{})",
                library_id, processed, total
            );
            self.clear_job(library_id).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Idempotent per-stage started flag; true only for the first caller.
    pub async fn mark_stage_started(
        &self,
        library_id: LibraryId,
        stage: &str,
    ) -> Result<bool> {
        self.broker
            .set_nx(
                &Self::stage_started_key(library_id, stage),
                "1",
                Some(JOB_KEY_TTL),
            )
            .await
    }

    /// The task driving this library's scan, when still tracked.
    pub async fn get_task_id(&self, library_id: LibraryId) -> Result<Option<TaskId>> {
        let value = self.broker.get(&Self::task_id_key(library_id)).await?;
        Ok(value.and_then(|v| v.parse::<i64>().ok()).map(TaskId))
    }

    /// Raise the cross-process cancellation flag for a task.
    pub async fn mark_cancelled(&self, task_id: TaskId) -> Result<()> {
        self.broker
            .set(&Self::cancellation_key(task_id), "1", Some(JOB_KEY_TTL))
            .await
    }

    pub async fn is_cancelled(&self, task_id: TaskId) -> Result<bool> {
        self.broker.exists(&Self::cancellation_key(task_id)).await
    }

    pub async fn clear_cancelled(&self, task_id: TaskId) -> Result<()> {
        self.broker
            .delete(&[Self::cancellation_key(task_id)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::messaging::MemoryBroker;

    use super::*;

    fn tracker() -> (Arc<MemoryBroker>, JobProgressTracker) {
        let broker = Arc::new(MemoryBroker::new());
        let tracker = JobProgressTracker::new(Arc::clone(&broker) as Arc<dyn ScanBroker>);
        (broker, tracker)
    }

    #[tokio::test]
    async fn the_final_item_drains_the_job_and_deletes_keys() {
        let (broker, tracker) = tracker();
        let library = LibraryId(1);

        tracker
            .initialize_job(library, 3, Some(TaskId(9)))
            .await
            .unwrap();
        assert_eq!(tracker.get_task_id(library).await.unwrap(), Some(TaskId(9)));

        assert!(!tracker.mark_item_processed(library).await.unwrap());
        assert!(!tracker.mark_item_processed(library).await.unwrap());
        assert!(tracker.mark_item_processed(library).await.unwrap());

        use crate::messaging::BrokerKv as _;
        assert!(!broker.exists("scan:progress:1:total").await.unwrap());
        assert!(!broker.exists("scan:progress:1:processed").await.unwrap());
        assert!(!broker.exists("scan:progress:1:task_id").await.unwrap());
    }

    #[tokio::test]
    async fn uninitialized_jobs_do_not_count() {
        let (_broker, tracker) = tracker();
        assert!(!tracker.mark_item_processed(LibraryId(5)).await.unwrap());
    }

    #[tokio::test]
    async fn late_messages_after_drain_are_ignored() {
        let (_broker, tracker) = tracker();
        let library = LibraryId(2);

        tracker.initialize_job(library, 1, None).await.unwrap();
        assert!(tracker.mark_item_processed(library).await.unwrap());
        // A delayed message from the drained job cannot re-trigger
        // completion.
        assert!(!tracker.mark_item_processed(library).await.unwrap());
    }

    #[tokio::test]
    async fn stage_started_is_idempotent() {
        let (_broker, tracker) = tracker();
        let library = LibraryId(3);

        assert!(tracker.mark_stage_started(library, "match").await.unwrap());
        assert!(!tracker.mark_stage_started(library, "match").await.unwrap());
        assert!(tracker.mark_stage_started(library, "ingest").await.unwrap());
    }

    #[tokio::test]
    async fn cancellation_flag_round_trip() {
        let (_broker, tracker) = tracker();
        let task = TaskId(77);

        assert!(!tracker.is_cancelled(task).await.unwrap());
        tracker.mark_cancelled(task).await.unwrap();
        assert!(tracker.is_cancelled(task).await.unwrap());
        tracker.clear_cancelled(task).await.unwrap();
        assert!(!tracker.is_cancelled(task).await.unwrap());
    }
}
