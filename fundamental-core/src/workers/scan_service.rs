//! Scan job creation.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use fundamental_model::{LibraryId, TaskId, TaskType};

use crate::datasource::DataSourceConfig;
use crate::error::{CoreError, Result};
use crate::messaging::ScanBroker;
use crate::store::{LibraryStore, TaskStore};

use super::progress::JobProgressTracker;
use super::serialization::{ScanJobPayload, encode};
use super::SCAN_JOBS_TOPIC;

/// Entry point for distributed scans: persists the tracking task,
/// clears stale counters, and publishes the job onto `scan_jobs` for the
/// crawl worker.
pub struct LibraryScanningService {
    store: Arc<dyn TaskStore>,
    libraries: Arc<dyn LibraryStore>,
    broker: Arc<dyn ScanBroker>,
}

impl std::fmt::Debug for LibraryScanningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryScanningService").finish()
    }
}

impl LibraryScanningService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        libraries: Arc<dyn LibraryStore>,
        broker: Arc<dyn ScanBroker>,
    ) -> Self {
        Self {
            store,
            libraries,
            broker,
        }
    }

    /// Publish a scan job for a library. Returns the tracking task id.
    pub async fn scan_library(
        &self,
        library_id: LibraryId,
        user_id: i64,
        data_source_config: Option<DataSourceConfig>,
    ) -> Result<TaskId> {
        let library = self
            .libraries
            .get(library_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("library {library_id}")))?;

        let data_source_config = data_source_config.unwrap_or_default();

        let task = self
            .store
            .create_task(
                TaskType::LibraryScan,
                user_id,
                Some(json!({
                    "library_id": library_id,
                    "data_source_config": &data_source_config,
                })),
            )
            .await?;

        // Counters from an abandoned previous scan would make this job
        // drain early.
        let tracker = JobProgressTracker::new(Arc::clone(&self.broker));
        tracker.clear_job(library_id).await?;

        let payload = ScanJobPayload {
            task_id: Some(task.id),
            library_id,
            calibre_db_path: library.calibre_db_path.clone(),
            calibre_db_file: library.calibre_db_file.clone(),
            data_source_config,
        };

        self.broker
            .publish(SCAN_JOBS_TOPIC, encode(&payload)?)
            .await?;

        info!(
            "Published library scan job for library {} (task_id: {})",
            library_id, task.id
        );

        Ok(task.id)
    }
}
