//! Crawl worker: fan a scan job out into per-author messages.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::catalog::CatalogOpener;
use crate::error::Result;
use crate::messaging::ScanBroker;
use crate::store::TaskStore;

use super::progress::JobProgressTracker;
use super::serialization::{
    AuthorMatchPayload, JobStagePayload, ScanJobPayload, decode, encode,
};
use super::worker::ScanWorker;
use super::{MATCH_QUEUE_TOPIC, SCAN_JOBS_TOPIC, SCORE_JOBS_TOPIC};

/// Consumes `scan_jobs`, enumerates the library's authors, initializes
/// the per-job counters to N, and publishes one `match_queue` message
/// per author.
pub struct CrawlWorker {
    broker: Arc<dyn ScanBroker>,
    tracker: JobProgressTracker,
    store: Arc<dyn TaskStore>,
    opener: Arc<dyn CatalogOpener>,
}

impl std::fmt::Debug for CrawlWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlWorker").finish()
    }
}

impl CrawlWorker {
    pub fn new(
        broker: Arc<dyn ScanBroker>,
        store: Arc<dyn TaskStore>,
        opener: Arc<dyn CatalogOpener>,
    ) -> Self {
        let tracker = JobProgressTracker::new(Arc::clone(&broker));
        Self {
            broker,
            tracker,
            store,
            opener,
        }
    }
}

#[async_trait]
impl ScanWorker for CrawlWorker {
    fn name(&self) -> &'static str {
        "crawl"
    }

    fn input_topic(&self) -> &'static str {
        SCAN_JOBS_TOPIC
    }

    async fn process(&self, payload: Value) -> Result<Option<Value>> {
        let job: ScanJobPayload = match decode(payload) {
            Ok(job) => job,
            Err(err) => {
                error!("Invalid scan job payload: {}", err);
                return Ok(None);
            }
        };

        info!(
            "CrawlWorker: scanning library {} at {}/{}",
            job.library_id, job.calibre_db_path, job.calibre_db_file
        );

        if let Some(task_id) = job.task_id {
            if self.tracker.is_cancelled(task_id).await? {
                info!("Task {} cancelled before crawl, dropping job", task_id);
                return Ok(None);
            }
            self.store.start_task(task_id).await?;
        }

        let catalog = match self
            .opener
            .open(&job.calibre_db_path, &job.calibre_db_file)
            .await
        {
            Ok(catalog) => catalog,
            Err(err) => {
                // Library unusable: drop the message rather than nack so
                // the queue keeps moving.
                error!(
                    "Failed to open catalog for library {}: {}",
                    job.library_id, err
                );
                if let Some(task_id) = job.task_id {
                    self.store
                        .fail_task(task_id, &format!("failed to open catalog: {err}"))
                        .await?;
                }
                return Ok(None);
            }
        };

        let authors = catalog.list_authors().await?;
        let total = authors.len() as i64;

        self.tracker
            .initialize_job(job.library_id, total, job.task_id)
            .await?;

        if authors.is_empty() {
            // Nothing to fan out; go straight to the job-level phase.
            info!(
                "Library {} has no authors, skipping to scoring",
                job.library_id
            );
            self.broker
                .publish(
                    SCORE_JOBS_TOPIC,
                    encode(&JobStagePayload {
                        task_id: job.task_id,
                        library_id: job.library_id,
                    })?,
                )
                .await?;
            return Ok(None);
        }

        for author in authors {
            self.broker
                .publish(
                    MATCH_QUEUE_TOPIC,
                    encode(&AuthorMatchPayload {
                        task_id: job.task_id,
                        library_id: job.library_id,
                        author,
                    })?,
                )
                .await?;
        }

        info!(
            "CrawlWorker: published {} authors for library {}",
            total, job.library_id
        );
        Ok(None)
    }
}
