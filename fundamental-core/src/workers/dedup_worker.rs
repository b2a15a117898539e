//! Deduplicate worker: job-level duplicate merging.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::merge::DuplicateDetector;
use crate::messaging::ScanBroker;
use crate::pipeline::deduplicate_library;
use crate::store::{AuthorMerger, AuthorStore};

use super::progress::JobProgressTracker;
use super::serialization::{JobStagePayload, decode, encode};
use super::worker::ScanWorker;
use super::{DEDUPLICATE_JOBS_TOPIC, SCORE_JOBS_TOPIC};

/// Consumes explicitly requested `deduplicate_jobs` messages, merges
/// duplicates across the library, and chains into `score_jobs`.
pub struct DeduplicateWorker {
    tracker: JobProgressTracker,
    authors: Arc<dyn AuthorStore>,
    merger: Arc<dyn AuthorMerger>,
    detector: DuplicateDetector,
}

impl std::fmt::Debug for DeduplicateWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeduplicateWorker").finish()
    }
}

impl DeduplicateWorker {
    pub fn new(
        broker: Arc<dyn ScanBroker>,
        authors: Arc<dyn AuthorStore>,
        merger: Arc<dyn AuthorMerger>,
        min_name_similarity: f64,
    ) -> Self {
        let tracker = JobProgressTracker::new(broker);
        Self {
            tracker,
            authors,
            merger,
            detector: DuplicateDetector::new(min_name_similarity),
        }
    }
}

#[async_trait]
impl ScanWorker for DeduplicateWorker {
    fn name(&self) -> &'static str {
        "deduplicate"
    }

    fn input_topic(&self) -> &'static str {
        DEDUPLICATE_JOBS_TOPIC
    }

    fn output_topic(&self) -> Option<&'static str> {
        Some(SCORE_JOBS_TOPIC)
    }

    async fn process(&self, payload: Value) -> Result<Option<Value>> {
        let message: JobStagePayload = match decode(payload) {
            Ok(message) => message,
            Err(err) => {
                error!("Invalid deduplicate payload: {}", err);
                return Ok(None);
            }
        };

        if let Some(task_id) = message.task_id
            && self.tracker.is_cancelled(task_id).await?
        {
            info!("Task {} cancelled, skipping deduplication", task_id);
            return Ok(None);
        }

        info!("Starting deduplication for library {}", message.library_id);

        let (found, merged) = deduplicate_library(
            self.authors.as_ref(),
            self.merger.as_ref(),
            &self.detector,
            message.library_id,
            &CancellationToken::new(),
        )
        .await?;

        info!(
            "Deduplication for library {} complete: {} found, {} merged",
            message.library_id, found, merged
        );

        Ok(Some(encode(&message)?))
    }
}
