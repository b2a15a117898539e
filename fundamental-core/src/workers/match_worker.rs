//! Match worker: per-author matching against the external source.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use fundamental_model::{LibraryId, TaskId};

use crate::datasource::DataSource;
use crate::error::Result;
use crate::matching::{MatchRequestOptions, MatchingOrchestrator};
use crate::messaging::ScanBroker;
use crate::store::AuthorStore;

use super::progress::JobProgressTracker;
use super::serialization::{
    AuthorMatchPayload, JobStagePayload, MatchResultPayload, decode, encode,
};
use super::worker::ScanWorker;
use super::{MATCH_QUEUE_TOPIC, INGEST_QUEUE_TOPIC, SCORE_JOBS_TOPIC};

/// Consumes `match_queue`; matched authors continue to `ingest_queue`,
/// while skips, unmatched authors, and failures account their item so
/// the job can still drain.
pub struct MatchWorker {
    broker: Arc<dyn ScanBroker>,
    tracker: JobProgressTracker,
    authors: Arc<dyn AuthorStore>,
    data_source: Arc<dyn DataSource>,
    orchestrator: MatchingOrchestrator,
    stale_data_max_age_days: Option<i64>,
}

impl std::fmt::Debug for MatchWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchWorker")
            .field("source", &self.data_source.name())
            .finish()
    }
}

impl MatchWorker {
    pub fn new(
        broker: Arc<dyn ScanBroker>,
        authors: Arc<dyn AuthorStore>,
        data_source: Arc<dyn DataSource>,
        min_confidence: f64,
        stale_data_max_age_days: Option<i64>,
    ) -> Self {
        let tracker = JobProgressTracker::new(Arc::clone(&broker));
        Self {
            broker,
            tracker,
            authors,
            data_source,
            orchestrator: MatchingOrchestrator::new(min_confidence),
            stale_data_max_age_days,
        }
    }

    /// Account this author as processed; the last item triggers the
    /// job-level phase.
    async fn check_completion(
        &self,
        library_id: LibraryId,
        task_id: Option<TaskId>,
    ) -> Result<()> {
        // Resolve the task id before accounting: the keys disappear once
        // the job drains.
        let task_id = match task_id {
            Some(task_id) => Some(task_id),
            None => self.tracker.get_task_id(library_id).await?,
        };
        if self.tracker.mark_item_processed(library_id).await? {
            self.broker
                .publish(
                    SCORE_JOBS_TOPIC,
                    encode(&JobStagePayload {
                        task_id,
                        library_id,
                    })?,
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ScanWorker for MatchWorker {
    fn name(&self) -> &'static str {
        "match"
    }

    fn input_topic(&self) -> &'static str {
        MATCH_QUEUE_TOPIC
    }

    fn output_topic(&self) -> Option<&'static str> {
        Some(INGEST_QUEUE_TOPIC)
    }

    async fn process(&self, payload: Value) -> Result<Option<Value>> {
        let message: AuthorMatchPayload = match decode(payload) {
            Ok(message) => message,
            Err(err) => {
                error!("Invalid match payload: {}", err);
                return Ok(None);
            }
        };

        let library_id = message.library_id;
        let author = message.author;

        info!(
            "MatchWorker: processing author {} (library: {}, task: {:?})",
            author.name, library_id, message.task_id
        );

        self.tracker.mark_stage_started(library_id, "match").await?;

        if let Some(task_id) = message.task_id
            && self.tracker.is_cancelled(task_id).await?
        {
            debug!("Task {} cancelled, skipping match", task_id);
            self.check_completion(library_id, message.task_id).await?;
            return Ok(None);
        }

        let options = MatchRequestOptions {
            stale_max_age_days: self.stale_data_max_age_days,
            ..MatchRequestOptions::default()
        };

        let outcome = self
            .orchestrator
            .process_match_request(
                self.authors.as_ref(),
                &author,
                library_id,
                self.data_source.as_ref(),
                &options,
            )
            .await;

        match outcome {
            Ok(Some(result)) => {
                info!(
                    "Matched author {} -> {} (confidence: {:.2})",
                    author.name, result.matched_entity.name, result.confidence_score
                );
                Ok(Some(encode(&MatchResultPayload {
                    task_id: message.task_id,
                    library_id,
                    calibre_author_id: author.id,
                    author_name: author.name,
                    match_result: result,
                })?))
            }
            Ok(None) => {
                // Skipped or recorded as unmatched; either way the item
                // leaves the chain here.
                self.check_completion(library_id, message.task_id).await?;
                Ok(None)
            }
            Err(err) => {
                // Account the failed item so the job can still drain,
                // then surface the error.
                self.check_completion(library_id, message.task_id).await?;
                Err(err)
            }
        }
    }
}
