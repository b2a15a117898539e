//! Link worker: create the mapping for one match result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use fundamental_model::{LibraryId, TaskId};

use crate::error::Result;
use crate::messaging::ScanBroker;
use crate::store::{AuthorStore, MappingData};

use super::progress::JobProgressTracker;
use super::serialization::{JobStagePayload, MatchResultPayload, decode, encode};
use super::worker::ScanWorker;
use super::{LINK_QUEUE_TOPIC, SCORE_JOBS_TOPIC};

/// Consumes `link_queue`, upserts the `(library, calibre_author)` →
/// metadata mapping, and accounts the item. The worker that accounts
/// the final item of a job publishes the job-level `score_jobs` message
/// exactly once.
pub struct LinkWorker {
    broker: Arc<dyn ScanBroker>,
    tracker: JobProgressTracker,
    authors: Arc<dyn AuthorStore>,
}

impl std::fmt::Debug for LinkWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkWorker").finish()
    }
}

impl LinkWorker {
    pub fn new(broker: Arc<dyn ScanBroker>, authors: Arc<dyn AuthorStore>) -> Self {
        let tracker = JobProgressTracker::new(Arc::clone(&broker));
        Self {
            broker,
            tracker,
            authors,
        }
    }

    async fn check_completion(
        &self,
        library_id: LibraryId,
        task_id: Option<TaskId>,
    ) -> Result<()> {
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
impl ScanWorker for LinkWorker {
    fn name(&self) -> &'static str {
        "link"
    }

    fn input_topic(&self) -> &'static str {
        LINK_QUEUE_TOPIC
    }

    async fn process(&self, payload: Value) -> Result<Option<Value>> {
        let message: MatchResultPayload = match decode(payload) {
            Ok(message) => message,
            Err(err) => {
                error!("Invalid link payload: {}", err);
                return Ok(None);
            }
        };

        let library_id = message.library_id;

        self.tracker.mark_stage_started(library_id, "link").await?;

        if let Some(task_id) = message.task_id
            && self.tracker.is_cancelled(task_id).await?
        {
            debug!("Task {} cancelled, skipping link", task_id);
            self.check_completion(library_id, message.task_id).await?;
            return Ok(None);
        }

        let linked: Result<()> = async {
            let metadata = self
                .authors
                .find_metadata_by_key(&message.match_result.matched_entity.key)
                .await?;

            match metadata {
                Some(metadata) => {
                    let (_, created) = self
                        .authors
                        .upsert_mapping(&MappingData {
                            library_id,
                            calibre_author_id: message.calibre_author_id,
                            author_metadata_id: metadata.id,
                            confidence_score: message.match_result.confidence_score,
                            matched_by: message.match_result.match_method,
                        })
                        .await?;
                    debug!(
                        "LinkWorker: {} mapping for author {} -> {}",
                        if created { "created" } else { "updated" },
                        message.calibre_author_id,
                        metadata.id
                    );
                }
                None => {
                    warn!(
                        "No ingested metadata for key {}, skipping link",
                        message.match_result.matched_entity.key
                    );
                }
            }
            Ok(())
        }
        .await;

        // Successful or not, this item is accounted; the counter is what
        // lets the job finish even with failures in the chain.
        self.check_completion(library_id, message.task_id).await?;
        linked?;
        Ok(None)
    }
}
