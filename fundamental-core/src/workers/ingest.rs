//! Ingest worker: fetch and persist one author per message.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use fundamental_model::{LibraryId, TaskId};

use crate::datasource::DataSource;
use crate::error::Result;
use crate::messaging::ScanBroker;
use crate::pipeline::staleness::should_skip_refresh;
use crate::store::AuthorIngest;

use super::progress::JobProgressTracker;
use super::serialization::{JobStagePayload, MatchResultPayload, decode, encode};
use super::worker::ScanWorker;
use super::{INGEST_QUEUE_TOPIC, LINK_QUEUE_TOPIC, SCORE_JOBS_TOPIC};

/// Consumes `ingest_queue`: decides via the staleness rules whether to
/// refetch, ingests the full author, and forwards the match result to
/// `link_queue`. Failures account their item and leave the chain.
pub struct IngestWorker {
    broker: Arc<dyn ScanBroker>,
    tracker: JobProgressTracker,
    ingest: Arc<dyn AuthorIngest>,
    data_source: Arc<dyn DataSource>,
    stale_data_max_age_days: Option<i64>,
    stale_data_refresh_interval_days: Option<i64>,
    max_works_per_author: Option<usize>,
}

impl std::fmt::Debug for IngestWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestWorker")
            .field("source", &self.data_source.name())
            .finish()
    }
}

impl IngestWorker {
    pub fn new(
        broker: Arc<dyn ScanBroker>,
        ingest: Arc<dyn AuthorIngest>,
        data_source: Arc<dyn DataSource>,
        stale_data_max_age_days: Option<i64>,
        stale_data_refresh_interval_days: Option<i64>,
        max_works_per_author: Option<usize>,
    ) -> Self {
        let tracker = JobProgressTracker::new(Arc::clone(&broker));
        Self {
            broker,
            tracker,
            ingest,
            data_source,
            stale_data_max_age_days,
            stale_data_refresh_interval_days,
            max_works_per_author,
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
impl ScanWorker for IngestWorker {
    fn name(&self) -> &'static str {
        "ingest"
    }

    fn input_topic(&self) -> &'static str {
        INGEST_QUEUE_TOPIC
    }

    fn output_topic(&self) -> Option<&'static str> {
        Some(LINK_QUEUE_TOPIC)
    }

    async fn process(&self, payload: Value) -> Result<Option<Value>> {
        let message: MatchResultPayload = match decode(payload) {
            Ok(message) => message,
            Err(err) => {
                error!("Invalid ingest payload: {}", err);
                return Ok(None);
            }
        };

        let library_id = message.library_id;
        let key = message.match_result.matched_entity.key.clone();

        self.tracker.mark_stage_started(library_id, "ingest").await?;

        if let Some(task_id) = message.task_id
            && self.tracker.is_cancelled(task_id).await?
        {
            debug!("Task {} cancelled, skipping ingest", task_id);
            self.check_completion(library_id, message.task_id).await?;
            return Ok(None);
        }

        let last_synced = self.ingest.last_synced_at(&key).await?;
        if should_skip_refresh(
            last_synced,
            self.stale_data_max_age_days,
            self.stale_data_refresh_interval_days,
            Utc::now(),
        ) {
            debug!("Data for {} is fresh, forwarding without fetch", key);
            return Ok(Some(encode(&message)?));
        }

        let fetched: Result<Option<()>> = async {
            let Some(author_data) = self.data_source.get_author(&key).await? else {
                return Ok(None);
            };
            let work_keys = self
                .data_source
                .get_author_works(&key, self.max_works_per_author, "eng")
                .await?;
            self.ingest
                .ingest_author(&message.match_result, &author_data, &work_keys)
                .await?;
            Ok(Some(()))
        }
        .await;

        match fetched {
            Ok(Some(())) => {
                info!(
                    "IngestWorker: ingested author {} ({})",
                    message.author_name, key
                );
                Ok(Some(encode(&message)?))
            }
            Ok(None) => {
                warn!("Could not fetch full author data for key {}", key);
                self.check_completion(library_id, message.task_id).await?;
                Ok(None)
            }
            Err(err) => {
                warn!("Failed to ingest author {} ({}): {}", message.author_name, key, err);
                self.check_completion(library_id, message.task_id).await?;
                Err(err)
            }
        }
    }
}
