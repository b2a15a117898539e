//! Score worker: job-level similarity scoring.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::messaging::ScanBroker;
use crate::pipeline::{score_library, scores_are_fresh};
use crate::store::AuthorStore;

use super::progress::JobProgressTracker;
use super::serialization::{JobStagePayload, decode, encode};
use super::worker::ScanWorker;
use super::{COMPLETION_JOBS_TOPIC, SCORE_JOBS_TOPIC};

/// Consumes `score_jobs` (fired once per library when the per-author
/// chain drains), computes similarity edges, and chains into
/// `completion_jobs`.
pub struct ScoreWorker {
    tracker: JobProgressTracker,
    authors: Arc<dyn AuthorStore>,
    min_similarity: f64,
    stale_data_max_age_days: Option<i64>,
}

impl std::fmt::Debug for ScoreWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreWorker")
            .field("min_similarity", &self.min_similarity)
            .finish()
    }
}

impl ScoreWorker {
    pub fn new(
        broker: Arc<dyn ScanBroker>,
        authors: Arc<dyn AuthorStore>,
        min_similarity: f64,
        stale_data_max_age_days: Option<i64>,
    ) -> Self {
        let tracker = JobProgressTracker::new(broker);
        Self {
            tracker,
            authors,
            min_similarity,
            stale_data_max_age_days,
        }
    }
}

#[async_trait]
impl ScanWorker for ScoreWorker {
    fn name(&self) -> &'static str {
        "score"
    }

    fn input_topic(&self) -> &'static str {
        SCORE_JOBS_TOPIC
    }

    fn output_topic(&self) -> Option<&'static str> {
        Some(COMPLETION_JOBS_TOPIC)
    }

    async fn process(&self, payload: Value) -> Result<Option<Value>> {
        let message: JobStagePayload = match decode(payload) {
            Ok(message) => message,
            Err(err) => {
                error!("Invalid score payload: {}", err);
                return Ok(None);
            }
        };

        if let Some(task_id) = message.task_id
            && self.tracker.is_cancelled(task_id).await?
        {
            info!("Task {} cancelled, skipping scoring", task_id);
            // Completion still runs so the task row is finalized.
            return Ok(Some(encode(&message)?));
        }

        info!("Starting scoring for library {}", message.library_id);

        if scores_are_fresh(
            self.authors.as_ref(),
            message.library_id,
            self.stale_data_max_age_days,
        )
        .await
        {
            info!(
                "Similarity scores for library {} are fresh, skipping",
                message.library_id
            );
            return Ok(Some(encode(&message)?));
        }

        let (pairs_scored, edges_written) = score_library(
            self.authors.as_ref(),
            message.library_id,
            self.min_similarity,
            &CancellationToken::new(),
        )
        .await?;

        info!(
            "Scoring for library {} complete: {} pairs, {} edges",
            message.library_id, pairs_scored, edges_written
        );

        Ok(Some(encode(&message)?))
    }
}
