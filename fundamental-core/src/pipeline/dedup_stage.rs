//! Deduplicate stage: merge duplicate metadata rows within a library.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fundamental_model::LibraryId;

use crate::error::{CoreError, Result};
use crate::merge::{DuplicateDetector, DuplicateRecord};
use crate::store::{AuthorMerger, AuthorStore};

use super::context::ScanContext;
use super::stage::{PipelineStage, StageResult};

/// Detect and merge duplicate authors within one library. Returns
/// `(duplicates_found, merged)`. Shared between the in-process stage and
/// the deduplicate worker.
pub(crate) async fn deduplicate_library(
    authors: &dyn AuthorStore,
    merger: &dyn AuthorMerger,
    detector: &DuplicateDetector,
    library_id: LibraryId,
    cancel: &CancellationToken,
) -> Result<(usize, usize)> {
    let metadata = authors.list_metadata_for_library(library_id).await?;

    let mut records = Vec::with_capacity(metadata.len());
    for entry in metadata {
        let alternate_names = match authors.alternate_names_for(entry.id).await {
            Ok(names) => names,
            Err(err) => {
                warn!("Alternate-name lookup failed for {}: {}", entry.id, err);
                Vec::new()
            }
        };
        records.push(DuplicateRecord {
            metadata: entry,
            alternate_names,
        });
    }

    info!(
        "Checking {} author records in library {} for duplicates",
        records.len(),
        library_id
    );

    let pairs: Vec<_> = detector.find_duplicates(&records).collect();
    let found = pairs.len();
    let mut merged = 0usize;

    for pair in &pairs {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled("deduplicate cancelled".to_string()));
        }

        info!(
            "Merging duplicate author {} (score {:.1}) into {} (score {:.1})",
            pair.merge, pair.merge_score, pair.keep, pair.keep_score
        );
        match merger.merge(pair.keep, pair.merge).await {
            Ok(()) => merged += 1,
            Err(err) => warn!("Failed to merge {} into {}: {}", pair.merge, pair.keep, err),
        }
    }

    Ok((found, merged))
}

/// Pipeline stage wrapper around [`deduplicate_library`].
#[derive(Debug)]
pub struct DeduplicateStage {
    detector: DuplicateDetector,
    progress: f64,
}

impl DeduplicateStage {
    pub fn new(min_name_similarity: f64) -> Self {
        Self {
            detector: DuplicateDetector::new(min_name_similarity),
            progress: 0.0,
        }
    }
}

impl Default for DeduplicateStage {
    fn default() -> Self {
        Self::new(0.85)
    }
}

#[async_trait]
impl PipelineStage for DeduplicateStage {
    fn name(&self) -> &'static str {
        "deduplicate"
    }

    fn progress(&self) -> f64 {
        self.progress
    }

    async fn execute(&mut self, ctx: &mut ScanContext) -> StageResult {
        if ctx.is_cancelled() {
            return StageResult::failed("Deduplicate cancelled");
        }

        let outcome = deduplicate_library(
            ctx.authors.as_ref(),
            ctx.merger.as_ref(),
            &self.detector,
            ctx.library_id,
            &ctx.cancellation_token(),
        )
        .await;

        let (found, merged) = match outcome {
            Ok(counts) => counts,
            Err(CoreError::Cancelled(_)) => {
                return StageResult::failed("Deduplicate cancelled");
            }
            Err(err) => return StageResult::failed(format!("Deduplicate failed: {err}")),
        };

        self.progress = 1.0;
        ctx.update_progress(
            self.progress,
            Some(serde_json::json!({
                "current_stage": {
                    "name": "deduplicate",
                    "status": "completed",
                    "duplicates_found": found,
                    "merged": merged,
                },
            })),
        )
        .await;

        StageResult::ok_with_stats(
            format!("Merged {merged} duplicate authors"),
            serde_json::json!({"duplicates_found": found, "merged": merged}),
        )
    }
}
