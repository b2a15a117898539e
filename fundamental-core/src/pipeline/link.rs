//! Link stage: connect Calibre authors to ingested metadata.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::store::MappingData;

use super::context::ScanContext;
use super::stage::{PipelineStage, StageResult};

/// Creates or updates the `(library, calibre_author)` → metadata mapping
/// for every match result.
#[derive(Debug, Default)]
pub struct LinkStage {
    author_limit: Option<usize>,
    progress: f64,
}

impl LinkStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_author_limit(mut self, limit: usize) -> Self {
        self.author_limit = Some(limit);
        self
    }
}

#[async_trait]
impl PipelineStage for LinkStage {
    fn name(&self) -> &'static str {
        "link"
    }

    fn progress(&self) -> f64 {
        self.progress
    }

    async fn execute(&mut self, ctx: &mut ScanContext) -> StageResult {
        if ctx.is_cancelled() {
            return StageResult::failed("Link cancelled");
        }

        let mut results = ctx.match_results.clone();
        if let Some(limit) = self.author_limit {
            results.truncate(limit);
        }
        let total = results.len();

        info!(
            "Starting link stage for library {} ({} match results to process)",
            ctx.library_id, total
        );

        if total == 0 {
            warn!("No match results to link");
            return StageResult::ok_with_stats(
                "No matches to link",
                serde_json::json!({"mappings_created": 0}),
            );
        }

        let mut created = 0usize;
        let mut updated = 0usize;
        let mut skipped = 0usize;

        for (idx, result) in results.iter().enumerate() {
            if ctx.is_cancelled() {
                return StageResult::failed("Link cancelled");
            }

            let Some(calibre_author_id) = result.calibre_author_id else {
                skipped += 1;
                continue;
            };

            let metadata = match ctx
                .authors
                .find_metadata_by_key(&result.matched_entity.key)
                .await
            {
                Ok(Some(metadata)) => metadata,
                Ok(None) => {
                    // Ingest failed or skipped this author; nothing to
                    // link against yet.
                    skipped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(
                        "Metadata lookup failed for {}: {}",
                        result.matched_entity.key, err
                    );
                    skipped += 1;
                    continue;
                }
            };

            match ctx
                .authors
                .upsert_mapping(&MappingData {
                    library_id: ctx.library_id,
                    calibre_author_id,
                    author_metadata_id: metadata.id,
                    confidence_score: result.confidence_score,
                    matched_by: result.match_method,
                })
                .await
            {
                Ok((_, true)) => created += 1,
                Ok((_, false)) => updated += 1,
                Err(err) => {
                    warn!(
                        "Mapping upsert failed for author {}: {}",
                        calibre_author_id, err
                    );
                    skipped += 1;
                }
            }

            self.progress = (idx + 1) as f64 / total as f64;
            ctx.update_progress(
                self.progress,
                Some(serde_json::json!({
                    "current_stage": {
                        "name": "link",
                        "status": "in_progress",
                        "current_index": idx + 1,
                        "total_items": total,
                        "mappings_created": created,
                        "mappings_updated": updated,
                        "skipped": skipped,
                    },
                })),
            )
            .await;
        }

        info!(
            "Linking complete: {} created, {} updated, {} skipped",
            created, updated, skipped
        );

        StageResult::ok_with_stats(
            format!("Created {created} mappings, updated {updated}"),
            serde_json::json!({
                "mappings_created": created,
                "mappings_updated": updated,
                "skipped": skipped,
            }),
        )
    }
}
